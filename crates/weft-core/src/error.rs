use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeftError {
    // Pipeline definition errors, raised at construction, never mid-run
    #[error("Invalid pipeline definition: {0}")]
    Definition(String),

    // Backend errors
    #[error("Backend invocation failed for unit '{unit}': {message}")]
    Backend { unit: String, message: String },

    #[error("Unit '{unit}' timed out after {timeout_secs}s")]
    UnitTimeout { unit: String, timeout_secs: u64 },

    #[error("Parallel branches failed: {}", format_branches(.failures))]
    ParallelBranches { failures: Vec<(String, String)> },

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Unit '{unit}' invoked undeclared tool '{tool}'")]
    ToolNotDeclared { unit: String, tool: String },

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    // Run control
    #[error("Run cancelled")]
    Cancelled,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_branches(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(name, msg)| format!("{}: {}", name, msg))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, WeftError>;
