use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for one pipeline run.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of the designated termination tool. The engine recognizes an
/// invocation of this tool and converts its payload into a
/// [`TerminationSignal`] for the nearest enclosing loop.
pub const TERMINATION_TOOL: &str = "exit_loop";

/// Explicit convergence signal that ends a loop early.
///
/// Raised exclusively through the termination tool, never inferred from
/// the text a unit produces. Consumed by the loop that catches it; it has
/// no existence outside the iteration that raised it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminationSignal {
    pub status: String,
    pub message: String,
}

impl TerminationSignal {
    pub fn approved(message: impl Into<String>) -> Self {
        Self {
            status: "approved".to_string(),
            message: message.into(),
        }
    }
}

/// How a loop exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopOutcome {
    /// The termination tool fired; the intended exit.
    Signalled,
    /// The iteration budget ran out; a safety valve, not a failure.
    MaxIterations,
}

/// Tool definition handed to the backend alongside a unit's instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Result of a tool execution.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// A single tool invocation reported back by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub input: serde_json::Value,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            input,
        }
    }
}

/// Request sent across the backend boundary for one unit invocation.
///
/// The instruction is fully resolved: the backend never sees template
/// placeholders and never touches the state store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitRequest {
    pub unit: String,
    pub instruction: String,
    pub tools: Vec<ToolDefinition>,
}

/// What the backend produced for one unit invocation: a value, a single
/// tool invocation, or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitReply {
    pub value: Option<serde_json::Value>,
    pub tool_call: Option<ToolInvocation>,
}

impl UnitReply {
    /// A reply carrying only a produced value.
    pub fn value(value: serde_json::Value) -> Self {
        Self {
            value: Some(value),
            tool_call: None,
        }
    }

    /// A reply carrying only produced text.
    pub fn text(text: impl Into<String>) -> Self {
        Self::value(serde_json::Value::String(text.into()))
    }

    /// A reply carrying only a tool invocation.
    pub fn tool(name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            value: None,
            tool_call: Some(ToolInvocation::new(name, input)),
        }
    }

    /// Attach a tool invocation to this reply.
    pub fn with_tool(mut self, name: impl Into<String>, input: serde_json::Value) -> Self {
        self.tool_call = Some(ToolInvocation::new(name, input));
        self
    }
}

/// Pipeline event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A pipeline run started.
    RunStarted { run_id: RunId, pipeline: String },
    /// A unit invocation started.
    UnitStarted { unit: String },
    /// A unit invocation completed.
    UnitCompleted {
        unit: String,
        output_key: String,
        elapsed_ms: u64,
    },
    /// A unit invoked one of its declared tools.
    ToolInvoked { unit: String, tool: String },
    /// A loop began an iteration (1-based).
    LoopIteration { name: String, iteration: usize },
    /// A loop finished.
    LoopFinished {
        name: String,
        outcome: LoopOutcome,
        iterations: usize,
    },
    /// A parallel composite merged its branch outputs back into the store.
    ParallelMerged { name: String, keys: Vec<String> },
    /// The run completed.
    RunCompleted { run_id: RunId, elapsed_ms: u64 },
    /// The run failed.
    RunFailed { run_id: RunId, error: String },
}
