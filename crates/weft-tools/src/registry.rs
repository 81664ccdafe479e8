use std::collections::HashMap;
use std::sync::Arc;

use weft_core::error::{Result, WeftError};
use weft_core::traits::Tool;
use weft_core::types::{ToolDefinition, ToolResult};

/// Registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool.
    pub fn register(&mut self, tool: impl Tool) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    /// Unregister a tool by name.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List all registered tools.
    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Get all tool definitions for handing to the backend.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| definition_of(t)).collect()
    }

    /// Get definitions for a named subset of tools, in the given order.
    pub fn definitions_for(&self, names: &[String]) -> Result<Vec<ToolDefinition>> {
        names
            .iter()
            .map(|name| {
                self.tools
                    .get(name)
                    .map(definition_of)
                    .ok_or_else(|| WeftError::ToolNotFound(name.clone()))
            })
            .collect()
    }

    /// Execute a tool by name.
    pub async fn execute(&self, name: &str, input: serde_json::Value) -> Result<ToolResult> {
        let tool = self
            .get(name)
            .ok_or_else(|| WeftError::ToolNotFound(name.to_string()))?;

        let timeout = std::time::Duration::from_secs(tool.timeout_secs());

        match tokio::time::timeout(timeout, tool.execute(input)).await {
            Ok(result) => result,
            Err(_) => Err(WeftError::ToolTimeout {
                tool: name.to_string(),
                timeout_secs: tool.timeout_secs(),
            }),
        }
    }

    /// Create a registry with all built-in tools registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(crate::builtin::exit_loop::ExitLoopTool);
        registry
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn definition_of(tool: &Arc<dyn Tool>) -> ToolDefinition {
    ToolDefinition {
        name: tool.name().to_string(),
        description: tool.description().to_string(),
        input_schema: tool.input_schema(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::types::TERMINATION_TOOL;

    #[test]
    fn test_with_builtins_registers_exit_loop() {
        let registry = ToolRegistry::with_builtins();
        assert!(registry.contains(TERMINATION_TOOL));
        assert_eq!(registry.list(), vec![TERMINATION_TOOL]);
    }

    #[test]
    fn test_definitions_for_unknown_tool() {
        let registry = ToolRegistry::with_builtins();
        let err = registry
            .definitions_for(&["grep_web".to_string()])
            .unwrap_err();
        assert!(matches!(err, WeftError::ToolNotFound(name) if name == "grep_web"));
    }

    #[test]
    fn test_definitions_for_preserves_order() {
        let registry = ToolRegistry::with_builtins();
        let defs = registry
            .definitions_for(&[TERMINATION_TOOL.to_string()])
            .unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, TERMINATION_TOOL);
        assert!(defs[0].input_schema.is_object());
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry
            .execute("exit_loop", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, WeftError::ToolNotFound(_)));
    }
}
