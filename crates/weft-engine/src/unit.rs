use serde::{Deserialize, Serialize};

/// An atomic pipeline step.
///
/// A unit is an immutable descriptor: a name, an instruction template
/// referencing state keys with `{key}` placeholders, the key its result is
/// written under, and the names of the tools it may invoke. The engine
/// resolves the template, hands the instruction to the backend, and writes
/// the reply value to the output key. A unit never touches the state store
/// itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    /// Unique name, used in records, events, and error reports.
    pub name: String,
    /// Instruction template with `{key}` placeholders.
    pub instruction: String,
    /// Key the unit's result is written under.
    pub output_key: String,
    /// Names of tools this unit may invoke (empty = none).
    #[serde(default)]
    pub tools: Vec<String>,
}

impl Unit {
    pub fn new(
        name: impl Into<String>,
        instruction: impl Into<String>,
        output_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            instruction: instruction.into(),
            output_key: output_key.into(),
            tools: vec![],
        }
    }

    /// Set the tools this unit may invoke.
    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    pub fn declares_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t == name)
    }
}
