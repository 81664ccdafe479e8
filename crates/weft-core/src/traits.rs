use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::{ToolResult, UnitReply, UnitRequest};

/// Unit execution backend: the external dependency that actually runs a
/// unit's body.
///
/// The engine treats this as opaque: possibly slow, possibly failing, and
/// free to produce its reply however it likes. Retry policy belongs on this
/// side of the boundary, never in the engine.
pub trait UnitBackend: Send + Sync + 'static {
    /// Execute one unit invocation.
    fn invoke(&self, request: UnitRequest) -> BoxFuture<'_, Result<UnitReply>>;
}

/// Tool: a named side-effecting operation a unit may invoke.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in backend tool invocations).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with given input.
    fn execute(&self, input: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }
}
