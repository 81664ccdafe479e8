use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::traits::Tool;
use weft_core::types::{TerminationSignal, ToolResult, TERMINATION_TOOL};

/// The designated termination tool.
///
/// A unit inside a refinement loop calls this to signal convergence; the
/// engine converts the returned payload into a `TerminationSignal` and the
/// loop stops at the end of the current iteration. This is the only way a
/// loop exits early; approval is never inferred from produced text.
pub struct ExitLoopTool;

#[derive(Deserialize)]
struct ExitLoopInput {
    #[serde(default)]
    reason: Option<String>,
}

impl Tool for ExitLoopTool {
    fn name(&self) -> &str {
        TERMINATION_TOOL
    }

    fn description(&self) -> &str {
        "Call this tool ONLY when the current result needs no further changes, to end the refinement loop."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "reason": {
                    "type": "string",
                    "description": "Short explanation of why the loop should stop"
                }
            },
            "required": []
        })
    }

    fn execute(&self, input: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let params: ExitLoopInput = serde_json::from_value(input)
                .map_err(|e| WeftError::ToolValidation(e.to_string()))?;

            let message = params
                .reason
                .unwrap_or_else(|| "Result approved. Exiting refinement loop.".to_string());
            debug!(message = %message, "Termination tool invoked");

            let signal = TerminationSignal::approved(message);
            Ok(ToolResult::success(serde_json::to_string(&signal)?))
        })
    }
}
