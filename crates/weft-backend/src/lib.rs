pub mod retry;

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use futures::future::BoxFuture;

use weft_core::error::{Result, WeftError};
use weft_core::traits::UnitBackend;
use weft_core::types::{UnitReply, UnitRequest};

pub use retry::{RetryPolicy, RetryingBackend};

/// Backend adapter wrapping an async closure.
///
/// The embedding point for real collaborator backends: the closure receives
/// the fully resolved request and produces the reply however it likes.
pub struct FnBackend {
    f: Box<dyn Fn(UnitRequest) -> BoxFuture<'static, Result<UnitReply>> + Send + Sync>,
}

impl FnBackend {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(UnitRequest) -> BoxFuture<'static, Result<UnitReply>> + Send + Sync + 'static,
    {
        Self { f: Box::new(f) }
    }

    /// Wrap a synchronous function. Handy for deterministic embeddings and
    /// tests that don't need to await anything.
    pub fn from_sync<F>(f: F) -> Self
    where
        F: Fn(UnitRequest) -> Result<UnitReply> + Send + Sync + 'static,
    {
        Self::new(move |request| {
            let reply = f(request);
            Box::pin(async move { reply })
        })
    }
}

impl UnitBackend for FnBackend {
    fn invoke(&self, request: UnitRequest) -> BoxFuture<'_, Result<UnitReply>> {
        (self.f)(request)
    }
}

/// Deterministic backend replaying scripted replies per unit name.
///
/// Each unit gets a queue of replies consumed in order; the final reply is
/// repeated once the queue would run dry, so bounded loops can keep running
/// against it. Unknown unit names fail the invocation.
pub struct ScriptedBackend {
    scripts: Mutex<HashMap<String, VecDeque<UnitReply>>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
        }
    }

    /// Append a reply to a unit's script.
    pub fn reply(self, unit: impl Into<String>, reply: UnitReply) -> Self {
        self.lock_scripts()
            .entry(unit.into())
            .or_default()
            .push_back(reply);
        self
    }

    fn lock_scripts(&self) -> std::sync::MutexGuard<'_, HashMap<String, VecDeque<UnitReply>>> {
        match self.scripts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Append a plain text reply to a unit's script.
    pub fn text(self, unit: impl Into<String>, text: impl Into<String>) -> Self {
        self.reply(unit, UnitReply::text(text))
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitBackend for ScriptedBackend {
    fn invoke(&self, request: UnitRequest) -> BoxFuture<'_, Result<UnitReply>> {
        Box::pin(async move {
            let mut scripts = self.lock_scripts();
            let queue = scripts
                .get_mut(&request.unit)
                .ok_or_else(|| WeftError::Backend {
                    unit: request.unit.clone(),
                    message: "no scripted reply for unit".to_string(),
                })?;

            // Keep the last reply around so loops can re-invoke the unit.
            if queue.len() > 1 {
                Ok(queue.pop_front().unwrap_or_default())
            } else {
                queue.front().cloned().ok_or_else(|| WeftError::Backend {
                    unit: request.unit.clone(),
                    message: "scripted reply queue is empty".to_string(),
                })
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(unit: &str) -> UnitRequest {
        UnitRequest {
            unit: unit.to_string(),
            instruction: "do the thing".to_string(),
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn test_fn_backend_sees_resolved_instruction() {
        let backend = FnBackend::from_sync(|req| Ok(UnitReply::text(format!("echo: {}", req.instruction))));
        let reply = backend.invoke(request("Echo")).await.unwrap();
        assert_eq!(reply.value, Some(serde_json::json!("echo: do the thing")));
    }

    #[tokio::test]
    async fn test_scripted_backend_replays_in_order_then_repeats_last() {
        let backend = ScriptedBackend::new()
            .text("Critic", "needs a stronger ending")
            .text("Critic", "APPROVED");

        let first = backend.invoke(request("Critic")).await.unwrap();
        let second = backend.invoke(request("Critic")).await.unwrap();
        let third = backend.invoke(request("Critic")).await.unwrap();

        assert_eq!(first.value, Some(serde_json::json!("needs a stronger ending")));
        assert_eq!(second.value, Some(serde_json::json!("APPROVED")));
        assert_eq!(third.value, Some(serde_json::json!("APPROVED")));
    }

    #[tokio::test]
    async fn test_scripted_backend_unknown_unit() {
        let backend = ScriptedBackend::new();
        let err = backend.invoke(request("Ghost")).await.unwrap_err();
        assert!(matches!(err, WeftError::Backend { unit, .. } if unit == "Ghost"));
    }
}
