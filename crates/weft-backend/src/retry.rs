use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use weft_core::error::{Result, WeftError};
use weft_core::traits::UnitBackend;
use weft_core::types::{UnitReply, UnitRequest};

/// Retry policy for a backend decorator.
///
/// Lives on the collaborator side of the boundary: the engine itself never
/// retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// A backend that retries failed invocations and falls back to alternative
/// backends once the primary is exhausted.
pub struct RetryingBackend {
    primary: Box<dyn UnitBackend>,
    fallbacks: Vec<Box<dyn UnitBackend>>,
    policy: RetryPolicy,
}

impl RetryingBackend {
    pub fn new(primary: Box<dyn UnitBackend>, policy: RetryPolicy) -> Self {
        Self {
            primary,
            fallbacks: vec![],
            policy,
        }
    }

    /// Add a fallback backend, tried in registration order after the
    /// primary's retries are exhausted.
    pub fn with_fallback(mut self, backend: Box<dyn UnitBackend>) -> Self {
        self.fallbacks.push(backend);
        self
    }
}

fn is_retryable(e: &WeftError) -> bool {
    match e {
        WeftError::Backend { message, .. } => {
            message.contains("429")
                || message.contains("500")
                || message.contains("502")
                || message.contains("503")
                || message.contains("timeout")
                || message.contains("connection")
        }
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, policy: &RetryPolicy) -> Duration {
    let ms = (policy.initial_backoff_ms * 2u64.pow(attempt)).min(policy.max_backoff_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl UnitBackend for RetryingBackend {
    fn invoke(&self, request: UnitRequest) -> BoxFuture<'_, Result<UnitReply>> {
        Box::pin(async move {
            let max_retries = self.policy.max_retries;

            // Try primary with retries
            let mut last_err = None;
            for attempt in 0..=max_retries {
                match self.primary.invoke(request.clone()).await {
                    Ok(reply) => return Ok(reply),
                    Err(e) => {
                        if is_retryable(&e) && attempt < max_retries {
                            let backoff = calculate_backoff(attempt, &self.policy);
                            warn!(
                                unit = %request.unit,
                                attempt = attempt + 1,
                                max_retries,
                                backoff_ms = backoff.as_millis() as u64,
                                error = %e,
                                "Retrying backend invocation"
                            );
                            tokio::time::sleep(backoff).await;
                            last_err = Some(e);
                            continue;
                        }
                        last_err = Some(e);
                        break;
                    }
                }
            }

            // Primary exhausted — try fallbacks
            if !self.fallbacks.is_empty() {
                info!(unit = %request.unit, "Primary backend exhausted, trying fallbacks");
            }
            for fallback in &self.fallbacks {
                match fallback.invoke(request.clone()).await {
                    Ok(reply) => {
                        info!(unit = %request.unit, "Fell back to alternative backend");
                        return Ok(reply);
                    }
                    Err(e) => {
                        warn!(unit = %request.unit, error = %e, "Fallback backend also failed");
                        last_err = Some(e);
                        continue;
                    }
                }
            }

            Err(last_err.unwrap_or_else(|| WeftError::Backend {
                unit: request.unit.clone(),
                message: "all backends failed".into(),
            }))
        })
    }
}
