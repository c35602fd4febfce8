//! Task runner - one backend call with retries, backoff, and failover

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::budget::{estimate_tokens, ESTIMATED_COMPLETION_TOKENS};
use crate::error::{TaskError, TransientKind};
use crate::model::{ModelDescriptor, ModelRegistry};
use crate::types::TokenUsage;

/// Options for one backend invocation
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    pub backend: String,
    pub max_output_tokens: Option<u64>,
}

/// One backend's answer plus its token accounting
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub text: String,
    pub usage: TokenUsage,
}

/// External collaborator that talks to an actual provider
///
/// The orchestrator only requires this shape; HTTP vs SDK vs subprocess is
/// the collaborator's business.
#[async_trait]
pub trait BackendClient: Send + Sync {
    async fn invoke(
        &self,
        prompt: &str,
        opts: &InvokeOptions,
        cancel: &CancellationToken,
    ) -> Result<BackendResponse, TaskError>;
}

/// Retry policy for transient failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first (>= 1)
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Un-jittered backoff before retrying after `attempt` (1-indexed)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let millis =
            self.initial_delay.as_millis() as f64 * self.factor.powi(attempt as i32 - 1);
        Duration::from_millis((millis as u64).min(self.max_delay.as_millis() as u64))
    }

    /// Perturb a delay by up to +25% so concurrently failing workers do not
    /// retry in lockstep
    pub fn jittered(&self, delay: Duration) -> Duration {
        let multiplier = 1.0 + rand::thread_rng().gen::<f64>() * 0.25;
        Duration::from_millis((delay.as_millis() as f64 * multiplier) as u64)
    }
}

impl Default for RetryPolicy {
    /// Default: 3 attempts, 500ms initial backoff, 2x factor, 30s cap
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Executes one call to one backend with bounded retries and a single-hop
/// provider failover
pub struct TaskRunner {
    client: Arc<dyn BackendClient>,
    policy: RetryPolicy,
    registry: Arc<ModelRegistry>,
}

impl TaskRunner {
    pub fn new(
        client: Arc<dyn BackendClient>,
        policy: RetryPolicy,
        registry: Arc<ModelRegistry>,
    ) -> Self {
        Self {
            client,
            policy,
            registry,
        }
    }

    /// Run one prompt against one backend
    ///
    /// Retries classified-transient failures up to the policy's attempt
    /// ceiling. A transient *network* failure that survives all retries
    /// triggers at most one attempt on an available backend from another
    /// provider family whose token limit fits the prompt.
    pub async fn run(
        &self,
        prompt: &str,
        backend: &ModelDescriptor,
        cancel: &CancellationToken,
    ) -> Result<BackendResponse, TaskError> {
        match self.run_with_retries(prompt, backend, cancel).await {
            Err(TaskError::Transient {
                kind: TransientKind::Network,
                detail,
            }) => self.try_failover(prompt, backend, cancel, detail).await,
            other => other,
        }
    }

    async fn run_with_retries(
        &self,
        prompt: &str,
        backend: &ModelDescriptor,
        cancel: &CancellationToken,
    ) -> Result<BackendResponse, TaskError> {
        let opts = InvokeOptions {
            backend: backend.name.clone(),
            max_output_tokens: None,
        };

        let mut attempt = 1;
        loop {
            // An already-fired token fails fast without consuming an attempt
            if cancel.is_cancelled() {
                return Err(TaskError::Aborted);
            }

            match self.client.invoke(prompt, &opts, cancel).await {
                Ok(response) => return Ok(response),
                Err(err @ TaskError::Fatal { .. }) => return Err(err),
                Err(TaskError::Aborted) => return Err(TaskError::Aborted),
                Err(err @ TaskError::Transient { .. }) => {
                    if attempt >= self.policy.max_attempts {
                        warn!(
                            backend = %backend.name,
                            attempts = attempt,
                            "Retry budget exhausted"
                        );
                        return Err(err);
                    }

                    let delay = match &err {
                        TaskError::Transient {
                            kind:
                                TransientKind::RateLimited {
                                    retry_after: Some(hint),
                                },
                            ..
                        } => *hint,
                        _ => self.policy.jittered(self.policy.delay_for(attempt)),
                    };

                    debug!(
                        backend = %backend.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transient failure, backing off"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(TaskError::Aborted),
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// One fallback attempt on an alternate provider family. Single hop:
    /// a failure here is final.
    async fn try_failover(
        &self,
        prompt: &str,
        failed: &ModelDescriptor,
        cancel: &CancellationToken,
        original_detail: String,
    ) -> Result<BackendResponse, TaskError> {
        if cancel.is_cancelled() {
            return Err(TaskError::Aborted);
        }

        let needed = estimate_tokens(prompt) + ESTIMATED_COMPLETION_TOKENS;
        let alternate = self
            .registry
            .failover_candidates(failed.family)
            .into_iter()
            .find(|m| m.token_limit >= needed);

        let Some(alternate) = alternate else {
            return Err(TaskError::network(original_detail));
        };

        warn!(
            failed = %failed.name,
            alternate = %alternate.name,
            "Network failure, attempting provider failover"
        );

        let opts = InvokeOptions {
            backend: alternate.name.clone(),
            max_output_tokens: None,
        };
        match self.client.invoke(prompt, &opts, cancel).await {
            Ok(response) => Ok(response),
            Err(TaskError::Aborted) => Err(TaskError::Aborted),
            Err(_) => Err(TaskError::network(format!(
                "{original_detail}; failover to {} also failed",
                alternate.name
            ))),
        }
    }
}
