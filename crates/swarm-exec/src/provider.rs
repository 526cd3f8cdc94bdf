use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use swarm_core::config::ProviderConfig;
use swarm_core::retry::{RetryClass, RetryConfig};
use swarm_core::types::{Task, TaskResult};

use crate::jobs::JobsProvider;
use crate::machines::MachinesProvider;
use crate::mock::MockProvider;

/// Default wait deadline when the task carries no timeout (30 minutes).
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 1_800_000;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The remote API answered with a non-success status.
    #[error("provider API error (status {status:?}): {message}")]
    Api { status: Option<u16>, message: String },
    /// The request deadline elapsed before a response arrived.
    #[error("provider request timed out: {0}")]
    Timeout(String),
    /// TCP/TLS connect failure (refused, unreachable, DNS).
    #[error("provider connect failure: {0}")]
    Connect(String),
    /// Any other transport-level failure (reset mid-body, etc.).
    #[error("provider transport error: {0}")]
    Transport(String),
    #[error("missing provider token — set {0}")]
    MissingToken(String),
    #[error("malformed provider response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout(e.to_string())
        } else if e.is_connect() {
            ProviderError::Connect(e.to_string())
        } else if let Some(status) = e.status() {
            ProviderError::Api {
                status: Some(status.as_u16()),
                message: e.to_string(),
            }
        } else {
            ProviderError::Transport(e.to_string())
        }
    }
}

/// Classify a provider error for the retry loop. Only infrastructure
/// failures are retryable; API 4xx (other than 429 and the provider's
/// "busy" 409) never are.
pub fn classify(error: &ProviderError) -> RetryClass {
    match error {
        ProviderError::Api { status: Some(429), .. } => RetryClass::RateLimited,
        ProviderError::Api { status: Some(s), .. } if *s >= 500 => RetryClass::Upstream5xx,
        ProviderError::Api { status: Some(409), .. } => RetryClass::ProviderBusy,
        ProviderError::Timeout(_) => RetryClass::Timeout,
        ProviderError::Connect(_) => RetryClass::ConnRefused,
        ProviderError::Transport(_) => RetryClass::ConnReset,
        _ => RetryClass::NonRetryable,
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

// ---------------------------------------------------------------------------
// Execution types
// ---------------------------------------------------------------------------

/// Handle returned by `execute_task`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionHandle {
    pub execution_id: String,
    pub agent_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Completed,
    Failed,
    Timeout,
}

/// Outcome of `wait_for_completion`. The result payload is present when
/// the worker emitted a parseable structured result.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub status: CompletionStatus,
    pub result: Option<TaskResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveJob {
    pub execution_id: String,
    pub task_id: Uuid,
    pub started_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ExecutionProvider
// ---------------------------------------------------------------------------

/// Contract every execution backend fulfils.
///
/// Semantics the scheduler relies on:
/// - a 404 for a known execution means "completed and cleaned up", never
///   a failure;
/// - `wait_for_completion` retries transient API errors internally and
///   honours the caller-supplied deadline;
/// - `cancel_execution` is best-effort.
#[async_trait]
pub trait ExecutionProvider: Send + Sync {
    /// Launch a worker for the task. Returns the execution handle.
    async fn execute_task(&self, task: &Task) -> Result<ExecutionHandle>;

    /// Point-in-time status. Absent resources report `Completed`; any
    /// other API error reports `Failed` rather than surfacing.
    async fn get_execution_status(&self, execution_id: &str) -> Result<ExecutionStatus>;

    /// Block until the execution finishes or `timeout_ms` elapses.
    async fn wait_for_completion(
        &self,
        execution_id: &str,
        timeout_ms: u64,
    ) -> Result<CompletionOutcome>;

    /// Best-effort stop. A 404 is non-fatal.
    async fn cancel_execution(&self, execution_id: &str) -> Result<()>;

    async fn active_job_count(&self) -> usize;

    async fn active_jobs(&self) -> Vec<ActiveJob>;
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Build the configured provider. Called exactly once at process start;
/// the selection never changes at runtime.
pub fn build_provider(
    config: &ProviderConfig,
    retry: RetryConfig,
) -> Result<Arc<dyn ExecutionProvider>> {
    match config {
        ProviderConfig::Machines {
            api_url,
            app_name,
            api_token_env,
        } => {
            let token = std::env::var(api_token_env)
                .ok()
                .filter(|t| !t.is_empty())
                .ok_or_else(|| ProviderError::MissingToken(api_token_env.clone()))?;
            Ok(Arc::new(MachinesProvider::new(
                api_url.clone(),
                app_name.clone(),
                token,
                retry,
            )))
        }
        ProviderConfig::Jobs {
            api_url,
            template,
            api_token_env,
            poll_interval_ms,
        } => {
            let token = std::env::var(api_token_env)
                .ok()
                .filter(|t| !t.is_empty())
                .ok_or_else(|| ProviderError::MissingToken(api_token_env.clone()))?;
            Ok(Arc::new(JobsProvider::new(
                api_url.clone(),
                template.clone(),
                token,
                *poll_interval_ms,
                retry,
            )))
        }
        ProviderConfig::Mock => Ok(Arc::new(MockProvider::new())),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_is_retryable() {
        let err = ProviderError::Api {
            status: Some(429),
            message: "rate limited".into(),
        };
        assert_eq!(classify(&err), RetryClass::RateLimited);
        assert!(classify(&err).is_retryable());
    }

    #[test]
    fn upstream_5xx_is_retryable() {
        let err = ProviderError::Api {
            status: Some(502),
            message: "bad gateway".into(),
        };
        assert_eq!(classify(&err), RetryClass::Upstream5xx);
    }

    #[test]
    fn client_errors_are_not_retried() {
        let err = ProviderError::Api {
            status: Some(400),
            message: "invalid machine config".into(),
        };
        assert_eq!(classify(&err), RetryClass::NonRetryable);

        let err = ProviderError::Parse("truncated body".into());
        assert_eq!(classify(&err), RetryClass::NonRetryable);
    }

    #[test]
    fn transport_errors_map_to_kinds() {
        assert_eq!(
            classify(&ProviderError::Connect("connection refused".into())),
            RetryClass::ConnRefused
        );
        assert_eq!(
            classify(&ProviderError::Transport("connection reset by peer".into())),
            RetryClass::ConnReset
        );
        assert_eq!(
            classify(&ProviderError::Timeout("deadline elapsed".into())),
            RetryClass::Timeout
        );
        assert_eq!(
            classify(&ProviderError::Api {
                status: Some(409),
                message: "machine busy".into()
            }),
            RetryClass::ProviderBusy
        );
    }

    #[test]
    fn mock_provider_needs_no_token() {
        let provider = build_provider(&ProviderConfig::Mock, RetryConfig::default());
        assert!(provider.is_ok());
    }
}
