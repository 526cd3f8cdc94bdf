use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use swarm_core::retry::{with_retry, RetryConfig};
use swarm_core::types::Task;

use crate::env::{agent_id_for_task, worker_env, WorkerSecrets};
use crate::provider::{
    classify, ActiveJob, CompletionOutcome, CompletionStatus, ExecutionHandle, ExecutionProvider,
    ExecutionStatus, ProviderError, Result,
};
use crate::resources::tier_for_task;

/// Upper bound for one blocking-wait call; the loop re-issues until the
/// task deadline.
const WAIT_SLICE_SECS: u64 = 60;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MachineCreated {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MachineInfo {
    state: String,
}

// ---------------------------------------------------------------------------
// MachinesProvider
// ---------------------------------------------------------------------------

/// Execution provider backed by a remote machine-lifecycle REST API:
/// POST to create, GET for status, blocking `wait` GET for completion,
/// POST to stop.
pub struct MachinesProvider {
    client: reqwest::Client,
    api_url: String,
    app_name: String,
    token: String,
    retry: RetryConfig,
    active: Mutex<HashMap<String, ActiveJob>>,
}

impl MachinesProvider {
    pub fn new(api_url: String, app_name: String, token: String, retry: RetryConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            app_name,
            token,
            retry,
            active: Mutex::new(HashMap::new()),
        }
    }

    fn machines_url(&self) -> String {
        format!("{}/apps/{}/machines", self.api_url, self.app_name)
    }

    async fn get_machine(&self, machine_id: &str) -> Result<MachineInfo> {
        let url = format!("{}/{}", self.machines_url(), machine_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .timeout(Duration::from_secs(15))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: Some(status.as_u16()),
                message,
            });
        }
        resp.json::<MachineInfo>()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))
    }

    async fn forget(&self, execution_id: &str) {
        self.active.lock().await.remove(execution_id);
    }
}

#[async_trait::async_trait]
impl ExecutionProvider for MachinesProvider {
    async fn execute_task(&self, task: &Task) -> Result<ExecutionHandle> {
        let agent_id = agent_id_for_task(task.id);
        let secrets = WorkerSecrets::from_env()?;
        let env: HashMap<String, String> =
            worker_env(task, &agent_id, &secrets)?.into_iter().collect();
        let tier = tier_for_task(task);

        let body = json!({
            "name": agent_id,
            "config": {
                "env": env,
                "guest": {
                    "cpus": tier.cpus(),
                    "memory_mb": tier.memory_mb(),
                },
                "auto_destroy": true,
                "metadata": { "task_id": task.id.to_string() },
            },
        });

        let url = self.machines_url();
        let created: MachineCreated = with_retry(&self.retry, "machine create", classify, || {
            let body = body.clone();
            let url = url.clone();
            async move {
                let resp = self
                    .client
                    .post(&url)
                    .bearer_auth(&self.token)
                    .json(&body)
                    .timeout(Duration::from_secs(30))
                    .send()
                    .await?;
                let status = resp.status();
                if !status.is_success() {
                    let message = resp.text().await.unwrap_or_default();
                    return Err(ProviderError::Api {
                        status: Some(status.as_u16()),
                        message,
                    });
                }
                resp.json::<MachineCreated>()
                    .await
                    .map_err(|e| ProviderError::Parse(e.to_string()))
            }
        })
        .await?;

        info!(
            task_id = %task.id,
            machine_id = %created.id,
            agent_id = %agent_id,
            tier = ?tier,
            "worker machine created"
        );

        self.active.lock().await.insert(
            created.id.clone(),
            ActiveJob {
                execution_id: created.id.clone(),
                task_id: task.id,
                started_at: Utc::now(),
            },
        );

        Ok(ExecutionHandle {
            execution_id: created.id,
            agent_id,
        })
    }

    async fn get_execution_status(&self, execution_id: &str) -> Result<ExecutionStatus> {
        match self.get_machine(execution_id).await {
            Ok(info) => Ok(match info.state.as_str() {
                "created" | "starting" => ExecutionStatus::Pending,
                "started" => ExecutionStatus::Running,
                "stopping" | "stopped" | "destroyed" => ExecutionStatus::Completed,
                "failed" => ExecutionStatus::Failed,
                other => {
                    debug!(machine_id = execution_id, state = other, "unknown machine state");
                    ExecutionStatus::Running
                }
            }),
            // Resource gone: the machine finished and was cleaned up.
            Err(ProviderError::Api { status: Some(404), .. }) => Ok(ExecutionStatus::Completed),
            Err(e) => {
                warn!(machine_id = execution_id, error = %e, "status probe failed");
                Ok(ExecutionStatus::Failed)
            }
        }
    }

    async fn wait_for_completion(
        &self,
        execution_id: &str,
        timeout_ms: u64,
    ) -> Result<CompletionOutcome> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);

        loop {
            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(d) if !d.is_zero() => d,
                _ => {
                    warn!(machine_id = execution_id, timeout_ms, "wait deadline reached");
                    return Ok(CompletionOutcome {
                        status: CompletionStatus::Timeout,
                        result: None,
                    });
                }
            };

            let slice_secs = remaining.as_secs().clamp(1, WAIT_SLICE_SECS);
            let url = format!(
                "{}/{}/wait?state=stopped&timeout={}",
                self.machines_url(),
                execution_id,
                slice_secs
            );

            let outcome = with_retry(&self.retry, "machine wait", classify, || {
                let url = url.clone();
                async move {
                    let resp = self
                        .client
                        .get(&url)
                        .bearer_auth(&self.token)
                        .timeout(Duration::from_secs(slice_secs + 10))
                        .send()
                        .await?;
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(Some(CompletionStatus::Completed));
                    }
                    // The wait endpoint answers 408 when the slice elapsed
                    // without reaching the target state.
                    if status.as_u16() == 408 {
                        return Ok(None);
                    }
                    if status.as_u16() == 404 {
                        return Ok(Some(CompletionStatus::Completed));
                    }
                    let message = resp.text().await.unwrap_or_default();
                    Err(ProviderError::Api {
                        status: Some(status.as_u16()),
                        message,
                    })
                }
            })
            .await;

            match outcome {
                Ok(Some(status)) => {
                    self.forget(execution_id).await;
                    return Ok(CompletionOutcome {
                        status,
                        result: None,
                    });
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!(machine_id = execution_id, error = %e, "wait failed");
                    self.forget(execution_id).await;
                    return Ok(CompletionOutcome {
                        status: CompletionStatus::Failed,
                        result: None,
                    });
                }
            }
        }
    }

    async fn cancel_execution(&self, execution_id: &str) -> Result<()> {
        let url = format!("{}/{}/stop", self.machines_url(), execution_id);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .timeout(Duration::from_secs(15))
            .send()
            .await?;

        let status = resp.status();
        // Already gone is fine for a best-effort stop.
        if !status.is_success() && status.as_u16() != 404 {
            let message = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: Some(status.as_u16()),
                message,
            });
        }

        self.forget(execution_id).await;
        Ok(())
    }

    async fn active_job_count(&self) -> usize {
        self.active.lock().await.len()
    }

    async fn active_jobs(&self) -> Vec<ActiveJob> {
        self.active.lock().await.values().cloned().collect()
    }
}
