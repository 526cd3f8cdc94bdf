use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{info, warn};

use swarm_core::retry::{with_retry, RetryConfig};
use swarm_core::types::Task;

use crate::env::{agent_id_for_task, worker_env, WorkerSecrets};
use crate::provider::{
    classify, ActiveJob, CompletionOutcome, CompletionStatus, ExecutionHandle, ExecutionProvider,
    ExecutionStatus, ProviderError, Result,
};
use crate::resources::tier_for_task;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RunStarted {
    run_id: String,
}

#[derive(Debug, Deserialize)]
struct RunInfo {
    status: String,
}

// ---------------------------------------------------------------------------
// JobsProvider
// ---------------------------------------------------------------------------

/// Execution provider that starts a pre-defined job template through its
/// management API. The jobs API has no blocking wait endpoint, so
/// completion is polled on an interval.
pub struct JobsProvider {
    client: reqwest::Client,
    api_url: String,
    template: String,
    token: String,
    poll_interval: Duration,
    retry: RetryConfig,
    active: Mutex<HashMap<String, ActiveJob>>,
}

impl JobsProvider {
    pub fn new(
        api_url: String,
        template: String,
        token: String,
        poll_interval_ms: u64,
        retry: RetryConfig,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            template,
            token,
            poll_interval: Duration::from_millis(poll_interval_ms.max(250)),
            retry,
            active: Mutex::new(HashMap::new()),
        }
    }

    fn runs_url(&self) -> String {
        format!("{}/job-templates/{}/runs", self.api_url, self.template)
    }

    async fn fetch_run(&self, run_id: &str) -> Result<RunInfo> {
        let url = format!("{}/{}", self.runs_url(), run_id);
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
        resp.json::<RunInfo>()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))
    }

    fn map_status(raw: &str) -> ExecutionStatus {
        match raw {
            "queued" | "scheduled" => ExecutionStatus::Pending,
            "running" | "starting" => ExecutionStatus::Running,
            "succeeded" | "completed" => ExecutionStatus::Completed,
            _ => ExecutionStatus::Failed,
        }
    }
}

#[async_trait::async_trait]
impl ExecutionProvider for JobsProvider {
    async fn execute_task(&self, task: &Task) -> Result<ExecutionHandle> {
        let agent_id = agent_id_for_task(task.id);
        let secrets = WorkerSecrets::from_env()?;
        let env: HashMap<String, String> =
            worker_env(task, &agent_id, &secrets)?.into_iter().collect();
        let tier = tier_for_task(task);

        let body = json!({
            "env": env,
            "resources": {
                "cpus": tier.cpus(),
                "memory_mb": tier.memory_mb(),
            },
            "labels": { "task_id": task.id.to_string() },
        });

        let url = self.runs_url();
        let started: RunStarted = with_retry(&self.retry, "job start", classify, || {
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
                resp.json::<RunStarted>()
                    .await
                    .map_err(|e| ProviderError::Parse(e.to_string()))
            }
        })
        .await?;

        info!(
            task_id = %task.id,
            run_id = %started.run_id,
            agent_id = %agent_id,
            "job run started"
        );

        self.active.lock().await.insert(
            started.run_id.clone(),
            ActiveJob {
                execution_id: started.run_id.clone(),
                task_id: task.id,
                started_at: Utc::now(),
            },
        );

        Ok(ExecutionHandle {
            execution_id: started.run_id,
            agent_id,
        })
    }

    async fn get_execution_status(&self, execution_id: &str) -> Result<ExecutionStatus> {
        match self.fetch_run(execution_id).await {
            Ok(info) => Ok(Self::map_status(&info.status)),
            Err(ProviderError::Api { status: Some(404), .. }) => Ok(ExecutionStatus::Completed),
            Err(e) => {
                warn!(run_id = execution_id, error = %e, "status probe failed");
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
            let probe = with_retry(&self.retry, "job poll", classify, || async {
                self.fetch_run(execution_id).await
            })
            .await;

            let status = match probe {
                Ok(info) => Self::map_status(&info.status),
                Err(ProviderError::Api { status: Some(404), .. }) => ExecutionStatus::Completed,
                Err(e) => {
                    warn!(run_id = execution_id, error = %e, "poll failed");
                    self.active.lock().await.remove(execution_id);
                    return Ok(CompletionOutcome {
                        status: CompletionStatus::Failed,
                        result: None,
                    });
                }
            };

            match status {
                ExecutionStatus::Completed => {
                    self.active.lock().await.remove(execution_id);
                    return Ok(CompletionOutcome {
                        status: CompletionStatus::Completed,
                        result: None,
                    });
                }
                ExecutionStatus::Failed => {
                    self.active.lock().await.remove(execution_id);
                    return Ok(CompletionOutcome {
                        status: CompletionStatus::Failed,
                        result: None,
                    });
                }
                ExecutionStatus::Pending | ExecutionStatus::Running => {}
            }

            if Instant::now() + self.poll_interval >= deadline {
                warn!(run_id = execution_id, timeout_ms, "wait deadline reached");
                return Ok(CompletionOutcome {
                    status: CompletionStatus::Timeout,
                    result: None,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn cancel_execution(&self, execution_id: &str) -> Result<()> {
        let url = format!("{}/{}/cancel", self.runs_url(), execution_id);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .timeout(Duration::from_secs(15))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() && status.as_u16() != 404 {
            let message = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: Some(status.as_u16()),
                message,
            });
        }

        self.active.lock().await.remove(execution_id);
        Ok(())
    }

    async fn active_job_count(&self) -> usize {
        self.active.lock().await.len()
    }

    async fn active_jobs(&self) -> Vec<ActiveJob> {
        self.active.lock().await.values().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_statuses_map_to_execution_statuses() {
        assert_eq!(JobsProvider::map_status("queued"), ExecutionStatus::Pending);
        assert_eq!(
            JobsProvider::map_status("scheduled"),
            ExecutionStatus::Pending
        );
        assert_eq!(JobsProvider::map_status("running"), ExecutionStatus::Running);
        assert_eq!(
            JobsProvider::map_status("succeeded"),
            ExecutionStatus::Completed
        );
        // Anything unrecognised reads as failed, never as running.
        assert_eq!(JobsProvider::map_status("errored"), ExecutionStatus::Failed);
        assert_eq!(JobsProvider::map_status("cancelled"), ExecutionStatus::Failed);
    }
}
