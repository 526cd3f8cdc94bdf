use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use swarm_core::types::{
    FileAction, FileChange, ResultStatus, Task, TaskResult, TaskType, TokenUsage,
};

use crate::env::agent_id_for_task;
use crate::provider::{
    ActiveJob, CompletionOutcome, CompletionStatus, ExecutionHandle, ExecutionProvider,
    ExecutionStatus, Result,
};

// ---------------------------------------------------------------------------
// MockProvider
// ---------------------------------------------------------------------------

struct SimulatedRun {
    task: Task,
    agent_id: String,
    started_at: chrono::DateTime<Utc>,
    completes_at: Instant,
}

/// Simulate mode: no remote calls. Each execution records a pre-computed
/// completion instant by task type and reports `completed` once it
/// elapses.
pub struct MockProvider {
    runs: Mutex<HashMap<String, SimulatedRun>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            runs: Mutex::new(HashMap::new()),
        }
    }

    fn duration_for(task_type: TaskType) -> Duration {
        match task_type {
            TaskType::Doc => Duration::from_secs(2),
            TaskType::Test => Duration::from_secs(5),
            TaskType::Security => Duration::from_secs(8),
            _ => Duration::from_secs(3),
        }
    }

    fn synthesize_result(run: &SimulatedRun, duration: Duration) -> TaskResult {
        let outputs = run
            .task
            .context
            .files
            .iter()
            .map(|path| FileChange {
                path: path.clone(),
                action: FileAction::Modify,
            })
            .collect();

        TaskResult {
            task_id: run.task.id,
            agent_id: run.agent_id.clone(),
            status: ResultStatus::Success,
            outputs,
            summary: Some(format!(
                "simulated {} run for branch {}",
                run.task.task_type.label(),
                run.task.context.branch
            )),
            reports: None,
            usage: TokenUsage {
                input_tokens: 2_400,
                output_tokens: 900,
                cached_tokens: 0,
            },
            duration_ms: duration.as_millis() as u64,
            cost_cents: 10,
            base_commit: run.task.context.base_commit.clone(),
            result_commit: None,
            conflicts: None,
            error: None,
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ExecutionProvider for MockProvider {
    async fn execute_task(&self, task: &Task) -> Result<ExecutionHandle> {
        let agent_id = agent_id_for_task(task.id);
        let execution_id = format!("sim-{}", task.id);
        let duration = Self::duration_for(task.task_type);

        info!(
            task_id = %task.id,
            agent_id = %agent_id,
            sim_ms = duration.as_millis() as u64,
            "simulated execution started"
        );

        self.runs.lock().await.insert(
            execution_id.clone(),
            SimulatedRun {
                task: task.clone(),
                agent_id: agent_id.clone(),
                started_at: Utc::now(),
                completes_at: Instant::now() + duration,
            },
        );

        Ok(ExecutionHandle {
            execution_id,
            agent_id,
        })
    }

    async fn get_execution_status(&self, execution_id: &str) -> Result<ExecutionStatus> {
        let runs = self.runs.lock().await;
        match runs.get(execution_id) {
            Some(run) if Instant::now() < run.completes_at => Ok(ExecutionStatus::Running),
            // Elapsed or unknown both read as completed — mirrors the
            // 404-means-cleaned-up semantics of the real providers.
            _ => Ok(ExecutionStatus::Completed),
        }
    }

    async fn wait_for_completion(
        &self,
        execution_id: &str,
        timeout_ms: u64,
    ) -> Result<CompletionOutcome> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let completes_at = {
            let runs = self.runs.lock().await;
            match runs.get(execution_id) {
                Some(run) => run.completes_at,
                None => {
                    return Ok(CompletionOutcome {
                        status: CompletionStatus::Completed,
                        result: None,
                    })
                }
            }
        };

        if completes_at > deadline {
            tokio::time::sleep_until(deadline).await;
            debug!(execution_id, timeout_ms, "simulated execution timed out");
            return Ok(CompletionOutcome {
                status: CompletionStatus::Timeout,
                result: None,
            });
        }

        tokio::time::sleep_until(completes_at).await;

        let mut runs = self.runs.lock().await;
        let outcome = match runs.remove(execution_id) {
            Some(run) => {
                let duration = Self::duration_for(run.task.task_type);
                CompletionOutcome {
                    status: CompletionStatus::Completed,
                    result: Some(Self::synthesize_result(&run, duration)),
                }
            }
            None => CompletionOutcome {
                status: CompletionStatus::Completed,
                result: None,
            },
        };
        Ok(outcome)
    }

    async fn cancel_execution(&self, execution_id: &str) -> Result<()> {
        self.runs.lock().await.remove(execution_id);
        Ok(())
    }

    async fn active_job_count(&self) -> usize {
        self.runs.lock().await.len()
    }

    async fn active_jobs(&self) -> Vec<ActiveJob> {
        self.runs
            .lock()
            .await
            .iter()
            .map(|(id, run)| ActiveJob {
                execution_id: id.clone(),
                task_id: run.task.id,
                started_at: run.started_at,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_core::types::TaskContext;

    fn doc_task() -> Task {
        let mut context = TaskContext::for_branch("main");
        context.files = vec!["README.md".into()];
        Task::new(TaskType::Doc, "write docs", context)
    }

    #[tokio::test(start_paused = true)]
    async fn doc_task_completes_in_two_simulated_seconds() {
        let provider = MockProvider::new();
        let task = doc_task();
        let handle = provider.execute_task(&task).await.unwrap();

        assert_eq!(provider.active_job_count().await, 1);
        assert_eq!(
            provider
                .get_execution_status(&handle.execution_id)
                .await
                .unwrap(),
            ExecutionStatus::Running
        );

        let start = Instant::now();
        let outcome = provider
            .wait_for_completion(&handle.execution_id, 60_000)
            .await
            .unwrap();
        let elapsed = start.elapsed();

        assert_eq!(outcome.status, CompletionStatus::Completed);
        assert!(
            (Duration::from_millis(1_800)..=Duration::from_millis(2_200)).contains(&elapsed),
            "doc simulation took {elapsed:?}"
        );
        assert_eq!(provider.active_job_count().await, 0);

        let result = outcome.result.unwrap();
        assert_eq!(result.task_id, task.id);
        assert_eq!(result.status, ResultStatus::Success);
        assert_eq!(result.outputs.len(), 1);
        assert_eq!(result.outputs[0].action, FileAction::Modify);
    }

    #[tokio::test(start_paused = true)]
    async fn security_takes_longest() {
        let provider = MockProvider::new();
        let task = Task::new(
            TaskType::Security,
            "audit",
            TaskContext::for_branch("main"),
        );
        let handle = provider.execute_task(&task).await.unwrap();

        let start = Instant::now();
        let outcome = provider
            .wait_for_completion(&handle.execution_id, 60_000)
            .await
            .unwrap();
        assert_eq!(outcome.status, CompletionStatus::Completed);
        assert!(start.elapsed() >= Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn short_deadline_times_out() {
        let provider = MockProvider::new();
        let task = Task::new(TaskType::Test, "run tests", TaskContext::for_branch("main"));
        let handle = provider.execute_task(&task).await.unwrap();

        let outcome = provider
            .wait_for_completion(&handle.execution_id, 1_000)
            .await
            .unwrap();
        assert_eq!(outcome.status, CompletionStatus::Timeout);
    }

    #[tokio::test]
    async fn unknown_execution_reads_completed() {
        let provider = MockProvider::new();
        assert_eq!(
            provider.get_execution_status("sim-gone").await.unwrap(),
            ExecutionStatus::Completed
        );
        let outcome = provider.wait_for_completion("sim-gone", 1_000).await.unwrap();
        assert_eq!(outcome.status, CompletionStatus::Completed);
        assert!(outcome.result.is_none());
    }

    #[tokio::test]
    async fn cancel_clears_the_run() {
        let provider = MockProvider::new();
        let task = doc_task();
        let handle = provider.execute_task(&task).await.unwrap();

        provider.cancel_execution(&handle.execution_id).await.unwrap();
        assert_eq!(provider.active_job_count().await, 0);
    }
}
