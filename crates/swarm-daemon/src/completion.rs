//! Completion monitoring.
//!
//! This deployment polls the execution provider (`wait_for_completion`)
//! and synthesises the result record when the worker did not emit a
//! parseable one. Folding a result in is the five-part completion:
//! status flip, scoring update, conflict release, budget debit,
//! broadcast — applied back-to-back so observers see all or none.

use std::sync::Arc;

use serde_json::json;
use tracing::{error, info, warn};

use swarm_bridge::{Notification, NotificationKind};
use swarm_core::types::{ResultStatus, Task, TaskResult, TokenUsage};
use swarm_exec::CompletionStatus;

use crate::server::state::ApiState;

/// Block on the provider until the execution finishes, then finalize.
pub async fn await_and_finalize(
    state: Arc<ApiState>,
    task: Task,
    execution_id: String,
    agent_id: String,
) {
    let started = std::time::Instant::now();
    let outcome = state
        .provider
        .wait_for_completion(&execution_id, task.timeout_ms())
        .await;

    let mut result = match outcome {
        Ok(outcome) => match (outcome.status, outcome.result) {
            (_, Some(result)) => result,
            (CompletionStatus::Completed, None) => synthesize(
                &task,
                &agent_id,
                ResultStatus::Success,
                started.elapsed().as_millis() as u64,
                None,
            ),
            (CompletionStatus::Failed, None) => synthesize(
                &task,
                &agent_id,
                ResultStatus::Failed,
                started.elapsed().as_millis() as u64,
                Some("provider reported execution failure".into()),
            ),
            (CompletionStatus::Timeout, None) => {
                // Best-effort teardown of the stuck worker.
                if let Err(e) = state.provider.cancel_execution(&execution_id).await {
                    warn!(execution_id = %execution_id, error = %e, "cancel after timeout failed");
                }
                synthesize(
                    &task,
                    &agent_id,
                    ResultStatus::Failed,
                    task.timeout_ms(),
                    Some(format!("execution timed out after {} ms", task.timeout_ms())),
                )
            }
        },
        Err(e) => {
            error!(execution_id = %execution_id, error = %e, "wait_for_completion failed");
            synthesize(
                &task,
                &agent_id,
                ResultStatus::Failed,
                started.elapsed().as_millis() as u64,
                Some(e.to_string()),
            )
        }
    };

    // The record of truth for who ran this is the orchestrator's agent
    // id, whatever identity the provider minted internally.
    result.agent_id = agent_id;

    if let Err(e) = finalize_result(&state, &result).await {
        error!(task_id = %result.task_id, error = %e, "completion handling failed");
    }
    state.wake_scheduler();
}

/// Fold a finished result into the system.
pub async fn finalize_result(state: &Arc<ApiState>, result: &TaskResult) -> anyhow::Result<()> {
    let task = state
        .store
        .get_task(result.task_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("result for unknown task {}", result.task_id))?;

    // 1. Store writes: result, task status, agent record.
    state.topology.on_task_complete(result).await?;

    // 2. Scoring update.
    state
        .scores
        .record_result(
            &result.agent_id,
            task.task_type,
            result.is_success(),
            result.duration_ms,
            result.cost_cents,
        )
        .await;

    // 3. Conflict release.
    state.conflict.release_agent_locks(&result.agent_id);

    // 4. Budget debit.
    state.budget.record_result(result).await?;

    // 5. Broadcast.
    let kind = if result.is_success() || result.status == ResultStatus::Partial {
        NotificationKind::TaskCompleted
    } else {
        NotificationKind::TaskFailed
    };
    state.bus.publish(Notification::new(
        kind,
        json!({
            "taskId": result.task_id.to_string(),
            "agentId": &result.agent_id,
            "status": result.status,
            "costCents": result.cost_cents,
            "durationMs": result.duration_ms,
            "error": &result.error,
        }),
    ));
    state.bus.publish(Notification::new(
        NotificationKind::AgentTerminated,
        json!({ "agentId": &result.agent_id }),
    ));

    info!(
        task_id = %result.task_id,
        agent_id = %result.agent_id,
        status = ?result.status,
        cost_cents = result.cost_cents,
        "task finalized"
    );
    Ok(())
}

/// Newly-ready dependents of a just-completed task.
pub async fn newly_ready_after(
    state: &Arc<ApiState>,
    task_id: uuid::Uuid,
) -> anyhow::Result<Vec<Task>> {
    use swarm_core::types::TaskStatus;

    let graph = state.scheduler.graph();
    let mut ready = Vec::new();
    for dependent in graph.get_dependents(task_id).await? {
        let Some(task) = state.store.get_task(dependent).await? else {
            continue;
        };
        if task.status == TaskStatus::Pending && graph.deps_completed(dependent).await? {
            ready.push(task);
        }
    }
    Ok(ready)
}

fn synthesize(
    task: &Task,
    agent_id: &str,
    status: ResultStatus,
    duration_ms: u64,
    error: Option<String>,
) -> TaskResult {
    TaskResult {
        task_id: task.id,
        agent_id: agent_id.to_string(),
        status,
        outputs: vec![],
        summary: None,
        reports: None,
        usage: TokenUsage::default(),
        duration_ms,
        cost_cents: 0,
        base_commit: task.context.base_commit.clone(),
        result_commit: None,
        conflicts: None,
        error,
    }
}
