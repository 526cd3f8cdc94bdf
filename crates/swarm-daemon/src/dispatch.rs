use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use swarm_bridge::{Notification, NotificationKind};
use swarm_core::types::{Agent, AgentStatus, ModelChoice, Task, TaskStatus};
use swarm_exec::env::agent_id_for_task;

use crate::completion;
use crate::server::state::ApiState;

/// Outcome of trying to put one task on a worker.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Worker launched; carries the agent id now responsible.
    Launched(String),
    /// Not launched this pass (conflict gate, provider refusal).
    Deferred(String),
}

/// Launch a worker for `task` and hand it to the completion monitor.
///
/// `preferred_agent` and `routed_model` come from the router when the
/// scheduler produced an assignment; when absent a fresh worker
/// identity is derived from the task id and the model is resolved
/// through the router's spawn-new rules. The resolved model is written
/// onto the task before the provider serialises it, so the worker is
/// launched with exactly the model the routing decided.
/// A failure for one task never stalls the scheduling pass — it is
/// reported as a deferral and retried on a later tick.
pub async fn dispatch_task(
    state: Arc<ApiState>,
    mut task: Task,
    preferred_agent: Option<String>,
    routed_model: Option<ModelChoice>,
) -> DispatchOutcome {
    let model = match routed_model.or(task.model) {
        Some(model) => model,
        None => state.scheduler.route_task(&task, &[]).await.model,
    };
    task.model = Some(model);

    let candidate = preferred_agent
        .clone()
        .unwrap_or_else(|| agent_id_for_task(task.id));

    // Conflict gate: refuse to double-book files another agent holds.
    let gate = state.conflict.check_task_assignment(&task, &candidate);
    if !gate.safe {
        let reason = format!(
            "files locked by another agent: {}",
            gate.potential_conflicts.join(", ")
        );
        warn!(task_id = %task.id, reason = %reason, "dispatch deferred");
        return DispatchOutcome::Deferred(reason);
    }

    let handle = match state.provider.execute_task(&task).await {
        Ok(handle) => handle,
        Err(e) => {
            warn!(task_id = %task.id, error = %e, "provider refused the task");
            return DispatchOutcome::Deferred(format!("provider error: {e}"));
        }
    };

    let agent_id = preferred_agent.unwrap_or_else(|| handle.agent_id.clone());
    let is_new_agent = match state.store.get_agent(&agent_id).await {
        Ok(existing) => existing.is_none(),
        Err(e) => {
            warn!(agent_id = %agent_id, error = %e, "agent lookup failed, treating as new");
            true
        }
    };

    let mut agent = if is_new_agent {
        Agent::new(agent_id.clone())
    } else {
        state
            .store
            .get_agent(&agent_id)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| Agent::new(agent_id.clone()))
    };
    agent.status = AgentStatus::Running;
    agent.current_task = Some(task.id);
    agent.branch = Some(task.context.branch.clone());
    if let Err(e) = state.store.set_agent(&agent).await {
        warn!(agent_id = %agent_id, error = %e, "failed to persist agent record");
    }

    // Observed status order: pending -> assigned -> running.
    let mut tracked = task.clone();
    if tracked.status == TaskStatus::Pending {
        tracked.status = TaskStatus::Assigned;
        tracked.assigned_agent = Some(agent_id.clone());
        let _ = state.store.set_task(&tracked).await;
    }
    tracked.status = TaskStatus::Running;
    tracked.assigned_agent = Some(agent_id.clone());
    let _ = state.store.set_task(&tracked).await;

    state.conflict.register_file_activity(
        &agent_id,
        task.id,
        &task.context.files,
        &task.context.branch,
    );

    if is_new_agent {
        state.bus.publish(Notification::new(
            NotificationKind::AgentSpawned,
            json!({
                "agentId": &agent_id,
                "taskId": task.id.to_string(),
                "executionId": &handle.execution_id,
            }),
        ));
    }
    state.bus.publish(Notification::new(
        NotificationKind::TaskStarted,
        json!({
            "taskId": task.id.to_string(),
            "agentId": &agent_id,
        }),
    ));

    info!(
        task_id = %task.id,
        agent_id = %agent_id,
        execution_id = %handle.execution_id,
        "task dispatched"
    );

    let waiter_state = state.clone();
    let waiter_agent = agent_id.clone();
    let execution_id = handle.execution_id;
    tokio::spawn(async move {
        completion::await_and_finalize(waiter_state, tracked, execution_id, waiter_agent).await;
    });

    DispatchOutcome::Launched(agent_id)
}
