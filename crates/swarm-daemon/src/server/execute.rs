use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use swarm_bridge::ApiError;
use swarm_core::types::TaskStatus;

use super::state::ApiState;
use crate::dispatch::{dispatch_task, DispatchOutcome};

/// POST /execute/{task_id} -- force-start one ready task now, skipping
/// the next scheduler tick.
pub(crate) async fn execute_task(
    State(state): State<Arc<ApiState>>,
    Path(task_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    if state
        .budget
        .is_paused()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
    {
        return Err(ApiError::BudgetPaused);
    }

    let task = state
        .store
        .get_task(task_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("task {task_id} not found")))?;

    if task.status != TaskStatus::Pending {
        return Err(ApiError::Conflict(format!(
            "task is {:?}, only pending tasks can be forced",
            task.status
        )));
    }
    let ready = state
        .scheduler
        .graph()
        .deps_completed(task_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if !ready {
        return Err(ApiError::Conflict("task has unmet dependencies".into()));
    }

    match dispatch_task(state.clone(), task, None, None).await {
        DispatchOutcome::Launched(agent_id) => {
            Ok(Json(json!({ "taskId": task_id, "agentId": agent_id })))
        }
        DispatchOutcome::Deferred(reason) => Err(ApiError::Conflict(reason)),
    }
}

/// POST /execute/batch -- force-start every ready task.
pub(crate) async fn execute_batch(
    State(state): State<Arc<ApiState>>,
) -> Result<impl IntoResponse, ApiError> {
    if state
        .budget
        .is_paused()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
    {
        return Err(ApiError::BudgetPaused);
    }

    let ready = state
        .scheduler
        .graph()
        .get_ready_tasks()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let mut started = Vec::new();
    let mut deferred = Vec::new();
    for task in ready {
        let task_id = task.id;
        match dispatch_task(state.clone(), task, None, None).await {
            DispatchOutcome::Launched(agent_id) => {
                started.push(json!({ "taskId": task_id, "agentId": agent_id }));
            }
            DispatchOutcome::Deferred(reason) => {
                deferred.push(json!({ "taskId": task_id, "reason": reason }));
            }
        }
    }

    Ok(Json(json!({ "started": started, "deferred": deferred })))
}
