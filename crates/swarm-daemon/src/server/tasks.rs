use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use swarm_bridge::validation::{validate_submission, SubmitTasksRequest};
use swarm_bridge::{ApiError, FieldError};
use swarm_core::store::TaskFilter;
use swarm_core::types::{Task, TaskPriority, TaskResult, TaskStatus, TaskType};
use swarm_orchestrator::BudgetError;

use super::state::ApiState;

// ---------------------------------------------------------------------------
// POST /tasks
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubmitTasksResponse {
    pub task_ids: Vec<Uuid>,
    pub estimated_cost_cents: u64,
}

/// POST /tasks -- submit a batch of 1-20 tasks.
///
/// Rejected outright while the budget guard is paused. The whole payload
/// is schema-validated before anything is stored.
pub(crate) async fn submit_tasks(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<SubmitTasksRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if state
        .budget
        .is_paused()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
    {
        return Err(ApiError::BudgetPaused);
    }

    let tasks = validate_submission(&req).map_err(ApiError::Validation)?;

    // Per-task budget cap from the budget guard's config.
    let mut cap_errors = Vec::new();
    for (i, task) in tasks.iter().enumerate() {
        if let Err(BudgetError::PerTaskCapExceeded { requested, cap }) =
            state.budget.check_task_budget(task)
        {
            cap_errors.push(FieldError::new(
                format!("tasks[{i}].budgetCents"),
                format!("{requested} exceeds the per-task cap of {cap}"),
            ));
        }
    }
    if !cap_errors.is_empty() {
        return Err(ApiError::Validation(cap_errors));
    }

    let mut task_ids = Vec::with_capacity(tasks.len());
    let mut estimated_cost_cents = 0u64;

    for task in &tasks {
        state
            .topology
            .submit_task(task)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;

        if let Err(e) = state.scheduler.register_task(task).await {
            // A cycle-closing dependency rejects this task; undo its
            // store entry so nothing half-registered lingers.
            warn!(task_id = %task.id, error = %e, "task registration rejected");
            let _ = state.store.delete_task(task.id).await;
            return Err(ApiError::BadRequest(e.to_string()));
        }

        task_ids.push(task.id);
        estimated_cost_cents += u64::from(task.budget_cents);
    }

    state.wake_scheduler();
    Ok(Json(SubmitTasksResponse {
        task_ids,
        estimated_cost_cents,
    }))
}

// ---------------------------------------------------------------------------
// GET /tasks
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct TaskListQuery {
    pub status: Option<TaskStatus>,
    #[serde(rename = "type")]
    pub task_type: Option<TaskType>,
    pub priority: Option<TaskPriority>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

/// GET /tasks -- list tasks, newest first, with optional filters.
pub(crate) async fn list_tasks(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<Vec<Task>>, ApiError> {
    let filter = TaskFilter {
        status: query.status,
        task_type: query.task_type,
        priority: query.priority,
        offset: query.offset.unwrap_or(0),
        limit: Some(query.limit.unwrap_or(50)),
        newest_first: true,
    };
    let tasks = state
        .store
        .list_tasks(&filter)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(tasks))
}

// ---------------------------------------------------------------------------
// GET /tasks/{id}
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub(crate) struct TaskDetail {
    pub task: Task,
    pub result: Option<TaskResult>,
}

/// GET /tasks/{id} -- the task plus its latest result, if any.
pub(crate) async fn get_task(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskDetail>, ApiError> {
    let task = state
        .store
        .get_task(id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("task {id} not found")))?;
    let result = state
        .store
        .get_result(id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(TaskDetail { task, result }))
}

// ---------------------------------------------------------------------------
// POST /tasks/{id}/cancel
// ---------------------------------------------------------------------------

/// POST /tasks/{id}/cancel -- flip the task to cancelled immediately;
/// stop an already-dispatched execution best-effort.
pub(crate) async fn cancel_task(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let mut task = state
        .store
        .get_task(id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("task {id} not found")))?;

    if task.status.is_terminal() {
        return Err(ApiError::Conflict(format!(
            "task is already {:?}",
            task.status
        )));
    }

    task.status = TaskStatus::Cancelled;
    state
        .store
        .set_task(&task)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    // Best-effort teardown of the live execution, if one exists.
    for job in state.provider.active_jobs().await {
        if job.task_id == id {
            if let Err(e) = state.provider.cancel_execution(&job.execution_id).await {
                warn!(task_id = %id, error = %e, "cancel_execution failed");
            }
        }
    }
    if let Some(agent_id) = &task.assigned_agent {
        state.conflict.release_agent_locks(agent_id);
    }

    Ok(Json(json!({ "taskId": id, "status": task.status })))
}
