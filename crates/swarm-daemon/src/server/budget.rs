use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use swarm_bridge::ApiError;
use swarm_core::types::{BudgetConfig, BudgetState};

use super::state::ApiState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BudgetResponse {
    pub config: BudgetConfig,
    pub state: BudgetState,
    /// Current spend plus a fixed allowance per active agent.
    pub projected_daily_cents: u64,
}

/// POST /budget/reset-daily -- zero the daily counter and unpause.
///
/// The core does not impose the wall-clock rule; an external scheduler
/// (cron at local midnight) invokes this. Idempotent.
pub(crate) async fn reset_daily(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<BudgetState>, ApiError> {
    state
        .budget
        .reset_daily()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let budget_state = state
        .budget
        .state()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(budget_state))
}

/// POST /budget/reset-weekly -- zero the weekly counter. Invoked by an
/// external scheduler on Sundays. Idempotent.
pub(crate) async fn reset_weekly(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<BudgetState>, ApiError> {
    state
        .budget
        .reset_weekly()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let budget_state = state
        .budget
        .state()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(budget_state))
}

/// GET /budget -- spend counters, pause flag, and the daily projection.
pub(crate) async fn get_budget(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<BudgetResponse>, ApiError> {
    let budget_state = state
        .budget
        .state()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let active_agents = state
        .store
        .count_active_agents()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let projected = state
        .budget
        .projection(active_agents)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(BudgetResponse {
        config: state.budget.config().clone(),
        state: budget_state,
        projected_daily_cents: projected,
    }))
}
