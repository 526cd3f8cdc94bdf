use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use swarm_bridge::ApiError;
use swarm_core::types::{Agent, AgentStatus};

use super::state::ApiState;

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AgentRollups {
    pub total: usize,
    pub idle: usize,
    pub initializing: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub terminated: usize,
    pub total_cost_cents: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct AgentListResponse {
    pub agents: Vec<Agent>,
    pub rollups: AgentRollups,
}

/// GET /agents -- every known agent plus fleet rollups.
pub(crate) async fn list_agents(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<AgentListResponse>, ApiError> {
    let agents = state
        .store
        .list_agents()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let mut rollups = AgentRollups {
        total: agents.len(),
        ..AgentRollups::default()
    };
    for agent in &agents {
        match agent.status {
            AgentStatus::Idle => rollups.idle += 1,
            AgentStatus::Initializing => rollups.initializing += 1,
            AgentStatus::Running => rollups.running += 1,
            AgentStatus::Completed => rollups.completed += 1,
            AgentStatus::Failed => rollups.failed += 1,
            AgentStatus::Terminated => rollups.terminated += 1,
        }
        rollups.total_cost_cents += u64::from(agent.cost_cents);
        rollups.total_tokens += agent.usage.total();
    }

    Ok(Json(AgentListResponse { agents, rollups }))
}
