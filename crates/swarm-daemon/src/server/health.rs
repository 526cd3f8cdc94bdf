use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use swarm_core::store::TaskFilter;
use swarm_core::types::TaskStatus;

use super::state::ApiState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HealthResponse {
    pub status: &'static str,
    pub mode: &'static str,
    pub queue_depth: usize,
    pub active_agents: usize,
    pub active_jobs: usize,
    pub uptime_secs: u64,
    pub version: &'static str,
}

/// GET /health -- unauthenticated liveness probe.
pub(crate) async fn health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    let store_ok = state.store.ping().await.is_ok();
    let queue_depth = state
        .store
        .list_tasks(&TaskFilter::by_status(TaskStatus::Pending))
        .await
        .map(|tasks| tasks.len())
        .unwrap_or(0);
    let active_agents = state.store.count_active_agents().await.unwrap_or(0);
    let active_jobs = state.provider.active_job_count().await;

    Json(HealthResponse {
        status: if store_ok { "ok" } else { "degraded" },
        mode: state.config.provider.kind_label(),
        queue_depth,
        active_agents,
        active_jobs,
        uptime_secs: state.start_time.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION"),
    })
}
