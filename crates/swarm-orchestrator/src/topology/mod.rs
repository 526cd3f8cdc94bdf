//! Orchestration topologies.
//!
//! Three interchangeable handlers sit between submission and the
//! scheduler: hub-and-spoke (the default, no agent-to-agent paths),
//! hierarchical (parent/child task trees with depth and fan-out limits),
//! and mesh (peer messaging with request/response correlation).

mod hierarchical;
mod hub;
mod mesh;

pub use hierarchical::HierarchicalTopology;
pub use hub::HubTopology;
pub use mesh::{MeshTopology, PeerMessage, PeerMessageKind};

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use swarm_bridge::EventBus;
use swarm_core::config::{TopologyConfig, TopologyMode};
use swarm_core::store::{StateStore, StoreError};
use swarm_core::types::{Task, TaskResult};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("sub-task depth {depth} exceeds the maximum of {max}")]
    DepthExceeded { depth: u32, max: u32 },
    #[error("parent already has {count} sub-tasks (maximum {max})")]
    FanOutExceeded { count: usize, max: usize },
    #[error("peer timeout after {0} ms")]
    PeerTimeout(u64),
    #[error("no outstanding request {0}")]
    UnknownRequest(Uuid),
    #[error("task not found: {0}")]
    TaskNotFound(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, TopologyError>;

// ---------------------------------------------------------------------------
// TopologyHandler
// ---------------------------------------------------------------------------

/// The part of a topology every deployment exercises: accepting a task
/// for scheduling and folding a finished result back into the store.
#[async_trait]
pub trait TopologyHandler: Send + Sync {
    fn mode(&self) -> TopologyMode;

    /// Store the task so the scheduler's next pass sees it.
    async fn submit_task(&self, task: &Task) -> Result<()>;

    /// Write the result, flip the task's status, and update the agent
    /// record.
    async fn on_task_complete(&self, result: &TaskResult) -> Result<()>;
}

/// Build the configured topology handler once at startup.
pub fn build_topology(
    config: &TopologyConfig,
    store: Arc<dyn StateStore>,
    bus: EventBus,
) -> Arc<dyn TopologyHandler> {
    match config.mode {
        TopologyMode::Hub => Arc::new(HubTopology::new(store, bus)),
        TopologyMode::Hierarchical => Arc::new(HierarchicalTopology::new(
            store,
            bus,
            config.max_depth,
            config.max_sub_tasks_per_agent,
        )),
        TopologyMode::Mesh => Arc::new(MeshTopology::new(store, bus, config.peer_timeout_ms)),
    }
}

// ---------------------------------------------------------------------------
// Shared completion plumbing
// ---------------------------------------------------------------------------

pub(crate) async fn apply_result(
    store: &Arc<dyn StateStore>,
    result: &TaskResult,
) -> Result<()> {
    use swarm_core::types::{AgentStatus, ResultStatus, TaskStatus};

    store.set_result(result).await?;

    let mut task = store
        .get_task(result.task_id)
        .await?
        .ok_or(TopologyError::TaskNotFound(result.task_id))?;
    if !task.status.is_terminal() {
        task.status = match result.status {
            ResultStatus::Success | ResultStatus::Partial => TaskStatus::Completed,
            ResultStatus::Failed => TaskStatus::Failed,
        };
        store.set_task(&task).await?;
    }

    if let Some(mut agent) = store.get_agent(&result.agent_id).await? {
        agent.status = match result.status {
            ResultStatus::Failed => AgentStatus::Failed,
            _ => AgentStatus::Completed,
        };
        agent.current_task = None;
        agent.completed_at = Some(chrono::Utc::now());
        agent.cost_cents += result.cost_cents;
        agent.usage.input_tokens += result.usage.input_tokens;
        agent.usage.output_tokens += result.usage.output_tokens;
        agent.usage.cached_tokens += result.usage.cached_tokens;
        store.set_agent(&agent).await?;
    }

    Ok(())
}
