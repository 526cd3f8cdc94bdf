//! State-store abstraction.
//!
//! Two backends implement the same operation set: an ephemeral in-memory
//! store for tests and single-node dev deployments, and a durable SQLite
//! key-value store with per-entity TTLs. Absent entries are signalled by
//! `Ok(None)`, never by an error.

mod durable;
mod memory;

pub use durable::DurableStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::types::{
    Agent, BudgetState, Task, TaskPriority, TaskResult, TaskStatus, TaskType,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("backend: {0}")]
    Backend(String),
    #[error("serialization: {0}")]
    Serde(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serde(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// TaskFilter
// ---------------------------------------------------------------------------

/// Listing filter. All criteria are conjunctive; `offset`/`limit` paginate
/// after filtering.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub task_type: Option<TaskType>,
    pub priority: Option<TaskPriority>,
    pub offset: usize,
    pub limit: Option<usize>,
    /// When set, listing honours insertion order newest-first.
    pub newest_first: bool,
}

impl TaskFilter {
    pub fn by_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub(crate) fn matches(&self, task: &Task) -> bool {
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        if let Some(task_type) = self.task_type {
            if task.task_type != task_type {
                return false;
            }
        }
        if let Some(priority) = self.priority {
            if task.priority != priority {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

/// The single operation set both backends fulfil. All mutations are
/// linearisable from the caller's viewpoint within one orchestrator
/// process.
#[async_trait]
pub trait StateStore: Send + Sync {
    // -- tasks --
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>>;
    async fn set_task(&self, task: &Task) -> Result<()>;
    async fn delete_task(&self, id: Uuid) -> Result<()>;
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>>;

    // -- results --
    async fn get_result(&self, task_id: Uuid) -> Result<Option<TaskResult>>;
    async fn set_result(&self, result: &TaskResult) -> Result<()>;

    // -- agents --
    async fn get_agent(&self, id: &str) -> Result<Option<Agent>>;
    async fn set_agent(&self, agent: &Agent) -> Result<()>;
    async fn delete_agent(&self, id: &str) -> Result<()>;
    async fn list_agents(&self) -> Result<Vec<Agent>>;
    /// Count of agents in `initializing` or `running` status.
    async fn count_active_agents(&self) -> Result<usize>;

    // -- budget --
    async fn get_budget(&self) -> Result<BudgetState>;
    async fn set_budget(&self, state: &BudgetState) -> Result<()>;
    /// Atomically add `cents` to both counters, returning the new state.
    async fn increment_spend(&self, cents: u64) -> Result<BudgetState>;
    async fn reset_daily(&self) -> Result<()>;
    async fn reset_weekly(&self) -> Result<()>;

    // -- dependency edges --
    async fn add_edge(&self, task: Uuid, depends_on: Uuid) -> Result<()>;
    async fn remove_edge(&self, task: Uuid, depends_on: Uuid) -> Result<()>;
    /// Direct dependencies of `task` (forward adjacency).
    async fn get_dependencies(&self, task: Uuid) -> Result<Vec<Uuid>>;
    /// Direct dependents of `task` (reverse adjacency).
    async fn get_dependents(&self, task: Uuid) -> Result<Vec<Uuid>>;

    // -- health --
    async fn ping(&self) -> Result<()>;
}
