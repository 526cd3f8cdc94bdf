use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use swarm_bridge::{EventBus, Notification, NotificationKind};
use swarm_core::config::TopologyMode;
use swarm_core::store::StateStore;
use swarm_core::types::{Task, TaskResult};

use super::{apply_result, Result, TopologyError, TopologyHandler};

// ---------------------------------------------------------------------------
// HierarchicalTopology
// ---------------------------------------------------------------------------

struct TreeState {
    /// Depth per task; roots sit at 0.
    depth: HashMap<Uuid, u32>,
    /// Children per parent task.
    children: HashMap<Uuid, HashSet<Uuid>>,
}

/// Parent/child task trees: an agent working a task may spawn sub-tasks,
/// bounded in depth and fan-out. When the last sibling of a parent lands
/// in a terminal state, an aggregation-ready event names the parent.
pub struct HierarchicalTopology {
    store: Arc<dyn StateStore>,
    bus: EventBus,
    max_depth: u32,
    max_sub_tasks: usize,
    tree: Mutex<TreeState>,
}

impl HierarchicalTopology {
    pub fn new(
        store: Arc<dyn StateStore>,
        bus: EventBus,
        max_depth: u32,
        max_sub_tasks: usize,
    ) -> Self {
        Self {
            store,
            bus,
            max_depth,
            max_sub_tasks,
            tree: Mutex::new(TreeState {
                depth: HashMap::new(),
                children: HashMap::new(),
            }),
        }
    }

    /// Create a sub-task under `parent_id` from a submission template.
    ///
    /// The sub-task gets a freshly minted id; the parent id is preserved
    /// through the store. Rejects when the child would sit deeper than
    /// `max_depth` or the parent's fan-out is exhausted.
    pub async fn create_sub_task(&self, parent_id: Uuid, template: Task) -> Result<Task> {
        let parent = self
            .store
            .get_task(parent_id)
            .await?
            .ok_or(TopologyError::TaskNotFound(parent_id))?;

        {
            let mut tree = self.tree.lock().await;
            let parent_depth = *tree.depth.get(&parent.id).unwrap_or(&0);
            let child_depth = parent_depth + 1;
            if child_depth > self.max_depth {
                return Err(TopologyError::DepthExceeded {
                    depth: child_depth,
                    max: self.max_depth,
                });
            }

            let sibling_count = tree.children.get(&parent_id).map_or(0, HashSet::len);
            if sibling_count >= self.max_sub_tasks {
                return Err(TopologyError::FanOutExceeded {
                    count: sibling_count,
                    max: self.max_sub_tasks,
                });
            }

            // Re-mint the identity so retried templates never collide.
            let mut child = template;
            child.id = Uuid::new_v4();
            child.parent_task_id = Some(parent_id);

            tree.depth.insert(child.id, child_depth);
            tree.children.entry(parent_id).or_default().insert(child.id);

            self.store.set_task(&child).await?;
            info!(
                parent_id = %parent_id,
                child_id = %child.id,
                depth = child_depth,
                "sub-task created"
            );
            Ok(child)
        }
    }

    pub async fn depth_of(&self, task_id: Uuid) -> u32 {
        *self.tree.lock().await.depth.get(&task_id).unwrap_or(&0)
    }

    /// Whether every child of `parent_id` is in a terminal state.
    async fn siblings_terminal(&self, parent_id: Uuid) -> Result<bool> {
        let children: Vec<Uuid> = {
            let tree = self.tree.lock().await;
            tree.children
                .get(&parent_id)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default()
        };

        for child in children {
            match self.store.get_task(child).await? {
                Some(task) if task.status.is_terminal() => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl TopologyHandler for HierarchicalTopology {
    fn mode(&self) -> TopologyMode {
        TopologyMode::Hierarchical
    }

    async fn submit_task(&self, task: &Task) -> Result<()> {
        self.store.set_task(task).await?;
        let mut tree = self.tree.lock().await;
        tree.depth.entry(task.id).or_insert(0);
        if let Some(parent) = task.parent_task_id {
            tree.children.entry(parent).or_default().insert(task.id);
        }
        debug!(task_id = %task.id, "task enqueued (hierarchical)");
        Ok(())
    }

    async fn on_task_complete(&self, result: &TaskResult) -> Result<()> {
        apply_result(&self.store, result).await?;

        // If this was a child, check whether the whole sibling set is
        // done; aggregation itself is the parent agent's job.
        let completed = self
            .store
            .get_task(result.task_id)
            .await?
            .ok_or(TopologyError::TaskNotFound(result.task_id))?;
        if let Some(parent_id) = completed.parent_task_id {
            if self.siblings_terminal(parent_id).await? {
                info!(parent_id = %parent_id, "all sub-tasks terminal, aggregation ready");
                self.bus.publish(Notification::new(
                    NotificationKind::TaskProgress,
                    json!({
                        "taskId": parent_id.to_string(),
                        "phase": "aggregation-ready",
                    }),
                ));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
