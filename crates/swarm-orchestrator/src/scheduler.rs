use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use swarm_bridge::{EventBus, Notification, NotificationKind};
use swarm_core::store::{StateStore, StoreError, TaskFilter};
use swarm_core::types::{Agent, AgentStatus, ModelChoice, Task, TaskStatus};

use crate::graph::{DependencyGraph, GraphError};
use crate::router::{AgentRouter, RoutingDecision};
use crate::scoring::ScoreBoard;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("task not found: {0}")]
    TaskNotFound(Uuid),
    #[error("invalid status transition for task {task}: {from:?} -> {to:?}")]
    InvalidTransition {
        task: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

// ---------------------------------------------------------------------------
// Decision types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub task_id: Uuid,
    pub agent_id: String,
    /// The router's model choice; the dispatch path must ship exactly
    /// this model to the worker.
    pub model: ModelChoice,
    pub score: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deferred {
    pub task_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blocked {
    pub task_id: Uuid,
    pub unmet_dependencies: Vec<Uuid>,
}

/// One scheduling pass: what got assigned, what waits for capacity, and
/// what is still gated on dependencies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulingDecision {
    pub assignments: Vec<Assignment>,
    pub deferred: Vec<Deferred>,
    pub blocked: Vec<Blocked>,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Composes the graph, store, router and score board into scheduling
/// passes. Dispatching the chosen pairs to the execution provider is the
/// daemon loop's job.
pub struct Scheduler {
    store: Arc<dyn StateStore>,
    graph: DependencyGraph,
    router: AgentRouter,
    bus: EventBus,
    max_concurrent_per_agent: usize,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn StateStore>,
        scores: Arc<ScoreBoard>,
        bus: EventBus,
        max_concurrent_per_agent: usize,
    ) -> Self {
        Self {
            graph: DependencyGraph::new(store.clone()),
            router: AgentRouter::new(scores),
            store,
            bus,
            max_concurrent_per_agent: max_concurrent_per_agent.max(1),
        }
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Route one task through the agent router. With an empty agent set
    /// this yields the spawn-new decision, including the model the
    /// fresh worker must run.
    pub async fn route_task(&self, task: &Task, idle_agents: &[Agent]) -> RoutingDecision {
        self.router.route(task, idle_agents).await
    }

    /// Persist a task and register its dependency edges. Cycle-closing
    /// edges reject the whole registration.
    pub async fn register_task(&self, task: &Task) -> Result<()> {
        self.store.set_task(task).await?;
        for dep in &task.context.dependencies {
            self.graph.add_dependency(task.id, *dep).await?;
        }

        self.bus.publish(Notification::new(
            NotificationKind::TaskCreated,
            json!({
                "taskId": task.id.to_string(),
                "type": task.task_type.label(),
                "priority": task.priority,
            }),
        ));
        info!(task_id = %task.id, task_type = task.task_type.label(), "task registered");
        Ok(())
    }

    /// One scheduling pass over the ready set and the given agents.
    pub async fn schedule(&self, available_agents: &[Agent]) -> Result<SchedulingDecision> {
        let mut decision = SchedulingDecision::default();

        // 1. Ready tasks, still pending at pass time.
        let mut ready = self.graph.get_ready_tasks().await?;
        let ready_ids: Vec<Uuid> = ready.iter().map(|t| t.id).collect();

        // 2. Priority first, FIFO by creation time within a priority.
        ready.sort_by(|a, b| {
            b.priority
                .rank()
                .cmp(&a.priority.rank())
                .then(a.created_at.cmp(&b.created_at))
        });

        // 3. Remaining per-agent capacity.
        let mut held = self.held_counts().await?;
        let mut pool: Vec<Agent> = available_agents
            .iter()
            .filter(|a| {
                let used = held.get(&a.id).copied().unwrap_or(0);
                (a.status == AgentStatus::Idle || a.status.is_active())
                    && used < self.max_concurrent_per_agent
            })
            .cloned()
            .collect();

        // 4. Route each prioritised task over the remaining pool.
        for task in &ready {
            let routed = self.router.route(task, &pool).await;
            match routed.agent_id {
                Some(agent_id) => {
                    self.mark_assigned(task.id, &agent_id).await?;
                    let used = held.entry(agent_id.clone()).or_insert(0);
                    *used += 1;
                    if *used >= self.max_concurrent_per_agent {
                        pool.retain(|a| a.id != agent_id);
                    }

                    self.bus.publish(Notification::new(
                        NotificationKind::TaskAssigned,
                        json!({
                            "taskId": task.id.to_string(),
                            "agentId": &agent_id,
                            "model": routed.model,
                            "confidence": routed.confidence,
                            "reason": &routed.reason,
                        }),
                    ));
                    decision.assignments.push(Assignment {
                        task_id: task.id,
                        agent_id,
                        model: routed.model,
                        score: routed.confidence,
                        reason: routed.reason,
                    });
                }
                None => {
                    // 5. Spawn decisions belong to the outer loop.
                    decision.deferred.push(Deferred {
                        task_id: task.id,
                        reason: "no suitable agent".into(),
                    });
                }
            }
        }

        // 6. Everything pending but not ready is blocked; surface the
        // unmet dependencies for visibility.
        let pending = self
            .store
            .list_tasks(&TaskFilter::by_status(TaskStatus::Pending))
            .await?;
        for task in pending {
            if !ready_ids.contains(&task.id) {
                decision.blocked.push(Blocked {
                    task_id: task.id,
                    unmet_dependencies: self.graph.unmet_dependencies(task.id).await?,
                });
            }
        }

        debug!(
            assigned = decision.assignments.len(),
            deferred = decision.deferred.len(),
            blocked = decision.blocked.len(),
            "scheduling pass complete"
        );
        Ok(decision)
    }

    /// Flip a task to `completed` and return the dependents that became
    /// ready, so the caller can wake the scheduler.
    pub async fn complete_task(&self, task_id: Uuid) -> Result<Vec<Task>> {
        self.transition(task_id, TaskStatus::Completed).await?;

        let mut newly_ready = Vec::new();
        for dependent in self.graph.get_dependents(task_id).await? {
            let Some(task) = self.store.get_task(dependent).await? else {
                continue;
            };
            if task.status == TaskStatus::Pending && self.graph.deps_completed(dependent).await? {
                newly_ready.push(task);
            }
        }
        Ok(newly_ready)
    }

    /// Flip a task to `failed`.
    pub async fn fail_task(&self, task_id: Uuid) -> Result<()> {
        self.transition(task_id, TaskStatus::Failed).await
    }

    /// Revert every `assigned` task held by a vanished agent back to
    /// `pending` (the one permitted backward transition). Returns the
    /// reverted ids; the caller re-runs `schedule` to re-route them.
    pub async fn revert_agent_tasks(&self, agent_id: &str) -> Result<Vec<Uuid>> {
        let assigned = self
            .store
            .list_tasks(&TaskFilter::by_status(TaskStatus::Assigned))
            .await?;

        let mut reverted = Vec::new();
        for mut task in assigned {
            if task.assigned_agent.as_deref() == Some(agent_id) {
                task.status = TaskStatus::Pending;
                task.assigned_agent = None;
                self.store.set_task(&task).await?;
                reverted.push(task.id);
                warn!(task_id = %task.id, agent_id, "assignment reverted, agent unavailable");
            }
        }
        Ok(reverted)
    }

    async fn mark_assigned(&self, task_id: Uuid, agent_id: &str) -> Result<()> {
        let mut task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or(SchedulerError::TaskNotFound(task_id))?;

        if !task.status.can_transition_to(&TaskStatus::Assigned) {
            return Err(SchedulerError::InvalidTransition {
                task: task_id,
                from: task.status,
                to: TaskStatus::Assigned,
            });
        }
        task.status = TaskStatus::Assigned;
        task.assigned_agent = Some(agent_id.to_string());
        self.store.set_task(&task).await?;
        Ok(())
    }

    async fn transition(&self, task_id: Uuid, to: TaskStatus) -> Result<()> {
        let mut task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or(SchedulerError::TaskNotFound(task_id))?;

        if task.status.is_terminal() {
            return Err(SchedulerError::InvalidTransition {
                task: task_id,
                from: task.status,
                to,
            });
        }
        task.status = to;
        self.store.set_task(&task).await?;
        Ok(())
    }

    /// Tasks currently held (assigned or running) per agent.
    async fn held_counts(&self) -> Result<HashMap<String, usize>> {
        let mut held: HashMap<String, usize> = HashMap::new();
        for status in [TaskStatus::Assigned, TaskStatus::Running] {
            for task in self.store.list_tasks(&TaskFilter::by_status(status)).await? {
                if let Some(agent) = task.assigned_agent {
                    *held.entry(agent).or_insert(0) += 1;
                }
            }
        }
        Ok(held)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use swarm_core::store::MemoryStore;
    use swarm_core::types::{TaskContext, TaskPriority, TaskType};

    fn scheduler_over(store: Arc<MemoryStore>) -> Scheduler {
        Scheduler::new(store, Arc::new(ScoreBoard::default()), EventBus::default(), 1)
    }

    fn idle_agent(id: &str) -> Agent {
        let mut agent = Agent::new(id);
        agent.status = AgentStatus::Idle;
        agent
    }

    fn make_task(task_type: TaskType, deps: Vec<Uuid>) -> Task {
        let mut context = TaskContext::for_branch("main");
        context.files = vec!["a.ts".into()];
        context.dependencies = deps;
        Task::new(task_type, "p", context)
    }

    #[tokio::test]
    async fn dependency_gating_end_to_end() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_over(store.clone());

        let a = make_task(TaskType::Code, vec![]);
        scheduler.register_task(&a).await.unwrap();
        let b = make_task(TaskType::Test, vec![a.id]);
        scheduler.register_task(&b).await.unwrap();

        let ready: Vec<Uuid> = scheduler
            .graph()
            .get_ready_tasks()
            .await
            .unwrap()
            .iter()
            .map(|t| t.id)
            .collect();
        assert!(ready.contains(&a.id));
        assert!(!ready.contains(&b.id));

        // Complete A; B becomes newly ready.
        let mut running = store.get_task(a.id).await.unwrap().unwrap();
        running.status = TaskStatus::Assigned;
        store.set_task(&running).await.unwrap();
        running.status = TaskStatus::Running;
        store.set_task(&running).await.unwrap();

        let newly_ready = scheduler.complete_task(a.id).await.unwrap();
        assert_eq!(newly_ready.len(), 1);
        assert_eq!(newly_ready[0].id, b.id);
    }

    #[tokio::test]
    async fn cyclic_registration_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_over(store.clone());

        let a = make_task(TaskType::Code, vec![]);
        scheduler.register_task(&a).await.unwrap();

        // A task depending on itself cannot register.
        let mut cyclic = make_task(TaskType::Code, vec![]);
        cyclic.context.dependencies = vec![cyclic.id];
        assert!(matches!(
            scheduler.register_task(&cyclic).await,
            Err(SchedulerError::Graph(GraphError::CycleDetected(_)))
        ));
    }

    #[tokio::test]
    async fn priority_then_fifo_ordering() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_over(store.clone());

        let mut low = make_task(TaskType::Code, vec![]);
        low.priority = TaskPriority::Low;
        let mut old_high = make_task(TaskType::Code, vec![]);
        old_high.priority = TaskPriority::High;
        old_high.created_at = chrono::Utc::now() - Duration::minutes(10);
        let mut new_high = make_task(TaskType::Code, vec![]);
        new_high.priority = TaskPriority::High;

        scheduler.register_task(&low).await.unwrap();
        scheduler.register_task(&new_high).await.unwrap();
        scheduler.register_task(&old_high).await.unwrap();

        // One agent, capacity one: only the oldest high-priority task
        // gets it.
        let decision = scheduler
            .schedule(&[idle_agent("swarm-agent-aaaaaaaa")])
            .await
            .unwrap();
        assert_eq!(decision.assignments.len(), 1);
        assert_eq!(decision.assignments[0].task_id, old_high.id);

        // The rest defer for lack of capacity.
        let deferred: Vec<Uuid> = decision.deferred.iter().map(|d| d.task_id).collect();
        assert!(deferred.contains(&new_high.id));
        assert!(deferred.contains(&low.id));
    }

    #[tokio::test]
    async fn blocked_tasks_surface_their_unmet_dependencies() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_over(store.clone());

        let a = make_task(TaskType::Code, vec![]);
        scheduler.register_task(&a).await.unwrap();
        let b = make_task(TaskType::Test, vec![a.id]);
        scheduler.register_task(&b).await.unwrap();

        let decision = scheduler.schedule(&[]).await.unwrap();
        let blocked: Vec<&Blocked> = decision
            .blocked
            .iter()
            .filter(|bl| bl.task_id == b.id)
            .collect();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].unmet_dependencies, vec![a.id]);
    }

    #[tokio::test]
    async fn no_agents_defers_all_ready_tasks() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_over(store.clone());
        let task = make_task(TaskType::Code, vec![]);
        scheduler.register_task(&task).await.unwrap();

        let decision = scheduler.schedule(&[]).await.unwrap();
        assert!(decision.assignments.is_empty());
        assert_eq!(decision.deferred.len(), 1);
        assert_eq!(decision.deferred[0].reason, "no suitable agent");
    }

    #[tokio::test]
    async fn assignment_sets_status_and_agent() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_over(store.clone());
        let task = make_task(TaskType::Code, vec![]);
        scheduler.register_task(&task).await.unwrap();

        scheduler
            .schedule(&[idle_agent("swarm-agent-aaaaaaaa")])
            .await
            .unwrap();

        let stored = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Assigned);
        assert_eq!(stored.assigned_agent.as_deref(), Some("swarm-agent-aaaaaaaa"));
    }

    #[tokio::test]
    async fn assignments_carry_the_routed_model() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_over(store.clone());

        // Security work routes to opus even with no history.
        let task = make_task(TaskType::Security, vec![]);
        scheduler.register_task(&task).await.unwrap();

        let decision = scheduler
            .schedule(&[idle_agent("swarm-agent-aaaaaaaa")])
            .await
            .unwrap();
        assert_eq!(decision.assignments.len(), 1);
        assert_eq!(decision.assignments[0].model, ModelChoice::Opus);

        // An explicit submitter preference is passed through untouched.
        let mut pinned = make_task(TaskType::Security, vec![]);
        pinned.model = Some(ModelChoice::Sonnet);
        scheduler.register_task(&pinned).await.unwrap();

        let decision = scheduler
            .schedule(&[idle_agent("swarm-agent-bbbbbbbb")])
            .await
            .unwrap();
        assert_eq!(decision.assignments.len(), 1);
        assert_eq!(decision.assignments[0].model, ModelChoice::Sonnet);
    }

    #[tokio::test]
    async fn rebalance_reverts_assignments_for_lost_agent() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_over(store.clone());
        let task = make_task(TaskType::Code, vec![]);
        scheduler.register_task(&task).await.unwrap();
        scheduler
            .schedule(&[idle_agent("swarm-agent-aaaaaaaa")])
            .await
            .unwrap();

        let reverted = scheduler
            .revert_agent_tasks("swarm-agent-aaaaaaaa")
            .await
            .unwrap();
        assert_eq!(reverted, vec![task.id]);

        let stored = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
        assert!(stored.assigned_agent.is_none());

        // Re-routes onto a surviving agent on the next pass.
        let decision = scheduler
            .schedule(&[idle_agent("swarm-agent-bbbbbbbb")])
            .await
            .unwrap();
        assert_eq!(decision.assignments.len(), 1);
        assert_eq!(decision.assignments[0].agent_id, "swarm-agent-bbbbbbbb");
    }

    #[tokio::test]
    async fn completing_a_terminal_task_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_over(store.clone());
        let mut task = make_task(TaskType::Code, vec![]);
        task.status = TaskStatus::Cancelled;
        store.set_task(&task).await.unwrap();

        assert!(matches!(
            scheduler.complete_task(task.id).await,
            Err(SchedulerError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn scheduler_emits_created_and_assigned_events() {
        let store = Arc::new(MemoryStore::new());
        let bus = EventBus::default();
        let rx = bus.subscribe();
        let scheduler = Scheduler::new(
            store.clone(),
            Arc::new(ScoreBoard::default()),
            bus.clone(),
            1,
        );

        let task = make_task(TaskType::Code, vec![]);
        scheduler.register_task(&task).await.unwrap();
        scheduler
            .schedule(&[idle_agent("swarm-agent-aaaaaaaa")])
            .await
            .unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind);
        }
        assert!(kinds.contains(&NotificationKind::TaskCreated));
        assert!(kinds.contains(&NotificationKind::TaskAssigned));
    }
}
