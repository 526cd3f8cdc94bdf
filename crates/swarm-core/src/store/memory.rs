use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Result, StateStore, TaskFilter};
use crate::types::{Agent, BudgetState, Task, TaskResult};

/// Ephemeral in-memory backend. One logical owner per key space, guarded
/// by `RwLock`s; nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
    /// Insertion order of task ids, oldest first.
    task_order: RwLock<Vec<Uuid>>,
    results: RwLock<HashMap<Uuid, TaskResult>>,
    agents: RwLock<HashMap<String, Agent>>,
    agent_order: RwLock<Vec<String>>,
    budget: RwLock<BudgetState>,
    dep_forward: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
    dep_reverse: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn set_task(&self, task: &Task) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.insert(task.id, task.clone()).is_none() {
            self.task_order.write().await.push(task.id);
        }
        Ok(())
    }

    async fn delete_task(&self, id: Uuid) -> Result<()> {
        self.tasks.write().await.remove(&id);
        self.task_order.write().await.retain(|t| *t != id);
        Ok(())
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let order = self.task_order.read().await;

        let iter: Box<dyn Iterator<Item = &Uuid>> = if filter.newest_first {
            Box::new(order.iter().rev())
        } else {
            Box::new(order.iter())
        };

        let out = iter
            .filter_map(|id| tasks.get(id))
            .filter(|t| filter.matches(t))
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(out)
    }

    async fn get_result(&self, task_id: Uuid) -> Result<Option<TaskResult>> {
        Ok(self.results.read().await.get(&task_id).cloned())
    }

    async fn set_result(&self, result: &TaskResult) -> Result<()> {
        self.results
            .write()
            .await
            .insert(result.task_id, result.clone());
        Ok(())
    }

    async fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        Ok(self.agents.read().await.get(id).cloned())
    }

    async fn set_agent(&self, agent: &Agent) -> Result<()> {
        let mut agents = self.agents.write().await;
        if agents.insert(agent.id.clone(), agent.clone()).is_none() {
            self.agent_order.write().await.push(agent.id.clone());
        }
        Ok(())
    }

    async fn delete_agent(&self, id: &str) -> Result<()> {
        self.agents.write().await.remove(id);
        self.agent_order.write().await.retain(|a| a != id);
        Ok(())
    }

    async fn list_agents(&self) -> Result<Vec<Agent>> {
        let agents = self.agents.read().await;
        let order = self.agent_order.read().await;
        Ok(order.iter().filter_map(|id| agents.get(id)).cloned().collect())
    }

    async fn count_active_agents(&self) -> Result<usize> {
        let agents = self.agents.read().await;
        Ok(agents.values().filter(|a| a.status.is_active()).count())
    }

    async fn get_budget(&self) -> Result<BudgetState> {
        Ok(self.budget.read().await.clone())
    }

    async fn set_budget(&self, state: &BudgetState) -> Result<()> {
        *self.budget.write().await = state.clone();
        Ok(())
    }

    async fn increment_spend(&self, cents: u64) -> Result<BudgetState> {
        let mut budget = self.budget.write().await;
        budget.daily_used_cents += cents;
        budget.weekly_used_cents += cents;
        budget.updated_at = Utc::now();
        Ok(budget.clone())
    }

    async fn reset_daily(&self) -> Result<()> {
        let mut budget = self.budget.write().await;
        budget.daily_used_cents = 0;
        budget.paused = false;
        budget.updated_at = Utc::now();
        Ok(())
    }

    async fn reset_weekly(&self) -> Result<()> {
        let mut budget = self.budget.write().await;
        budget.weekly_used_cents = 0;
        budget.updated_at = Utc::now();
        Ok(())
    }

    async fn add_edge(&self, task: Uuid, depends_on: Uuid) -> Result<()> {
        self.dep_forward
            .write()
            .await
            .entry(task)
            .or_default()
            .insert(depends_on);
        self.dep_reverse
            .write()
            .await
            .entry(depends_on)
            .or_default()
            .insert(task);
        Ok(())
    }

    async fn remove_edge(&self, task: Uuid, depends_on: Uuid) -> Result<()> {
        if let Some(set) = self.dep_forward.write().await.get_mut(&task) {
            set.remove(&depends_on);
        }
        if let Some(set) = self.dep_reverse.write().await.get_mut(&depends_on) {
            set.remove(&task);
        }
        Ok(())
    }

    async fn get_dependencies(&self, task: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .dep_forward
            .read()
            .await
            .get(&task)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn get_dependents(&self, task: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .dep_reverse
            .read()
            .await
            .get(&task)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TaskContext, TaskStatus, TaskType};

    fn make_task(task_type: TaskType) -> Task {
        Task::new(task_type, "prompt", TaskContext::for_branch("main"))
    }

    #[tokio::test]
    async fn set_then_get_returns_equal_task() {
        let store = MemoryStore::new();
        let task = make_task(TaskType::Code);
        store.set_task(&task).await.unwrap();

        let loaded = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, task.id);
        assert_eq!(loaded.prompt, task.prompt);
        assert_eq!(loaded.status, task.status);
    }

    #[tokio::test]
    async fn absent_task_is_none_not_error() {
        let store = MemoryStore::new();
        assert!(store.get_task(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_honours_newest_first() {
        let store = MemoryStore::new();
        let a = make_task(TaskType::Code);
        let b = make_task(TaskType::Test);
        store.set_task(&a).await.unwrap();
        store.set_task(&b).await.unwrap();

        let newest = store
            .list_tasks(&TaskFilter {
                newest_first: true,
                ..TaskFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(newest[0].id, b.id);
        assert_eq!(newest[1].id, a.id);
    }

    #[tokio::test]
    async fn list_filters_by_status_and_type() {
        let store = MemoryStore::new();
        let mut a = make_task(TaskType::Code);
        a.status = TaskStatus::Completed;
        let b = make_task(TaskType::Test);
        store.set_task(&a).await.unwrap();
        store.set_task(&b).await.unwrap();

        let pending = store
            .list_tasks(&TaskFilter::by_status(TaskStatus::Pending))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b.id);

        let tests = store
            .list_tasks(&TaskFilter {
                task_type: Some(TaskType::Test),
                ..TaskFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(tests.len(), 1);
    }

    #[tokio::test]
    async fn increment_spend_updates_both_counters() {
        let store = MemoryStore::new();
        let state = store.increment_spend(150).await.unwrap();
        assert_eq!(state.daily_used_cents, 150);
        assert_eq!(state.weekly_used_cents, 150);

        let state = store.increment_spend(50).await.unwrap();
        assert_eq!(state.daily_used_cents, 200);
        assert_eq!(state.weekly_used_cents, 200);
    }

    #[tokio::test]
    async fn reset_daily_is_idempotent() {
        let store = MemoryStore::new();
        store.increment_spend(500).await.unwrap();
        store.reset_daily().await.unwrap();
        store.reset_daily().await.unwrap();

        let budget = store.get_budget().await.unwrap();
        assert_eq!(budget.daily_used_cents, 0);
        // Weekly is untouched by the daily reset.
        assert_eq!(budget.weekly_used_cents, 500);
    }

    #[tokio::test]
    async fn add_then_remove_edge_leaves_graph_unchanged() {
        let store = MemoryStore::new();
        let t = Uuid::new_v4();
        let d = Uuid::new_v4();

        store.add_edge(t, d).await.unwrap();
        assert_eq!(store.get_dependencies(t).await.unwrap(), vec![d]);
        assert_eq!(store.get_dependents(d).await.unwrap(), vec![t]);

        store.remove_edge(t, d).await.unwrap();
        assert!(store.get_dependencies(t).await.unwrap().is_empty());
        assert!(store.get_dependents(d).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn active_agent_count_tracks_status() {
        use crate::types::AgentStatus;

        let store = MemoryStore::new();
        let mut a = Agent::new("swarm-agent-11111111");
        a.status = AgentStatus::Running;
        let mut b = Agent::new("swarm-agent-22222222");
        b.status = AgentStatus::Idle;
        store.set_agent(&a).await.unwrap();
        store.set_agent(&b).await.unwrap();

        assert_eq!(store.count_active_agents().await.unwrap(), 1);
    }
}
