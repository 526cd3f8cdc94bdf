use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use swarm_bridge::EventBus;
use swarm_core::config::TopologyMode;
use swarm_core::store::StateStore;
use swarm_core::types::{Task, TaskResult};

use super::{apply_result, Result, TopologyHandler};

/// Hub-and-spoke: the orchestrator is the only coordinator. Tasks are
/// stored and queued for the scheduler; no agent-to-agent paths exist.
pub struct HubTopology {
    store: Arc<dyn StateStore>,
    #[allow(dead_code)]
    bus: EventBus,
}

impl HubTopology {
    pub fn new(store: Arc<dyn StateStore>, bus: EventBus) -> Self {
        Self { store, bus }
    }
}

#[async_trait]
impl TopologyHandler for HubTopology {
    fn mode(&self) -> TopologyMode {
        TopologyMode::Hub
    }

    async fn submit_task(&self, task: &Task) -> Result<()> {
        self.store.set_task(task).await?;
        debug!(task_id = %task.id, "task enqueued (hub)");
        Ok(())
    }

    async fn on_task_complete(&self, result: &TaskResult) -> Result<()> {
        apply_result(&self.store, result).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_core::store::MemoryStore;
    use swarm_core::types::{
        Agent, AgentStatus, ResultStatus, TaskContext, TaskStatus, TaskType, TokenUsage,
    };

    fn make_result(task: &Task, status: ResultStatus) -> TaskResult {
        TaskResult {
            task_id: task.id,
            agent_id: "swarm-agent-aaaaaaaa".into(),
            status,
            outputs: vec![],
            summary: None,
            reports: None,
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
                cached_tokens: 0,
            },
            duration_ms: 2_000,
            cost_cents: 12,
            base_commit: None,
            result_commit: None,
            conflicts: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn submit_stores_the_task() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let hub = HubTopology::new(store.clone(), EventBus::default());

        let task = Task::new(TaskType::Code, "p", TaskContext::for_branch("main"));
        hub.submit_task(&task).await.unwrap();
        assert!(store.get_task(task.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn completion_writes_result_status_and_agent() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let hub = HubTopology::new(store.clone(), EventBus::default());

        let mut task = Task::new(TaskType::Code, "p", TaskContext::for_branch("main"));
        task.status = TaskStatus::Running;
        task.assigned_agent = Some("swarm-agent-aaaaaaaa".into());
        store.set_task(&task).await.unwrap();

        let mut agent = Agent::new("swarm-agent-aaaaaaaa");
        agent.status = AgentStatus::Running;
        agent.current_task = Some(task.id);
        store.set_agent(&agent).await.unwrap();

        let result = make_result(&task, ResultStatus::Success);
        hub.on_task_complete(&result).await.unwrap();

        assert!(store.get_result(task.id).await.unwrap().is_some());
        let stored = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);

        let agent = store.get_agent("swarm-agent-aaaaaaaa").await.unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Completed);
        assert_eq!(agent.cost_cents, 12);
        assert_eq!(agent.usage.input_tokens, 100);
        assert!(agent.current_task.is_none());
    }

    #[tokio::test]
    async fn failed_result_marks_task_and_agent_failed() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let hub = HubTopology::new(store.clone(), EventBus::default());

        let mut task = Task::new(TaskType::Test, "p", TaskContext::for_branch("main"));
        task.status = TaskStatus::Running;
        store.set_task(&task).await.unwrap();
        store.set_agent(&Agent::new("swarm-agent-aaaaaaaa")).await.unwrap();

        hub.on_task_complete(&make_result(&task, ResultStatus::Failed))
            .await
            .unwrap();

        let stored = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        let agent = store.get_agent("swarm-agent-aaaaaaaa").await.unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Failed);
    }

    #[tokio::test]
    async fn cancelled_task_keeps_its_status_on_late_result() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let hub = HubTopology::new(store.clone(), EventBus::default());

        let mut task = Task::new(TaskType::Code, "p", TaskContext::for_branch("main"));
        task.status = TaskStatus::Cancelled;
        store.set_task(&task).await.unwrap();

        hub.on_task_complete(&make_result(&task, ResultStatus::Success))
            .await
            .unwrap();
        let stored = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Cancelled);
    }
}
