use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use swarm_bridge::EventBus;
use swarm_core::config::TopologyMode;
use swarm_core::store::StateStore;
use swarm_core::types::{Task, TaskResult};

use super::{apply_result, Result, TopologyError, TopologyHandler};

/// Upper bound on outstanding request correlations before the oldest are
/// dropped.
const MAX_PENDING: usize = 1_024;

// ---------------------------------------------------------------------------
// PeerMessage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerMessageKind {
    Broadcast,
    Request,
    Response,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerMessage {
    pub id: Uuid,
    pub from: String,
    pub to: Option<String>,
    pub task_id: Option<Uuid>,
    pub kind: PeerMessageKind,
    pub payload: serde_json::Value,
    pub sent_at: DateTime<Utc>,
}

impl PeerMessage {
    fn new(
        from: &str,
        to: Option<&str>,
        task_id: Option<Uuid>,
        kind: PeerMessageKind,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            from: from.to_string(),
            to: to.map(String::from),
            task_id,
            kind,
            payload,
            sent_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// MeshTopology
// ---------------------------------------------------------------------------

struct PendingRequest {
    requester: String,
    responder: oneshot::Sender<PeerMessage>,
}

struct MeshState {
    /// Per-agent FIFO inbox.
    queues: HashMap<String, VecDeque<PeerMessage>>,
    /// Outstanding requests awaiting a response, keyed by message id.
    pending: HashMap<Uuid, PendingRequest>,
    pending_order: VecDeque<Uuid>,
}

/// Mesh topology: agents on the same task can message each other through
/// the orchestrator. Broadcasts fan out to task peers; requests carry a
/// correlation id and reject after the peer timeout.
pub struct MeshTopology {
    store: Arc<dyn StateStore>,
    #[allow(dead_code)]
    bus: EventBus,
    peer_timeout_ms: u64,
    state: Mutex<MeshState>,
}

impl MeshTopology {
    pub fn new(store: Arc<dyn StateStore>, bus: EventBus, peer_timeout_ms: u64) -> Self {
        Self {
            store,
            bus,
            peer_timeout_ms,
            state: Mutex::new(MeshState {
                queues: HashMap::new(),
                pending: HashMap::new(),
                pending_order: VecDeque::new(),
            }),
        }
    }

    /// Deliver `payload` to every agent currently assigned to `task_id`,
    /// excluding the sender. Returns how many peers received it; zero
    /// peers is a no-op, not an error.
    pub async fn broadcast(
        &self,
        from_agent: &str,
        task_id: Uuid,
        payload: serde_json::Value,
    ) -> Result<usize> {
        let peers: Vec<String> = self
            .store
            .list_agents()
            .await?
            .into_iter()
            .filter(|a| a.current_task == Some(task_id) && a.id != from_agent)
            .map(|a| a.id)
            .collect();

        let mut state = self.state.lock().await;
        for peer in &peers {
            let message = PeerMessage::new(
                from_agent,
                Some(peer),
                Some(task_id),
                PeerMessageKind::Broadcast,
                payload.clone(),
            );
            state.queues.entry(peer.clone()).or_default().push_back(message);
        }
        debug!(from_agent, task_id = %task_id, peers = peers.len(), "broadcast delivered");
        Ok(peers.len())
    }

    /// Send a request to a specific peer and await its response. Rejects
    /// with a peer-timeout error when no response arrives in time.
    pub async fn send_request(
        &self,
        from_agent: &str,
        to_agent: &str,
        payload: serde_json::Value,
    ) -> Result<PeerMessage> {
        let message = PeerMessage::new(
            from_agent,
            Some(to_agent),
            None,
            PeerMessageKind::Request,
            payload,
        );
        let request_id = message.id;
        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.state.lock().await;
            state
                .queues
                .entry(to_agent.to_string())
                .or_default()
                .push_back(message);
            state.pending.insert(
                request_id,
                PendingRequest {
                    requester: from_agent.to_string(),
                    responder: tx,
                },
            );
            state.pending_order.push_back(request_id);

            // Never let abandoned correlations grow without bound.
            while state.pending.len() > MAX_PENDING {
                if let Some(oldest) = state.pending_order.pop_front() {
                    state.pending.remove(&oldest);
                }
            }
        }

        match tokio::time::timeout(Duration::from_millis(self.peer_timeout_ms), rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(TopologyError::UnknownRequest(request_id)),
            Err(_) => {
                warn!(
                    from_agent,
                    to_agent,
                    request_id = %request_id,
                    timeout_ms = self.peer_timeout_ms,
                    "peer request timed out"
                );
                Err(TopologyError::PeerTimeout(self.peer_timeout_ms))
            }
        }
    }

    /// Resolve an outstanding request. If the requester has already
    /// stopped waiting (timeout), the response lands in its inbox
    /// instead.
    pub async fn respond_to_request(
        &self,
        request_id: Uuid,
        from_agent: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let pending = state
            .pending
            .remove(&request_id)
            .ok_or(TopologyError::UnknownRequest(request_id))?;
        state.pending_order.retain(|id| *id != request_id);

        let mut response = PeerMessage::new(
            from_agent,
            Some(&pending.requester),
            None,
            PeerMessageKind::Response,
            payload,
        );
        response.id = request_id;

        if let Err(unclaimed) = pending.responder.send(response) {
            state
                .queues
                .entry(pending.requester.clone())
                .or_default()
                .push_back(unclaimed);
        }
        Ok(())
    }

    /// Drain an agent's inbox, FIFO.
    pub async fn poll_messages(&self, agent_id: &str) -> Vec<PeerMessage> {
        let mut state = self.state.lock().await;
        state
            .queues
            .get_mut(agent_id)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TopologyHandler for MeshTopology {
    fn mode(&self) -> TopologyMode {
        TopologyMode::Mesh
    }

    async fn submit_task(&self, task: &Task) -> Result<()> {
        self.store.set_task(task).await?;
        Ok(())
    }

    async fn on_task_complete(&self, result: &TaskResult) -> Result<()> {
        apply_result(&self.store, result).await?;
        // A finished agent's inbox is garbage from here on.
        let mut state = self.state.lock().await;
        state.queues.remove(&result.agent_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
