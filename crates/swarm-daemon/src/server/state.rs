use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use swarm_bridge::EventBus;
use swarm_core::config::Config;
use swarm_core::store::StateStore;
use swarm_exec::ExecutionProvider;
use swarm_orchestrator::{
    BudgetGuard, ConflictMonitor, ScoreBoard, Scheduler, TopologyHandler,
};

/// Shared application state for all HTTP/WS handlers and the daemon's
/// background loops. Components are built once at startup from config.
pub struct ApiState {
    pub config: Config,
    pub store: Arc<dyn StateStore>,
    pub scheduler: Arc<Scheduler>,
    pub scores: Arc<ScoreBoard>,
    pub conflict: Arc<ConflictMonitor>,
    pub budget: Arc<BudgetGuard>,
    pub topology: Arc<dyn TopologyHandler>,
    pub provider: Arc<dyn ExecutionProvider>,
    pub bus: EventBus,
    pub start_time: Instant,
    /// Nudges the scheduling loop out of its tick sleep (submission,
    /// completion, forced execution).
    pub wake: mpsc::Sender<()>,
}

impl ApiState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        store: Arc<dyn StateStore>,
        scheduler: Arc<Scheduler>,
        scores: Arc<ScoreBoard>,
        conflict: Arc<ConflictMonitor>,
        budget: Arc<BudgetGuard>,
        topology: Arc<dyn TopologyHandler>,
        provider: Arc<dyn ExecutionProvider>,
        bus: EventBus,
        wake: mpsc::Sender<()>,
    ) -> Self {
        Self {
            config,
            store,
            scheduler,
            scores,
            conflict,
            budget,
            topology,
            provider,
            bus,
            start_time: Instant::now(),
            wake,
        }
    }

    /// Fire-and-forget nudge for the scheduler loop.
    pub fn wake_scheduler(&self) {
        let _ = self.wake.try_send(());
    }
}
