#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use tokio::sync::mpsc;

use swarm_bridge::auth::TokenVerifier;
use swarm_bridge::EventBus;
use swarm_core::config::Config;
use swarm_core::store::{MemoryStore, StateStore};
use swarm_core::types::BudgetConfig;
use swarm_daemon::server::{api_router, ApiState};
use swarm_exec::mock::MockProvider;
use swarm_orchestrator::{build_topology, BudgetGuard, ConflictMonitor, ScoreBoard, Scheduler};

pub const TEST_SECRET: &str = "test-secret-for-daemon-tests";

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.budget = BudgetConfig {
        per_task_max_cents: 500,
        daily_limit_cents: 10_000,
        weekly_limit_cents: 100_000,
        alert_threshold_percent: 80,
        pause_threshold_percent: 100,
    };
    config
}

pub fn make_state(config: Config) -> Arc<ApiState> {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let bus = EventBus::new(config.notifications.history_limit);
    let scores = Arc::new(ScoreBoard::default());
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        scores.clone(),
        bus.clone(),
        config.scheduler.max_concurrent_per_agent,
    ));
    let conflict = Arc::new(ConflictMonitor::new(bus.clone()));
    let budget = Arc::new(BudgetGuard::new(
        store.clone(),
        config.budget.clone(),
        bus.clone(),
    ));
    let topology = build_topology(&config.topology, store.clone(), bus.clone());
    let provider = Arc::new(MockProvider::new());

    // The receiver is dropped: wake nudges are no-ops in tests.
    let (wake_tx, _wake_rx) = mpsc::channel(16);

    Arc::new(ApiState::new(
        config, store, scheduler, scores, conflict, budget, topology, provider, bus, wake_tx,
    ))
}

pub fn make_router(state: Arc<ApiState>) -> Router {
    api_router(state, TokenVerifier::new(TEST_SECRET), None, vec![])
}

pub fn bearer() -> String {
    let token = TokenVerifier::new(TEST_SECRET)
        .sign("test-client", 3600)
        .expect("sign test token");
    format!("Bearer {token}")
}
