use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use swarm_bridge::auth::TokenVerifier;
use swarm_bridge::EventBus;
use swarm_core::config::{Config, StoreKind};
use swarm_core::retry::RetryConfig;
use swarm_core::store::{DurableStore, MemoryStore, StateStore};
use swarm_core::types::AgentStatus;
use swarm_exec::build_provider;
use swarm_orchestrator::{build_topology, BudgetGuard, ConflictMonitor, ScoreBoard, Scheduler};

use crate::dispatch::{dispatch_task, DispatchOutcome};
use crate::server::{self, ApiState};
use crate::shutdown::ShutdownSignal;
use crate::watchdog;

/// How often expired durable rows are swept.
const PURGE_INTERVAL_SECS: u64 = 3_600;

/// Upper bound on waiting for in-flight executions at shutdown.
const DRAIN_TIMEOUT_SECS: u64 = 10;

/// The long-lived orchestrator process: builds every component once from
/// config, serves the API, and runs the scheduling, decay, and purge
/// loops until shutdown.
pub struct Daemon {
    config: Config,
    state: Arc<ApiState>,
    verifier: TokenVerifier,
    shutdown: ShutdownSignal,
    wake_rx: Mutex<Option<mpsc::Receiver<()>>>,
    durable: Option<Arc<DurableStore>>,
}

impl Daemon {
    /// Wire the daemon from configuration. Fatal here (missing JWT
    /// secret, unreachable store, provider token absent) exits the
    /// process non-zero.
    pub async fn new(config: Config) -> Result<Self> {
        let secret = config
            .auth
            .resolve_jwt_secret()
            .context("JWT secret missing at startup")?;
        let verifier = TokenVerifier::new(&secret);

        let (store, durable): (Arc<dyn StateStore>, Option<Arc<DurableStore>>) =
            match config.store.kind {
                StoreKind::Memory => (Arc::new(MemoryStore::new()), None),
                StoreKind::Durable => {
                    let path = expand_home(&config.store.path);
                    if let Some(parent) = std::path::Path::new(&path).parent() {
                        std::fs::create_dir_all(parent).ok();
                    }
                    let durable = Arc::new(
                        DurableStore::new(&path)
                            .await
                            .context("failed to open durable state store")?,
                    );
                    (durable.clone(), Some(durable))
                }
            };
        store.ping().await.context("state store unreachable")?;

        let retry = RetryConfig {
            max_attempts: config.retry.max_attempts,
            base: Duration::from_millis(config.retry.base_ms),
            cap: Duration::from_millis(config.retry.cap_ms),
            jitter: config.retry.jitter,
        };
        let provider =
            build_provider(&config.provider, retry).context("execution provider init failed")?;

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

        let (wake_tx, wake_rx) = mpsc::channel(16);
        let state = Arc::new(ApiState::new(
            config.clone(),
            store,
            scheduler,
            scores,
            conflict,
            budget,
            topology,
            provider,
            bus,
            wake_tx,
        ));

        info!(
            provider = config.provider.kind_label(),
            store = ?config.store.kind,
            topology = ?config.topology.mode,
            "daemon components wired"
        );

        Ok(Self {
            config,
            state,
            verifier,
            shutdown: ShutdownSignal::new(),
            wake_rx: Mutex::new(Some(wake_rx)),
            durable,
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn state(&self) -> &Arc<ApiState> {
        &self.state
    }

    /// Serve the API on a pre-bound listener and run the background
    /// loops inline until shutdown.
    pub async fn run_with_listener(&self, listener: tokio::net::TcpListener) -> Result<()> {
        let router = server::api_router(
            self.state.clone(),
            self.verifier.clone(),
            self.config.auth.api_key.clone(),
            self.config.server.allowed_origins.clone(),
        );

        let bind_addr = listener.local_addr()?;
        let mut server_shutdown = self.shutdown.subscribe();
        let server_handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
                let _ = server_shutdown.recv().await;
            });
            if let Err(e) = serve.await {
                error!(error = %e, "API server error");
            }
        });
        info!(%bind_addr, "API server listening");

        self.run_loops().await;

        // Drain: give in-flight executions a bounded window to land.
        let drain_deadline = tokio::time::Instant::now() + Duration::from_secs(DRAIN_TIMEOUT_SECS);
        while self.state.provider.active_job_count().await > 0
            && tokio::time::Instant::now() < drain_deadline
        {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        let _ = server_handle.await;
        info!("daemon stopped");
        Ok(())
    }

    /// Bind from config and run (blocking).
    pub async fn run(&self) -> Result<()> {
        let bind_addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("failed to bind {bind_addr}"))?;
        self.run_with_listener(listener).await
    }

    /// The scheduling/decay/purge event loop.
    async fn run_loops(&self) {
        let mut wake_rx = self
            .wake_rx
            .lock()
            .await
            .take()
            .expect("run_loops started twice");

        let mut schedule_interval =
            tokio::time::interval(Duration::from_secs(self.config.scheduler.tick_secs.max(1)));
        let mut decay_interval = tokio::time::interval(Duration::from_secs(
            self.config.scheduler.decay_interval_secs.max(1),
        ));
        let mut purge_interval =
            tokio::time::interval(Duration::from_secs(PURGE_INTERVAL_SECS));
        let mut watchdog_interval = tokio::time::interval(Duration::from_secs(
            self.config.scheduler.watchdog_secs.max(1),
        ));

        // Consume the first immediate tick so loops don't all fire at t=0.
        schedule_interval.tick().await;
        decay_interval.tick().await;
        purge_interval.tick().await;
        watchdog_interval.tick().await;

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = schedule_interval.tick() => {
                    self.schedule_pass().await;
                }
                Some(()) = wake_rx.recv() => {
                    // Drain coalesced wakes before the pass.
                    while wake_rx.try_recv().is_ok() {}
                    self.schedule_pass().await;
                }
                _ = decay_interval.tick() => {
                    let threshold =
                        chrono::Duration::hours(self.config.scheduler.decay_after_hours as i64);
                    let decayed = self.state.scores.decay_stale(threshold).await;
                    if decayed > 0 {
                        info!(decayed, "stale score records decayed");
                    }
                }
                _ = watchdog_interval.tick() => {
                    let grace = chrono::Duration::seconds(watchdog::DEFAULT_GRACE_SECS);
                    watchdog::watchdog_pass(&self.state, grace).await;
                }
                _ = purge_interval.tick() => {
                    if let Some(durable) = &self.durable {
                        match durable.purge_expired().await {
                            Ok(purged) if purged > 0 => info!(purged, "expired rows purged"),
                            Ok(_) => {}
                            Err(e) => error!(error = %e, "purge failed"),
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received, stopping background loops");
                    break;
                }
            }
        }
    }

    /// One pass: schedule ready tasks over idle agents, then dispatch
    /// assignments and spawn workers for deferred tasks.
    async fn schedule_pass(&self) {
        match self.state.budget.is_paused().await {
            Ok(true) => {
                warn!("budget paused, skipping dispatch");
                return;
            }
            Ok(false) => {}
            Err(e) => {
                error!(error = %e, "budget check failed");
                return;
            }
        }

        let idle_agents = match self.state.store.list_agents().await {
            Ok(agents) => agents
                .into_iter()
                .filter(|a| a.status == AgentStatus::Idle)
                .collect::<Vec<_>>(),
            Err(e) => {
                error!(error = %e, "agent listing failed");
                return;
            }
        };

        let decision = match self.state.scheduler.schedule(&idle_agents).await {
            Ok(decision) => decision,
            Err(e) => {
                error!(error = %e, "scheduling pass failed");
                return;
            }
        };

        for assignment in decision.assignments {
            let Ok(Some(task)) = self.state.store.get_task(assignment.task_id).await else {
                continue;
            };
            if let DispatchOutcome::Deferred(reason) = dispatch_task(
                self.state.clone(),
                task.clone(),
                Some(assignment.agent_id),
                Some(assignment.model),
            )
            .await
            {
                // Undo the assignment so the next pass can re-route it.
                warn!(task_id = %task.id, reason = %reason, "assigned task deferred, reverting");
                let mut reverted = task;
                reverted.status = swarm_core::types::TaskStatus::Pending;
                reverted.assigned_agent = None;
                let _ = self.state.store.set_task(&reverted).await;
            }
        }

        for deferred in decision.deferred {
            let Ok(Some(task)) = self.state.store.get_task(deferred.task_id).await else {
                continue;
            };
            // "No suitable agent" means spawn a fresh worker; the model
            // resolves through the router's spawn-new rules in dispatch.
            let _ = dispatch_task(self.state.clone(), task, None, None).await;
        }
    }
}

fn expand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return format!("{home}/{rest}");
        }
    }
    path.to_string()
}

fn dirs_home() -> Option<String> {
    std::env::var("HOME").ok().filter(|h| !h.is_empty())
}
