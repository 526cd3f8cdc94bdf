use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use swarm_bridge::{EventBus, Notification, NotificationKind};
use swarm_core::store::{StateStore, StoreError};
use swarm_core::types::{BudgetConfig, BudgetState, Task, TaskResult};

// ---------------------------------------------------------------------------
// BudgetGuard
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum BudgetError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("task budget {requested} cents exceeds the per-task cap of {cap} cents")]
    PerTaskCapExceeded { requested: u32, cap: u32 },
}

pub type Result<T> = std::result::Result<T, BudgetError>;

/// Enforces the spend limits. Counters live in the store and are bumped
/// only through its atomic increment; this guard layers the thresholds,
/// the pause flag, and the notifications on top.
pub struct BudgetGuard {
    store: Arc<dyn StateStore>,
    config: BudgetConfig,
    bus: EventBus,
}

impl BudgetGuard {
    pub fn new(store: Arc<dyn StateStore>, config: BudgetConfig, bus: EventBus) -> Self {
        Self { store, config, bus }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Whether new submissions are currently refused.
    pub async fn is_paused(&self) -> Result<bool> {
        Ok(self.store.get_budget().await?.paused)
    }

    /// Reject tasks whose own budget exceeds the per-task cap.
    pub fn check_task_budget(&self, task: &Task) -> Result<()> {
        if task.budget_cents > self.config.per_task_max_cents {
            return Err(BudgetError::PerTaskCapExceeded {
                requested: task.budget_cents,
                cap: self.config.per_task_max_cents,
            });
        }
        Ok(())
    }

    /// Debit a completed result's cost and re-evaluate the thresholds.
    /// Crossing the pause threshold flips the paused flag; crossing the
    /// alert threshold emits a budget warning.
    pub async fn record_result(&self, result: &TaskResult) -> Result<BudgetState> {
        let mut state = if result.cost_cents > 0 {
            self.store.increment_spend(u64::from(result.cost_cents)).await?
        } else {
            self.store.get_budget().await?
        };

        let pause_at =
            self.config.daily_limit_cents * u64::from(self.config.pause_threshold_percent) / 100;
        let alert_at =
            self.config.daily_limit_cents * u64::from(self.config.alert_threshold_percent) / 100;

        if !state.paused && state.daily_used_cents >= pause_at {
            state.paused = true;
            self.store.set_budget(&state).await?;
            warn!(
                daily_used_cents = state.daily_used_cents,
                daily_limit_cents = self.config.daily_limit_cents,
                "daily budget exhausted - pausing submissions"
            );
            self.bus.publish(Notification::new(
                NotificationKind::BudgetPaused,
                json!({
                    "dailyUsedCents": state.daily_used_cents,
                    "dailyLimitCents": self.config.daily_limit_cents,
                }),
            ));
        } else if !state.paused && state.daily_used_cents >= alert_at {
            self.bus.publish(Notification::new(
                NotificationKind::BudgetWarning,
                json!({
                    "dailyUsedCents": state.daily_used_cents,
                    "dailyLimitCents": self.config.daily_limit_cents,
                    "thresholdPercent": self.config.alert_threshold_percent,
                }),
            ));
        }

        Ok(state)
    }

    /// Daily spend projection: current use plus a fixed per-agent
    /// allowance for everything still running.
    pub async fn projection(&self, active_agents: usize) -> Result<u64> {
        let state = self.store.get_budget().await?;
        Ok(state.daily_used_cents + active_agents as u64 * 150)
    }

    pub async fn state(&self) -> Result<BudgetState> {
        Ok(self.store.get_budget().await?)
    }

    /// Reset the daily counter and unpause. Driven by an external timer;
    /// idempotent.
    pub async fn reset_daily(&self) -> Result<()> {
        self.store.reset_daily().await?;
        info!("daily budget counter reset");
        Ok(())
    }

    pub async fn reset_weekly(&self) -> Result<()> {
        self.store.reset_weekly().await?;
        info!("weekly budget counter reset");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
