use std::collections::HashMap;

use chrono::{Duration, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use swarm_core::types::{PerfRecord, TaskType};

/// Smoothing factor for the exponentially-weighted moving averages.
pub const DEFAULT_ALPHA: f64 = 0.3;

/// Composite-score weights: success, speed, cost.
const W_SUCCESS: f64 = 0.5;
const W_SPEED: f64 = 0.25;
const W_COST: f64 = 0.25;

/// Normalisation bands for the speed and cost terms.
const MIN_DURATION_MS: f64 = 10_000.0;
const MAX_DURATION_MS: f64 = 3_600_000.0;
const MIN_COST_CENTS: f64 = 1.0;
const MAX_COST_CENTS: f64 = 1_000.0;

/// Fraction a stale record's success rate drifts toward neutral per
/// decay tick.
const DECAY_STEP: f64 = 0.05;

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// ScoreBoard
// ---------------------------------------------------------------------------

/// Per-(agent, task type) performance history with EWMA smoothing.
///
/// Fresh pairs read as the neutral default (success 0.5, 5-minute
/// duration, one-dollar cost, zero completions).
pub struct ScoreBoard {
    alpha: f64,
    records: RwLock<HashMap<(String, TaskType), PerfRecord>>,
}

impl ScoreBoard {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Fold one completed result into the agent's record.
    pub async fn record_result(
        &self,
        agent_id: &str,
        task_type: TaskType,
        success: bool,
        duration_ms: u64,
        cost_cents: u32,
    ) {
        let mut records = self.records.write().await;
        let record = records
            .entry((agent_id.to_string(), task_type))
            .or_default();

        let a = self.alpha;
        let x = if success { 1.0 } else { 0.0 };
        record.success_rate = a * x + (1.0 - a) * record.success_rate;
        record.avg_duration_ms = a * duration_ms as f64 + (1.0 - a) * record.avg_duration_ms;
        record.avg_cost_cents = a * f64::from(cost_cents) + (1.0 - a) * record.avg_cost_cents;
        record.completed_count += 1;
        record.updated_at = Utc::now();

        debug!(
            agent_id,
            task_type = task_type.label(),
            success_rate = record.success_rate,
            completed = record.completed_count,
            "score updated"
        );
    }

    /// The record for a pair, or the neutral default when unseen.
    pub async fn get(&self, agent_id: &str, task_type: TaskType) -> PerfRecord {
        self.records
            .read()
            .await
            .get(&(agent_id.to_string(), task_type))
            .cloned()
            .unwrap_or_default()
    }

    /// Composite suitability score for a record: weighted blend of
    /// success, normalised speed, and normalised cost, multiplied by an
    /// experience bonus capped at +20%.
    pub fn composite_score(record: &PerfRecord) -> f64 {
        let speed = 1.0
            - clamp01((record.avg_duration_ms - MIN_DURATION_MS) / (MAX_DURATION_MS - MIN_DURATION_MS));
        let cost =
            1.0 - clamp01((record.avg_cost_cents - MIN_COST_CENTS) / (MAX_COST_CENTS - MIN_COST_CENTS));

        let base = W_SUCCESS * record.success_rate + W_SPEED * speed + W_COST * cost;
        let bonus = 1.0 + (f64::from(record.completed_count) / 500.0).min(0.2);
        base * bonus
    }

    /// Drift every record older than `threshold` 5% toward the neutral
    /// 0.5 success rate. Runs on the daemon's decay tick.
    pub async fn decay_stale(&self, threshold: Duration) -> usize {
        let cutoff = Utc::now() - threshold;
        let mut records = self.records.write().await;
        let mut decayed = 0;
        for record in records.values_mut() {
            if record.updated_at < cutoff {
                record.success_rate += (0.5 - record.success_rate) * DECAY_STEP;
                decayed += 1;
            }
        }
        decayed
    }

    #[cfg(test)]
    pub(crate) async fn insert_raw(&self, agent_id: &str, task_type: TaskType, record: PerfRecord) {
        self.records
            .write()
            .await
            .insert((agent_id.to_string(), task_type), record);
    }
}

impl Default for ScoreBoard {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ewma_update_matches_formula() {
        let board = ScoreBoard::default();
        board
            .record_result("agent-1", TaskType::Code, true, 120_000, 40)
            .await;

        let record = board.get("agent-1", TaskType::Code).await;
        // One success folded into the 0.5 default at alpha 0.3.
        assert!((record.success_rate - (0.3 + 0.7 * 0.5)).abs() < 1e-9);
        assert!((record.avg_duration_ms - (0.3 * 120_000.0 + 0.7 * 300_000.0)).abs() < 1e-9);
        assert!((record.avg_cost_cents - (0.3 * 40.0 + 0.7 * 100.0)).abs() < 1e-9);
        assert_eq!(record.completed_count, 1);
    }

    #[tokio::test]
    async fn failure_drives_success_rate_down() {
        let board = ScoreBoard::default();
        board
            .record_result("agent-1", TaskType::Code, false, 60_000, 20)
            .await;
        let record = board.get("agent-1", TaskType::Code).await;
        assert!((record.success_rate - 0.35).abs() < 1e-9);
    }

    #[tokio::test]
    async fn records_are_keyed_per_task_type() {
        let board = ScoreBoard::default();
        board
            .record_result("agent-1", TaskType::Code, true, 60_000, 20)
            .await;

        let code = board.get("agent-1", TaskType::Code).await;
        let test = board.get("agent-1", TaskType::Test).await;
        assert_eq!(code.completed_count, 1);
        assert_eq!(test.completed_count, 0);
        assert_eq!(test.success_rate, 0.5);
    }

    #[test]
    fn composite_score_prefers_strong_records() {
        let strong = PerfRecord {
            success_rate: 0.9,
            avg_duration_ms: 60_000.0,
            avg_cost_cents: 50.0,
            completed_count: 30,
            updated_at: Utc::now(),
        };
        let fresh = PerfRecord::default();
        assert!(ScoreBoard::composite_score(&strong) > ScoreBoard::composite_score(&fresh));
        assert!(ScoreBoard::composite_score(&strong) > 0.9);
    }

    #[test]
    fn speed_and_cost_terms_clamp_at_the_band_edges() {
        let glacial = PerfRecord {
            avg_duration_ms: 10_000_000.0,
            avg_cost_cents: 5_000.0,
            ..PerfRecord::default()
        };
        // Both normalised terms bottom out at zero; only success remains.
        let score = ScoreBoard::composite_score(&glacial);
        assert!((score - 0.5 * 0.5).abs() < 1e-9);
    }

    #[test]
    fn experience_bonus_caps_at_twenty_percent() {
        let veteran = PerfRecord {
            completed_count: 10_000,
            ..PerfRecord::default()
        };
        let base = PerfRecord::default();
        let ratio =
            ScoreBoard::composite_score(&veteran) / ScoreBoard::composite_score(&base);
        assert!((ratio - 1.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn decay_drifts_stale_records_toward_neutral() {
        let board = ScoreBoard::default();
        board
            .insert_raw(
                "agent-1",
                TaskType::Code,
                PerfRecord {
                    success_rate: 0.9,
                    updated_at: Utc::now() - Duration::hours(48),
                    ..PerfRecord::default()
                },
            )
            .await;

        let decayed = board.decay_stale(Duration::hours(24)).await;
        assert_eq!(decayed, 1);

        let record = board.get("agent-1", TaskType::Code).await;
        assert!((record.success_rate - (0.9 + (0.5 - 0.9) * 0.05)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn decay_skips_recent_records() {
        let board = ScoreBoard::default();
        board
            .record_result("agent-1", TaskType::Code, true, 60_000, 20)
            .await;
        assert_eq!(board.decay_stale(Duration::hours(24)).await, 0);
    }
}
