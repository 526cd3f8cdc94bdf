use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use swarm_core::types::{Agent, ModelChoice, PerfRecord, Task, TaskType};

use crate::scoring::ScoreBoard;

// ---------------------------------------------------------------------------
// RoutingDecision
// ---------------------------------------------------------------------------

/// The router's answer for one task: which idle worker should take it (or
/// none, meaning spawn a fresh one), which model it should run, and how
/// confident the history makes us.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub agent_id: Option<String>,
    pub model: ModelChoice,
    pub confidence: f64,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// AgentRouter
// ---------------------------------------------------------------------------

/// Picks the best idle agent for a task using the score board.
pub struct AgentRouter {
    scores: Arc<ScoreBoard>,
}

impl AgentRouter {
    pub fn new(scores: Arc<ScoreBoard>) -> Self {
        Self { scores }
    }

    /// Route `task` over the currently idle agents.
    pub async fn route(&self, task: &Task, idle_agents: &[Agent]) -> RoutingDecision {
        if idle_agents.is_empty() {
            return RoutingDecision {
                agent_id: None,
                model: select_model(task, None),
                confidence: 0.5,
                reason: "no idle agents - spawn new worker".into(),
            };
        }

        let mut best: Option<(&Agent, PerfRecord, f64)> = None;
        for agent in idle_agents {
            let record = self.scores.get(&agent.id, task.task_type).await;
            let score = ScoreBoard::composite_score(&record);
            let better = match &best {
                None => true,
                Some((_, best_record, best_score)) => {
                    if (score - best_score).abs() > f64::EPSILON {
                        score > *best_score
                    } else if record.completed_count != best_record.completed_count {
                        // Tie-break 1: prefer more completions.
                        record.completed_count > best_record.completed_count
                    } else {
                        // Tie-break 2: earliest last-updated wins.
                        record.updated_at < best_record.updated_at
                    }
                }
            };
            if better {
                best = Some((agent, record, score));
            }
        }

        let (agent, record, score) = best.expect("idle_agents is non-empty");
        let model = select_model(task, Some(&record));
        let confidence = confidence_for(&record, score);
        let reason = reason_for(&agent.id, &record, score);

        debug!(
            task_id = %task.id,
            agent_id = %agent.id,
            score,
            confidence,
            "routing decision"
        );

        RoutingDecision {
            agent_id: Some(agent.id.clone()),
            model,
            confidence,
            reason,
        }
    }
}

/// Model selection: honour the task's explicit preference; otherwise opus
/// for security/review work, big budgets, or a selected agent with a poor
/// established record; sonnet for everything else.
fn select_model(task: &Task, selected: Option<&PerfRecord>) -> ModelChoice {
    if let Some(model) = task.model {
        return model;
    }
    if matches!(task.task_type, TaskType::Security | TaskType::Review) {
        return ModelChoice::Opus;
    }
    if task.budget_cents >= 500 {
        return ModelChoice::Opus;
    }
    if let Some(record) = selected {
        if record.success_rate < 0.6 && record.completed_count >= 5 {
            return ModelChoice::Opus;
        }
    }
    ModelChoice::Sonnet
}

/// Confidence: the score capped at 1, discounted for thin history and for
/// an indecisive success band, rounded to two decimals.
fn confidence_for(record: &PerfRecord, score: f64) -> f64 {
    let mut confidence = score.min(1.0);
    if record.completed_count < 5 {
        confidence *= 0.6;
    } else if record.completed_count < 20 {
        confidence *= 0.8;
    }
    if record.success_rate > 0.3 && record.success_rate < 0.7 {
        confidence *= 0.8;
    }
    (confidence * 100.0).round() / 100.0
}

fn reason_for(agent_id: &str, record: &PerfRecord, score: f64) -> String {
    let mut traits = Vec::new();
    if record.success_rate >= 0.8 {
        traits.push("high success rate");
    } else if record.success_rate < 0.4 && record.completed_count > 0 {
        traits.push("weak history");
    }
    if record.completed_count >= 20 {
        traits.push("experienced");
    } else if record.completed_count == 0 {
        traits.push("no history for this task type");
    }

    if traits.is_empty() {
        format!("selected {agent_id} (score {score:.2})")
    } else {
        format!("selected {agent_id}: {} (score {score:.2})", traits.join(", "))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
