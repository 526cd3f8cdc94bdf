//! Agent liveness watchdog.
//!
//! A worker can die without the completion monitor ever hearing about
//! it. Each sweep cross-checks every active agent record against the
//! provider's live execution list: an agent whose execution is gone,
//! whose task has produced no result, and whose record is older than
//! the grace window is declared lost. Lost agents are terminated, their
//! file locks released, and every task still `assigned` to them is
//! reverted to `pending` so the next scheduling pass re-routes it.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use swarm_bridge::{Notification, NotificationKind};
use swarm_core::store::TaskFilter;
use swarm_core::types::{AgentStatus, TaskStatus};

use crate::server::state::ApiState;

/// How long an active agent may be unaccounted-for before the watchdog
/// reclaims its work. Guards the window between a provider completing
/// an execution and the monitor finalizing its result.
pub const DEFAULT_GRACE_SECS: i64 = 60;

/// One watchdog sweep. Returns how many assignments were reverted.
pub async fn watchdog_pass(state: &Arc<ApiState>, grace: Duration) -> usize {
    let live_tasks: HashSet<Uuid> = state
        .provider
        .active_jobs()
        .await
        .iter()
        .map(|job| job.task_id)
        .collect();

    let agents = match state.store.list_agents().await {
        Ok(agents) => agents,
        Err(e) => {
            warn!(error = %e, "watchdog agent listing failed");
            return 0;
        }
    };

    let now = Utc::now();
    let mut lost: Vec<String> = Vec::new();

    for mut agent in agents {
        if !agent.status.is_active() {
            continue;
        }
        if now - agent.started_at < grace {
            continue;
        }
        let Some(task_id) = agent.current_task else {
            continue;
        };
        if live_tasks.contains(&task_id) {
            continue;
        }
        // A result in the store means the completion monitor already has
        // this one in hand.
        match state.store.get_result(task_id).await {
            Ok(None) => {}
            _ => continue,
        }

        warn!(agent_id = %agent.id, task_id = %task_id, "agent vanished, reclaiming its work");
        agent.status = AgentStatus::Terminated;
        agent.completed_at = Some(now);
        agent.current_task = None;
        if let Err(e) = state.store.set_agent(&agent).await {
            warn!(agent_id = %agent.id, error = %e, "failed to persist terminated agent");
            continue;
        }
        state.conflict.release_agent_locks(&agent.id);
        state.bus.publish(Notification::new(
            NotificationKind::AgentTerminated,
            json!({ "agentId": &agent.id, "reason": "execution lost" }),
        ));
        lost.push(agent.id);
    }

    // Orphaned assignments: tasks still `assigned` to an agent that is
    // terminal or unknown (e.g. an agent record that already expired).
    match state
        .store
        .list_tasks(&TaskFilter::by_status(TaskStatus::Assigned))
        .await
    {
        Ok(assigned) => {
            for task in assigned {
                let Some(agent_id) = task.assigned_agent else {
                    continue;
                };
                if lost.contains(&agent_id) {
                    continue;
                }
                let gone = match state.store.get_agent(&agent_id).await {
                    Ok(Some(agent)) => agent.status.is_terminal(),
                    Ok(None) => true,
                    Err(_) => false,
                };
                if gone {
                    lost.push(agent_id);
                }
            }
        }
        Err(e) => warn!(error = %e, "watchdog assignment listing failed"),
    }

    let mut reverted = 0;
    for agent_id in &lost {
        match state.scheduler.revert_agent_tasks(agent_id).await {
            Ok(tasks) => reverted += tasks.len(),
            Err(e) => warn!(agent_id = %agent_id, error = %e, "assignment reversion failed"),
        }
    }

    if reverted > 0 {
        info!(reverted, "assignments reverted, waking scheduler for re-routing");
        state.wake_scheduler();
    }
    reverted
}
