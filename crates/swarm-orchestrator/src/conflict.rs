use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use swarm_bridge::{EventBus, Notification, NotificationKind};
use swarm_core::types::{FileLock, Task};

/// How many conflict events the history ring retains for statistics.
const HISTORY_LIMIT: usize = 256;

/// A lock older than this is suspect when a second agent wants the file.
const STALE_LOCK_MINUTES: i64 = 30;

// ---------------------------------------------------------------------------
// Conflict types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictEvent {
    /// Always `potential` at detection time; escalation is the caller's
    /// call.
    pub kind: String,
    pub files: Vec<String>,
    pub agents: Vec<String>,
    pub severity: ConflictSeverity,
    pub recommendation: String,
    pub detected_at: DateTime<Utc>,
}

/// Pre-dispatch gate result for a (task, candidate agent) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentCheck {
    pub safe: bool,
    pub potential_conflicts: Vec<String>,
}

/// A directory where more than one agent currently holds locks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureOverlap {
    pub directory: String,
    pub agents: Vec<String>,
}

/// Aggregates over the bounded conflict history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConflictStats {
    pub total: usize,
    pub by_file: HashMap<String, usize>,
    /// Keyed `a<->b` with the pair sorted, so ordering is stable.
    pub by_agent_pair: HashMap<String, usize>,
}

// ---------------------------------------------------------------------------
// Pattern helpers
// ---------------------------------------------------------------------------

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Files whose concurrent modification is disproportionately risky.
fn is_critical_file(path: &str) -> bool {
    let name = basename(path);
    name == "package.json"
        || name == "package-lock.json"
        || name.starts_with(".env")
        || name.starts_with("config.")
        || name.starts_with("schema.")
        || name.starts_with("migration")
}

/// Test files conflict cheaply; they rarely ship.
fn is_test_file(path: &str) -> bool {
    let name = basename(path);
    name.contains(".test.") || name.contains(".spec.")
}

fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => ".",
    }
}

// ---------------------------------------------------------------------------
// ConflictMonitor
// ---------------------------------------------------------------------------

struct MonitorState {
    locks: HashMap<String, FileLock>,
    agent_paths: HashMap<String, HashSet<String>>,
    history: VecDeque<ConflictEvent>,
}

/// Tracks which agent is touching which file and flags overlap between
/// concurrent agents before it becomes a merge conflict.
pub struct ConflictMonitor {
    state: Mutex<MonitorState>,
    bus: EventBus,
}

impl ConflictMonitor {
    pub fn new(bus: EventBus) -> Self {
        Self {
            state: Mutex::new(MonitorState {
                locks: HashMap::new(),
                agent_paths: HashMap::new(),
                history: VecDeque::new(),
            }),
            bus,
        }
    }

    /// Register the files an agent is about to work on. Unheld paths are
    /// locked to the caller; paths held by another agent produce conflict
    /// events (and remain with their current holder).
    pub fn register_file_activity(
        &self,
        agent_id: &str,
        task_id: Uuid,
        files: &[String],
        branch: &str,
    ) -> Vec<ConflictEvent> {
        let mut state = self.state.lock().expect("conflict monitor lock poisoned");
        let now = Utc::now();
        let mut conflicts = Vec::new();

        for path in files {
            match state.locks.get(path) {
                Some(existing) if existing.agent_id != agent_id => {
                    let severity = severity_for(path, branch, &existing.branch);
                    let recommendation = recommendation_for(path, existing, now);
                    let event = ConflictEvent {
                        kind: "potential".into(),
                        files: vec![path.clone()],
                        agents: vec![existing.agent_id.clone(), agent_id.to_string()],
                        severity,
                        recommendation,
                        detected_at: now,
                    };
                    conflicts.push(event);
                }
                Some(_) => {} // re-registering our own lock is a no-op
                None => {
                    state.locks.insert(
                        path.clone(),
                        FileLock {
                            agent_id: agent_id.to_string(),
                            task_id,
                            branch: branch.to_string(),
                            locked_at: now,
                        },
                    );
                    state
                        .agent_paths
                        .entry(agent_id.to_string())
                        .or_default()
                        .insert(path.clone());
                }
            }
        }

        for event in &conflicts {
            state.history.push_back(event.clone());
            while state.history.len() > HISTORY_LIMIT {
                state.history.pop_front();
            }
            self.bus.publish(Notification::new(
                NotificationKind::ConflictPotential,
                json!({
                    "agentId": agent_id,
                    "taskId": task_id.to_string(),
                    "files": &event.files,
                    "agents": &event.agents,
                    "severity": event.severity,
                    "recommendation": &event.recommendation,
                }),
            ));
            info!(
                agent_id,
                files = ?event.files,
                severity = ?event.severity,
                "potential conflict detected"
            );
        }

        conflicts
    }

    /// Release every lock an agent holds. Idempotent: releasing an agent
    /// that holds nothing is a no-op.
    pub fn release_agent_locks(&self, agent_id: &str) {
        let mut state = self.state.lock().expect("conflict monitor lock poisoned");
        let Some(paths) = state.agent_paths.remove(agent_id) else {
            return;
        };
        for path in &paths {
            state.locks.remove(path);
        }
        debug!(agent_id, released = paths.len(), "agent locks released");
    }

    /// Pre-dispatch gate: would assigning `task` to `candidate` overlap
    /// with files another agent currently holds?
    pub fn check_task_assignment(&self, task: &Task, candidate: &str) -> AssignmentCheck {
        let state = self.state.lock().expect("conflict monitor lock poisoned");
        let potential_conflicts: Vec<String> = task
            .context
            .files
            .iter()
            .filter(|path| {
                state
                    .locks
                    .get(*path)
                    .is_some_and(|lock| lock.agent_id != candidate)
            })
            .cloned()
            .collect();

        AssignmentCheck {
            safe: potential_conflicts.is_empty(),
            potential_conflicts,
        }
    }

    /// Directories where more than one agent is currently active.
    pub fn detect_feature_overlap(&self) -> Vec<FeatureOverlap> {
        let state = self.state.lock().expect("conflict monitor lock poisoned");
        let mut by_dir: HashMap<&str, HashSet<&str>> = HashMap::new();
        for (path, lock) in &state.locks {
            by_dir
                .entry(parent_dir(path))
                .or_default()
                .insert(lock.agent_id.as_str());
        }

        let mut overlaps: Vec<FeatureOverlap> = by_dir
            .into_iter()
            .filter(|(_, agents)| agents.len() > 1)
            .map(|(dir, agents)| {
                let mut agents: Vec<String> = agents.into_iter().map(String::from).collect();
                agents.sort();
                FeatureOverlap {
                    directory: dir.to_string(),
                    agents,
                }
            })
            .collect();
        overlaps.sort_by(|a, b| a.directory.cmp(&b.directory));
        overlaps
    }

    /// Per-file and per-agent-pair counts over the bounded history.
    pub fn stats(&self) -> ConflictStats {
        let state = self.state.lock().expect("conflict monitor lock poisoned");
        let mut stats = ConflictStats {
            total: state.history.len(),
            ..ConflictStats::default()
        };

        for event in &state.history {
            for file in &event.files {
                *stats.by_file.entry(file.clone()).or_insert(0) += 1;
            }
            if let [a, b] = event.agents.as_slice() {
                let key = if a <= b {
                    format!("{a}<->{b}")
                } else {
                    format!("{b}<->{a}")
                };
                *stats.by_agent_pair.entry(key).or_insert(0) += 1;
            }
        }
        stats
    }

    /// Current lock held on a path, if any.
    pub fn lock_holder(&self, path: &str) -> Option<FileLock> {
        let state = self.state.lock().expect("conflict monitor lock poisoned");
        state.locks.get(path).cloned()
    }

    pub fn locked_path_count(&self) -> usize {
        let state = self.state.lock().expect("conflict monitor lock poisoned");
        state.locks.len()
    }
}

fn severity_for(path: &str, new_branch: &str, held_branch: &str) -> ConflictSeverity {
    if new_branch == held_branch || is_critical_file(path) {
        ConflictSeverity::High
    } else if is_test_file(path) {
        ConflictSeverity::Low
    } else {
        ConflictSeverity::Medium
    }
}

fn recommendation_for(path: &str, existing: &FileLock, now: DateTime<Utc>) -> String {
    if now - existing.locked_at > Duration::minutes(STALE_LOCK_MINUTES) {
        return format!(
            "lock on {path} held by {} for over {STALE_LOCK_MINUTES} minutes - check whether that agent is stale",
            existing.agent_id
        );
    }
    let name = basename(path);
    if name.contains("index") || name.contains("main") {
        return format!("{path} is a high-traffic entry point - run these tasks sequentially");
    }
    format!("wait for {} to finish with {path}", existing.agent_id)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
