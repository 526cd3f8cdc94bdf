use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// TaskType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Code,
    Test,
    Review,
    Doc,
    Security,
}

impl TaskType {
    /// Stable lowercase label used in log fields and score-board keys.
    pub fn label(&self) -> &'static str {
        match self {
            TaskType::Code => "code",
            TaskType::Test => "test",
            TaskType::Review => "review",
            TaskType::Doc => "doc",
            TaskType::Security => "security",
        }
    }
}

// ---------------------------------------------------------------------------
// TaskPriority
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    High,
    #[default]
    Normal,
    Low,
}

impl TaskPriority {
    /// Numeric rank for sorting (higher = scheduled first).
    pub fn rank(&self) -> u8 {
        match self {
            TaskPriority::High => 2,
            TaskPriority::Normal => 1,
            TaskPriority::Low => 0,
        }
    }
}

// ---------------------------------------------------------------------------
// ModelChoice
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelChoice {
    Opus,
    #[default]
    Sonnet,
}

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Returns `true` when a transition from `self` to `target` is valid.
    ///
    /// Transitions are monotonic, with one exception: `Assigned -> Pending`
    /// is allowed so the scheduler can revert work held by an agent that
    /// went away (rebalancing).
    pub fn can_transition_to(&self, target: &TaskStatus) -> bool {
        matches!(
            (self, target),
            (TaskStatus::Pending, TaskStatus::Assigned)
                | (TaskStatus::Pending, TaskStatus::Cancelled)
                | (TaskStatus::Assigned, TaskStatus::Pending)
                | (TaskStatus::Assigned, TaskStatus::Running)
                | (TaskStatus::Assigned, TaskStatus::Cancelled)
                | (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::Failed)
                | (TaskStatus::Running, TaskStatus::Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

// ---------------------------------------------------------------------------
// TaskContext
// ---------------------------------------------------------------------------

/// Scope of a task inside the target repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    pub branch: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
    pub repository: Option<String>,
    pub base_commit: Option<String>,
}

impl TaskContext {
    pub fn for_branch(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            files: Vec::new(),
            dependencies: Vec::new(),
            repository: None,
            base_commit: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub task_type: TaskType,
    pub priority: TaskPriority,
    /// Explicit model preference; the router decides when absent.
    pub model: Option<ModelChoice>,
    pub prompt: String,
    pub context: TaskContext,
    pub max_tokens: Option<u32>,
    pub timeout_minutes: u32,
    pub budget_cents: u32,
    pub created_at: DateTime<Utc>,
    pub parent_task_id: Option<Uuid>,
    pub assigned_agent: Option<String>,
    pub status: TaskStatus,
}

impl Task {
    pub fn new(task_type: TaskType, prompt: impl Into<String>, context: TaskContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type,
            priority: TaskPriority::Normal,
            model: None,
            prompt: prompt.into(),
            context,
            max_tokens: None,
            timeout_minutes: 30,
            budget_cents: 100,
            created_at: Utc::now(),
            parent_task_id: None,
            assigned_agent: None,
            status: TaskStatus::Pending,
        }
    }

    pub fn timeout_ms(&self) -> u64 {
        u64::from(self.timeout_minutes) * 60_000
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Initializing,
    Running,
    Completed,
    Failed,
    Terminated,
}

impl AgentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentStatus::Completed | AgentStatus::Failed | AgentStatus::Terminated
        )
    }

    /// Agents counted against live capacity.
    pub fn is_active(&self) -> bool {
        matches!(self, AgentStatus::Initializing | AgentStatus::Running)
    }
}

/// Running token counters for a single agent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cached_tokens
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Opaque id; providers use `swarm-agent-<first-8-of-task-id>` for
    /// traceability but callers must not parse it.
    pub id: String,
    pub status: AgentStatus,
    pub current_task: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub branch: Option<String>,
    pub usage: TokenUsage,
    pub cost_cents: u32,
}

impl Agent {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: AgentStatus::Initializing,
            current_task: None,
            started_at: Utc::now(),
            completed_at: None,
            branch: None,
            usage: TokenUsage::default(),
            cost_cents: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// TaskResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Add,
    Modify,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub action: FileAction,
}

/// One result per task, keyed by task id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub agent_id: String,
    pub status: ResultStatus,
    #[serde(default)]
    pub outputs: Vec<FileChange>,
    pub summary: Option<String>,
    /// Free-form test/review records emitted by the worker.
    pub reports: Option<serde_json::Value>,
    pub usage: TokenUsage,
    pub duration_ms: u64,
    pub cost_cents: u32,
    pub base_commit: Option<String>,
    pub result_commit: Option<String>,
    pub conflicts: Option<Vec<String>>,
    pub error: Option<String>,
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}

// ---------------------------------------------------------------------------
// Budget
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub per_task_max_cents: u32,
    pub daily_limit_cents: u64,
    pub weekly_limit_cents: u64,
    pub alert_threshold_percent: u8,
    pub pause_threshold_percent: u8,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            per_task_max_cents: 500,
            daily_limit_cents: 5_000,
            weekly_limit_cents: 25_000,
            alert_threshold_percent: 80,
            pause_threshold_percent: 100,
        }
    }
}

/// Process-wide spend counters. Mutated only through the store's atomic
/// increment operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetState {
    pub daily_used_cents: u64,
    pub weekly_used_cents: u64,
    pub paused: bool,
    pub updated_at: DateTime<Utc>,
}

impl Default for BudgetState {
    fn default() -> Self {
        Self {
            daily_used_cents: 0,
            weekly_used_cents: 0,
            paused: false,
            updated_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// PerfRecord
// ---------------------------------------------------------------------------

/// Exponentially-smoothed performance history for one (agent, task type)
/// pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerfRecord {
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub avg_cost_cents: f64,
    pub completed_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl Default for PerfRecord {
    fn default() -> Self {
        Self {
            success_rate: 0.5,
            avg_duration_ms: 300_000.0,
            avg_cost_cents: 100.0,
            completed_count: 0,
            updated_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// FileLock
// ---------------------------------------------------------------------------

/// In-process lock on a single file path. At most one per path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileLock {
    pub agent_id: String,
    pub task_id: Uuid,
    pub branch: String,
    pub locked_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
