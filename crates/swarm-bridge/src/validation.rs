//! Schema validation for the task-submission payload.
//!
//! Failures are collected per field rather than short-circuiting, so the
//! caller sees every problem in one round trip.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use swarm_core::types::{ModelChoice, Task, TaskContext, TaskPriority, TaskStatus, TaskType};

use crate::api_error::FieldError;

pub const MAX_TASKS_PER_CALL: usize = 20;
pub const MAX_PROMPT_CHARS: usize = 50_000;
pub const MAX_BRANCH_CHARS: usize = 255;
pub const MAX_FILES: usize = 100;
pub const MAX_FILE_PATH_CHARS: usize = 500;
pub const MAX_DEPENDENCIES: usize = 50;
pub const MAX_TOKENS_CAP: u32 = 200_000;
pub const MAX_TIMEOUT_MINUTES: u32 = 120;
pub const MAX_BUDGET_CENTS: u32 = 10_000;

// ---------------------------------------------------------------------------
// Request DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTasksRequest {
    pub tasks: Vec<TaskSubmission>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSubmission {
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub priority: TaskPriority,
    /// Absent means "let the router decide" — no sentinel default here.
    #[serde(default)]
    pub model: Option<ModelChoice>,
    pub prompt: String,
    pub context: SubmissionContext,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub timeout_minutes: Option<u32>,
    #[serde(default)]
    pub budget_cents: Option<u32>,
    #[serde(default)]
    pub parent_task_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionContext {
    pub branch: String,
    #[serde(default)]
    pub files: Vec<String>,
    /// Task ids in UUID form; parsed during validation.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub base_commit: Option<String>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn branch_char_ok(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/')
}

fn is_hex40(s: &str) -> bool {
    s.len() == 40 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Validate a submission envelope and convert it into domain tasks.
///
/// Returns every field error at once; tasks are only materialised when
/// the whole payload is clean.
pub fn validate_submission(req: &SubmitTasksRequest) -> Result<Vec<Task>, Vec<FieldError>> {
    let mut errors = Vec::new();

    if req.tasks.is_empty() || req.tasks.len() > MAX_TASKS_PER_CALL {
        errors.push(FieldError::new(
            "tasks",
            format!("must contain 1-{MAX_TASKS_PER_CALL} tasks"),
        ));
        return Err(errors);
    }

    let mut tasks = Vec::with_capacity(req.tasks.len());

    for (i, sub) in req.tasks.iter().enumerate() {
        let field = |name: &str| format!("tasks[{i}].{name}");

        let prompt_chars = sub.prompt.chars().count();
        if prompt_chars == 0 || prompt_chars > MAX_PROMPT_CHARS {
            errors.push(FieldError::new(
                field("prompt"),
                format!("must be 1-{MAX_PROMPT_CHARS} characters"),
            ));
        }

        let branch = &sub.context.branch;
        if branch.is_empty()
            || branch.chars().count() > MAX_BRANCH_CHARS
            || !branch.chars().all(branch_char_ok)
        {
            errors.push(FieldError::new(
                field("context.branch"),
                "must be 1-255 characters of [A-Za-z0-9._-/]",
            ));
        }

        if sub.context.files.len() > MAX_FILES {
            errors.push(FieldError::new(
                field("context.files"),
                format!("at most {MAX_FILES} paths"),
            ));
        }
        for (j, path) in sub.context.files.iter().enumerate() {
            if path.is_empty() || path.chars().count() > MAX_FILE_PATH_CHARS {
                errors.push(FieldError::new(
                    format!("tasks[{i}].context.files[{j}]"),
                    format!("must be 1-{MAX_FILE_PATH_CHARS} characters"),
                ));
            }
        }

        if sub.context.dependencies.len() > MAX_DEPENDENCIES {
            errors.push(FieldError::new(
                field("context.dependencies"),
                format!("at most {MAX_DEPENDENCIES} task ids"),
            ));
        }
        let mut dependencies = Vec::with_capacity(sub.context.dependencies.len());
        for (j, dep) in sub.context.dependencies.iter().enumerate() {
            match Uuid::parse_str(dep) {
                Ok(id) => dependencies.push(id),
                Err(_) => errors.push(FieldError::new(
                    format!("tasks[{i}].context.dependencies[{j}]"),
                    "must be a UUID",
                )),
            }
        }

        if let Some(repo) = &sub.context.repository {
            if !(repo.starts_with("http://") || repo.starts_with("https://")) {
                errors.push(FieldError::new(
                    field("context.repository"),
                    "must be an http(s) URL",
                ));
            }
        }

        if let Some(commit) = &sub.context.base_commit {
            if !is_hex40(commit) {
                errors.push(FieldError::new(
                    field("context.baseCommit"),
                    "must be a 40-character hex commit hash",
                ));
            }
        }

        if let Some(max_tokens) = sub.max_tokens {
            if max_tokens == 0 || max_tokens > MAX_TOKENS_CAP {
                errors.push(FieldError::new(
                    field("maxTokens"),
                    format!("must be 1-{MAX_TOKENS_CAP}"),
                ));
            }
        }

        if let Some(timeout) = sub.timeout_minutes {
            if timeout == 0 || timeout > MAX_TIMEOUT_MINUTES {
                errors.push(FieldError::new(
                    field("timeoutMinutes"),
                    format!("must be 1-{MAX_TIMEOUT_MINUTES}"),
                ));
            }
        }

        if let Some(budget) = sub.budget_cents {
            if budget == 0 || budget > MAX_BUDGET_CENTS {
                errors.push(FieldError::new(
                    field("budgetCents"),
                    format!("must be 1-{MAX_BUDGET_CENTS}"),
                ));
            }
        }

        if errors.is_empty() {
            let mut task = Task::new(
                sub.task_type,
                sub.prompt.clone(),
                TaskContext {
                    branch: branch.clone(),
                    files: sub.context.files.clone(),
                    dependencies,
                    repository: sub.context.repository.clone(),
                    base_commit: sub.context.base_commit.clone(),
                },
            );
            task.priority = sub.priority;
            task.model = sub.model;
            task.max_tokens = sub.max_tokens;
            if let Some(timeout) = sub.timeout_minutes {
                task.timeout_minutes = timeout;
            }
            if let Some(budget) = sub.budget_cents {
                task.budget_cents = budget;
            }
            task.parent_task_id = sub.parent_task_id;
            debug_assert_eq!(task.status, TaskStatus::Pending);
            tasks.push(task);
        }
    }

    if errors.is_empty() {
        Ok(tasks)
    } else {
        Err(errors)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(prompt: &str) -> TaskSubmission {
        TaskSubmission {
            task_type: TaskType::Code,
            priority: TaskPriority::Normal,
            model: None,
            prompt: prompt.to_string(),
            context: SubmissionContext {
                branch: "main".into(),
                files: vec!["src/lib.rs".into()],
                dependencies: vec![],
                repository: None,
                base_commit: None,
            },
            max_tokens: None,
            timeout_minutes: None,
            budget_cents: None,
            parent_task_id: None,
        }
    }

    fn request(tasks: Vec<TaskSubmission>) -> SubmitTasksRequest {
        SubmitTasksRequest { tasks }
    }

    #[test]
    fn empty_batch_is_rejected() {
        let err = validate_submission(&request(vec![])).unwrap_err();
        assert_eq!(err[0].field, "tasks");
    }

    #[test]
    fn oversized_batch_is_rejected() {
        let tasks = (0..21).map(|_| submission("p")).collect();
        let err = validate_submission(&request(tasks)).unwrap_err();
        assert_eq!(err[0].field, "tasks");
    }

    #[test]
    fn batch_of_twenty_is_accepted() {
        let tasks = (0..20).map(|_| submission("p")).collect();
        assert_eq!(validate_submission(&request(tasks)).unwrap().len(), 20);
    }

    #[test]
    fn prompt_boundaries() {
        assert!(validate_submission(&request(vec![submission("")])).is_err());
        assert!(validate_submission(&request(vec![submission("x")])).is_ok());

        let at_cap = "x".repeat(MAX_PROMPT_CHARS);
        assert!(validate_submission(&request(vec![submission(&at_cap)])).is_ok());

        let over_cap = "x".repeat(MAX_PROMPT_CHARS + 1);
        let err = validate_submission(&request(vec![submission(&over_cap)])).unwrap_err();
        assert_eq!(err[0].field, "tasks[0].prompt");
    }

    #[test]
    fn branch_charset_is_enforced() {
        let mut sub = submission("p");
        sub.context.branch = "feature/add-login_v2.1".into();
        assert!(validate_submission(&request(vec![sub])).is_ok());

        let mut sub = submission("p");
        sub.context.branch = "bad branch!".into();
        let err = validate_submission(&request(vec![sub])).unwrap_err();
        assert_eq!(err[0].field, "tasks[0].context.branch");
    }

    #[test]
    fn dependencies_must_be_uuids() {
        let mut sub = submission("p");
        sub.context.dependencies = vec![Uuid::new_v4().to_string(), "not-a-uuid".into()];
        let err = validate_submission(&request(vec![sub])).unwrap_err();
        assert_eq!(err[0].field, "tasks[0].context.dependencies[1]");
    }

    #[test]
    fn base_commit_must_be_40_hex() {
        let mut sub = submission("p");
        sub.context.base_commit = Some("abc123".into());
        assert!(validate_submission(&request(vec![sub])).is_err());

        let mut sub = submission("p");
        sub.context.base_commit = Some("a".repeat(40));
        assert!(validate_submission(&request(vec![sub])).is_ok());
    }

    #[test]
    fn numeric_ranges_are_enforced() {
        let mut sub = submission("p");
        sub.timeout_minutes = Some(121);
        assert!(validate_submission(&request(vec![sub])).is_err());

        let mut sub = submission("p");
        sub.budget_cents = Some(0);
        assert!(validate_submission(&request(vec![sub])).is_err());

        let mut sub = submission("p");
        sub.max_tokens = Some(200_001);
        assert!(validate_submission(&request(vec![sub])).is_err());
    }

    #[test]
    fn defaults_are_applied_when_fields_are_absent() {
        let tasks = validate_submission(&request(vec![submission("p")])).unwrap();
        let task = &tasks[0];
        assert_eq!(task.timeout_minutes, 30);
        assert_eq!(task.budget_cents, 100);
        assert_eq!(task.priority, TaskPriority::Normal);
        assert!(task.model.is_none());
    }

    #[test]
    fn two_identical_payloads_get_distinct_ids() {
        let a = validate_submission(&request(vec![submission("same")])).unwrap();
        let b = validate_submission(&request(vec![submission("same")])).unwrap();
        assert_ne!(a[0].id, b[0].id);
    }

    #[test]
    fn wire_format_uses_camel_case_and_type_tag() {
        let json = r#"{
            "tasks": [{
                "type": "test",
                "prompt": "run the suite",
                "context": {
                    "branch": "main",
                    "files": ["a.rs"],
                    "dependencies": [],
                    "baseCommit": "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
                },
                "timeoutMinutes": 15,
                "budgetCents": 250
            }]
        }"#;
        let req: SubmitTasksRequest = serde_json::from_str(json).unwrap();
        let tasks = validate_submission(&req).unwrap();
        assert_eq!(tasks[0].task_type, TaskType::Test);
        assert_eq!(tasks[0].timeout_minutes, 15);
        assert_eq!(tasks[0].budget_cents, 250);
        assert!(tasks[0].context.base_commit.is_some());
    }
}
