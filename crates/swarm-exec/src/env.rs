use uuid::Uuid;

use swarm_core::types::{ModelChoice, Task};

use crate::provider::{ProviderError, Result};

/// Env var names the worker container reads.
pub const ENV_TASK_ID: &str = "TASK_ID";
pub const ENV_TASK_JSON: &str = "TASK_JSON";
pub const ENV_AGENT_ID: &str = "AGENT_ID";
pub const ENV_MODEL: &str = "MODEL";
pub const ENV_LLM_API_KEY: &str = "ANTHROPIC_API_KEY";
pub const ENV_SCM_TOKEN: &str = "GITHUB_TOKEN";

/// Queue bindings, zeroed so the worker runs in stdout mode instead of
/// trying to consume from an external queue.
const QUEUE_BINDING_VARS: [&str; 3] = ["SWARM_QUEUE_URL", "SWARM_QUEUE_NAME", "SWARM_RESULT_QUEUE"];

// ---------------------------------------------------------------------------
// WorkerSecrets
// ---------------------------------------------------------------------------

/// Credentials injected into every worker. Resolved once from the
/// orchestrator's environment, then passed explicitly to spawns.
#[derive(Debug, Clone)]
pub struct WorkerSecrets {
    pub llm_api_key: String,
    pub scm_token: Option<String>,
}

impl WorkerSecrets {
    /// Read secrets from the process environment. The LLM key is
    /// required; the source-control token is optional.
    pub fn from_env() -> Result<Self> {
        let llm_api_key = std::env::var(ENV_LLM_API_KEY)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ProviderError::MissingToken(ENV_LLM_API_KEY.into()))?;
        let scm_token = std::env::var(ENV_SCM_TOKEN).ok().filter(|t| !t.is_empty());
        Ok(Self {
            llm_api_key,
            scm_token,
        })
    }
}

// ---------------------------------------------------------------------------
// Worker environment
// ---------------------------------------------------------------------------

/// Derive the agent id from the first 8 characters of the task id.
/// Traceability only; callers must never parse it.
pub fn agent_id_for_task(task_id: Uuid) -> String {
    let full = task_id.to_string();
    format!("swarm-agent-{}", &full[..8])
}

/// Build the environment block for a worker spawn: the serialised task
/// payload, ids, model, credentials, and zeroed queue bindings.
pub fn worker_env(
    task: &Task,
    agent_id: &str,
    secrets: &WorkerSecrets,
) -> Result<Vec<(String, String)>> {
    let task_json = serde_json::to_string(task)
        .map_err(|e| ProviderError::Parse(format!("task serialization: {e}")))?;

    let model = match task.model.unwrap_or_default() {
        ModelChoice::Opus => "opus",
        ModelChoice::Sonnet => "sonnet",
    };

    let mut env = vec![
        (ENV_TASK_ID.to_string(), task.id.to_string()),
        (ENV_TASK_JSON.to_string(), task_json),
        (ENV_AGENT_ID.to_string(), agent_id.to_string()),
        (ENV_MODEL.to_string(), model.to_string()),
        (ENV_LLM_API_KEY.to_string(), secrets.llm_api_key.clone()),
    ];

    if let Some(token) = &secrets.scm_token {
        env.push((ENV_SCM_TOKEN.to_string(), token.clone()));
    }

    for var in QUEUE_BINDING_VARS {
        env.push((var.to_string(), String::new()));
    }

    Ok(env)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_core::types::{TaskContext, TaskType};

    fn secrets() -> WorkerSecrets {
        WorkerSecrets {
            llm_api_key: "sk-test-key".into(),
            scm_token: None,
        }
    }

    #[test]
    fn agent_id_uses_first_eight_chars() {
        let id = Uuid::parse_str("a1b2c3d4-e5f6-7890-abcd-ef1234567890").unwrap();
        assert_eq!(agent_id_for_task(id), "swarm-agent-a1b2c3d4");
    }

    #[test]
    fn worker_env_carries_payload_and_zeroed_queue_vars() {
        let task = Task::new(TaskType::Code, "do it", TaskContext::for_branch("main"));
        let agent_id = agent_id_for_task(task.id);
        let env = worker_env(&task, &agent_id, &secrets()).unwrap();

        let get = |name: &str| env.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone());

        assert_eq!(get(ENV_TASK_ID).unwrap(), task.id.to_string());
        assert_eq!(get(ENV_AGENT_ID).unwrap(), agent_id);
        assert_eq!(get(ENV_MODEL).unwrap(), "sonnet");
        assert_eq!(get(ENV_LLM_API_KEY).unwrap(), "sk-test-key");
        let parsed: Task = serde_json::from_str(&get(ENV_TASK_JSON).unwrap()).unwrap();
        assert_eq!(parsed.id, task.id);

        for var in QUEUE_BINDING_VARS {
            assert_eq!(get(var).unwrap(), "", "{var} must be zeroed");
        }
    }

    #[test]
    fn scm_token_is_omitted_when_absent() {
        let task = Task::new(TaskType::Doc, "docs", TaskContext::for_branch("main"));
        let env = worker_env(&task, "swarm-agent-00000000", &secrets()).unwrap();
        assert!(env.iter().all(|(k, _)| k != ENV_SCM_TOKEN));

        let with_token = WorkerSecrets {
            llm_api_key: "sk-test-key".into(),
            scm_token: Some("ghp_token".into()),
        };
        let env = worker_env(&task, "swarm-agent-00000000", &with_token).unwrap();
        assert!(env.iter().any(|(k, v)| k == ENV_SCM_TOKEN && v == "ghp_token"));
    }

    #[test]
    fn explicit_opus_model_is_passed_through() {
        let mut task = Task::new(TaskType::Code, "p", TaskContext::for_branch("main"));
        task.model = Some(swarm_core::types::ModelChoice::Opus);
        let env = worker_env(&task, "swarm-agent-00000000", &secrets()).unwrap();
        assert!(env.iter().any(|(k, v)| k == ENV_MODEL && v == "opus"));
    }
}
