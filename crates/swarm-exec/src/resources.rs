use serde::{Deserialize, Serialize};

use swarm_core::types::{ModelChoice, Task, TaskType};

// ---------------------------------------------------------------------------
// ResourceTier
// ---------------------------------------------------------------------------

/// CPU/memory class a worker machine is provisioned with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceTier {
    Light,
    Standard,
    Heavy,
}

impl ResourceTier {
    pub fn cpus(&self) -> u32 {
        match self {
            ResourceTier::Light => 1,
            ResourceTier::Standard => 2,
            ResourceTier::Heavy => 4,
        }
    }

    pub fn memory_mb(&self) -> u32 {
        match self {
            ResourceTier::Light => 1_024,
            ResourceTier::Standard => 2_048,
            ResourceTier::Heavy => 4_096,
        }
    }
}

/// Map a task to its resource tier.
///
/// Rules, first match wins: security work is always heavy; opus-driven
/// code tasks are heavy; docs are light; small reviews (< 3 files) are
/// light; everything else is standard.
pub fn tier_for_task(task: &Task) -> ResourceTier {
    if task.task_type == TaskType::Security {
        return ResourceTier::Heavy;
    }
    if task.model == Some(ModelChoice::Opus) && task.task_type == TaskType::Code {
        return ResourceTier::Heavy;
    }
    if task.task_type == TaskType::Doc {
        return ResourceTier::Light;
    }
    if task.task_type == TaskType::Review && task.context.files.len() < 3 {
        return ResourceTier::Light;
    }
    ResourceTier::Standard
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_core::types::TaskContext;

    fn task_of(task_type: TaskType) -> Task {
        Task::new(task_type, "p", TaskContext::for_branch("main"))
    }

    #[test]
    fn security_is_always_heavy() {
        let task = task_of(TaskType::Security);
        assert_eq!(tier_for_task(&task), ResourceTier::Heavy);
    }

    #[test]
    fn opus_code_is_heavy() {
        let mut task = task_of(TaskType::Code);
        task.model = Some(ModelChoice::Opus);
        assert_eq!(tier_for_task(&task), ResourceTier::Heavy);
    }

    #[test]
    fn sonnet_code_is_standard() {
        let mut task = task_of(TaskType::Code);
        task.model = Some(ModelChoice::Sonnet);
        assert_eq!(tier_for_task(&task), ResourceTier::Standard);
    }

    #[test]
    fn doc_is_light() {
        assert_eq!(tier_for_task(&task_of(TaskType::Doc)), ResourceTier::Light);
    }

    #[test]
    fn small_review_is_light_large_review_is_standard() {
        let mut review = task_of(TaskType::Review);
        review.context.files = vec!["a.rs".into(), "b.rs".into()];
        assert_eq!(tier_for_task(&review), ResourceTier::Light);

        review.context.files.push("c.rs".into());
        assert_eq!(tier_for_task(&review), ResourceTier::Standard);
    }

    #[test]
    fn tier_dimensions() {
        assert_eq!(ResourceTier::Light.cpus(), 1);
        assert_eq!(ResourceTier::Light.memory_mb(), 1_024);
        assert_eq!(ResourceTier::Standard.cpus(), 2);
        assert_eq!(ResourceTier::Heavy.cpus(), 4);
        assert_eq!(ResourceTier::Heavy.memory_mb(), 4_096);
    }
}
