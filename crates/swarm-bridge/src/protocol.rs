use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// NotificationKind
// ---------------------------------------------------------------------------

/// The closed set of event types pushed to subscribed clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    TaskCreated,
    TaskAssigned,
    TaskStarted,
    TaskProgress,
    TaskCompleted,
    TaskFailed,
    AgentSpawned,
    AgentIdle,
    AgentTerminated,
    ConflictPotential,
    ConflictDetected,
    ConflictResolved,
    BudgetWarning,
    BudgetPaused,
    SystemHealth,
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// Wire envelope: `{type, timestamp, data}`, UTF-8 JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl Notification {
    pub fn new(kind: NotificationKind, data: serde_json::Value) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            data,
        }
    }

    /// The `data.taskId` field, when present.
    pub fn task_id(&self) -> Option<Uuid> {
        self.data
            .get("taskId")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    /// The `data.agentId` field, when present.
    pub fn agent_id(&self) -> Option<&str> {
        self.data.get("agentId").and_then(|v| v.as_str())
    }
}

// ---------------------------------------------------------------------------
// Client messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAction {
    Subscribe,
    Unsubscribe,
    History,
}

/// Message a connected client sends over the notification channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    pub action: ClientAction,
    #[serde(default)]
    pub filter: Option<EventFilter>,
}

// ---------------------------------------------------------------------------
// EventFilter
// ---------------------------------------------------------------------------

/// Subscription filter. Matching is conjunctive: every set criterion must
/// hold. An unset criterion matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(default)]
    pub types: Option<Vec<NotificationKind>>,
    #[serde(default, rename = "taskIds")]
    pub task_ids: Option<Vec<Uuid>>,
    #[serde(default, rename = "agentIds")]
    pub agent_ids: Option<Vec<String>>,
}

impl EventFilter {
    pub fn matches(&self, event: &Notification) -> bool {
        if let Some(types) = &self.types {
            if !types.contains(&event.kind) {
                return false;
            }
        }
        if let Some(task_ids) = &self.task_ids {
            match event.task_id() {
                Some(id) if task_ids.contains(&id) => {}
                _ => return false,
            }
        }
        if let Some(agent_ids) = &self.agent_ids {
            match event.agent_id() {
                Some(id) if agent_ids.iter().any(|a| a == id) => {}
                _ => return false,
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_serializes_kebab_case() {
        let json = serde_json::to_string(&NotificationKind::TaskCompleted).unwrap();
        assert_eq!(json, "\"task-completed\"");
        let json = serde_json::to_string(&NotificationKind::ConflictPotential).unwrap();
        assert_eq!(json, "\"conflict-potential\"");
    }

    #[test]
    fn envelope_uses_type_field() {
        let event = Notification::new(NotificationKind::SystemHealth, json!({"ok": true}));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "system-health");
        assert!(value["timestamp"].is_string());
        assert_eq!(value["data"]["ok"], true);
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = EventFilter::default();
        let event = Notification::new(NotificationKind::TaskCreated, json!({}));
        assert!(filter.matches(&event));
    }

    #[test]
    fn type_filter_is_exact() {
        let filter = EventFilter {
            types: Some(vec![NotificationKind::TaskCompleted]),
            ..EventFilter::default()
        };
        let completed = Notification::new(NotificationKind::TaskCompleted, json!({}));
        let failed = Notification::new(NotificationKind::TaskFailed, json!({}));
        assert!(filter.matches(&completed));
        assert!(!filter.matches(&failed));
    }

    #[test]
    fn task_filter_requires_matching_task_id() {
        let id = Uuid::new_v4();
        let filter = EventFilter {
            task_ids: Some(vec![id]),
            ..EventFilter::default()
        };

        let matching = Notification::new(
            NotificationKind::TaskStarted,
            json!({"taskId": id.to_string()}),
        );
        let other = Notification::new(
            NotificationKind::TaskStarted,
            json!({"taskId": Uuid::new_v4().to_string()}),
        );
        let absent = Notification::new(NotificationKind::TaskStarted, json!({}));

        assert!(filter.matches(&matching));
        assert!(!filter.matches(&other));
        // Filter names a task id but the event carries none.
        assert!(!filter.matches(&absent));
    }

    #[test]
    fn filters_are_conjunctive() {
        let id = Uuid::new_v4();
        let filter = EventFilter {
            types: Some(vec![NotificationKind::TaskCompleted]),
            task_ids: Some(vec![id]),
            agent_ids: None,
        };

        let right_type_wrong_task = Notification::new(
            NotificationKind::TaskCompleted,
            json!({"taskId": Uuid::new_v4().to_string()}),
        );
        let right_both = Notification::new(
            NotificationKind::TaskCompleted,
            json!({"taskId": id.to_string()}),
        );
        assert!(!filter.matches(&right_type_wrong_task));
        assert!(filter.matches(&right_both));
    }

    #[test]
    fn client_message_parses() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"action": "subscribe", "filter": {"types": ["budget-warning"]}}"#,
        )
        .unwrap();
        assert_eq!(msg.action, ClientAction::Subscribe);
        assert_eq!(
            msg.filter.unwrap().types.unwrap(),
            vec![NotificationKind::BudgetWarning]
        );
    }
}
