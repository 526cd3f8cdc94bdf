use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::protocol::Notification;

/// A broadcast-style event bus built on top of flume channels, with a
/// bounded history ring for welcome replay.
///
/// Each call to [`subscribe`](EventBus::subscribe) creates a new receiver
/// that will receive all notifications published after the subscription
/// was created. The bus is thread-safe and can be cloned cheaply (it
/// wraps its internals in an `Arc`). Slow or gone subscribers are never
/// an error: disconnected receivers are pruned on the next publish.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    senders: Vec<flume::Sender<Notification>>,
    history: VecDeque<Notification>,
    history_limit: usize,
}

impl EventBus {
    /// Create a new, empty event bus keeping the last `history_limit`
    /// notifications for replay.
    pub fn new(history_limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                senders: Vec::new(),
                history: VecDeque::new(),
                history_limit,
            })),
        }
    }

    /// Register a new subscriber and return its receiving end.
    pub fn subscribe(&self) -> flume::Receiver<Notification> {
        let (tx, rx) = flume::unbounded();
        let mut inner = self.inner.lock().expect("EventBus lock poisoned");
        inner.senders.push(tx);
        rx
    }

    /// Publish a notification to all current subscribers and append it to
    /// the history ring. Disconnected subscribers are pruned.
    pub fn publish(&self, event: Notification) {
        let mut inner = self.inner.lock().expect("EventBus lock poisoned");
        inner.senders.retain(|tx| tx.send(event.clone()).is_ok());

        inner.history.push_back(event);
        while inner.history.len() > inner.history_limit {
            inner.history.pop_front();
        }
    }

    /// The most recent `limit` notifications, oldest first.
    pub fn history(&self, limit: usize) -> Vec<Notification> {
        let inner = self.inner.lock().expect("EventBus lock poisoned");
        let skip = inner.history.len().saturating_sub(limit);
        inner.history.iter().skip(skip).cloned().collect()
    }

    /// Return the number of currently active subscribers.
    pub fn subscriber_count(&self) -> usize {
        let inner = self.inner.lock().expect("EventBus lock poisoned");
        inner.senders.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::NotificationKind;
    use serde_json::json;

    fn event(kind: NotificationKind) -> Notification {
        Notification::new(kind, json!({}))
    }

    #[test]
    fn subscribers_receive_published_events() {
        let bus = EventBus::default();
        let rx = bus.subscribe();

        bus.publish(event(NotificationKind::TaskCreated));
        let received = rx.try_recv().unwrap();
        assert_eq!(received.kind, NotificationKind::TaskCreated);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::default();
        let rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        drop(rx);
        bus.publish(event(NotificationKind::SystemHealth));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn history_is_bounded_fifo() {
        let bus = EventBus::new(3);
        bus.publish(event(NotificationKind::TaskCreated));
        bus.publish(event(NotificationKind::TaskAssigned));
        bus.publish(event(NotificationKind::TaskStarted));
        bus.publish(event(NotificationKind::TaskCompleted));

        let history = bus.history(10);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].kind, NotificationKind::TaskAssigned);
        assert_eq!(history[2].kind, NotificationKind::TaskCompleted);
    }

    #[test]
    fn history_limit_takes_most_recent() {
        let bus = EventBus::new(100);
        for _ in 0..20 {
            bus.publish(event(NotificationKind::TaskProgress));
        }
        bus.publish(event(NotificationKind::BudgetWarning));

        let last_10 = bus.history(10);
        assert_eq!(last_10.len(), 10);
        assert_eq!(last_10.last().unwrap().kind, NotificationKind::BudgetWarning);
    }

    #[test]
    fn publish_without_subscribers_is_a_noop() {
        let bus = EventBus::default();
        bus.publish(event(NotificationKind::AgentSpawned));
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.history(10).len(), 1);
    }
}
