//! Subscription registry and event fan-out.

use std::collections::HashSet;

use nextmeet_core::protocol::{self, Event};
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

/// The `next` topic is shorthand for the `next_changed` event.
fn canonical_topic(topic: String) -> String {
    if topic == "next" {
        "next_changed".to_string()
    } else {
        topic
    }
}

struct Subscriber {
    conn_id: u64,
    topics: HashSet<String>,
    tx: UnboundedSender<String>,
}

impl Subscriber {
    fn wants(&self, event_name: &str) -> bool {
        // An empty topic set subscribes to all topics.
        self.topics.is_empty() || self.topics.contains(event_name)
    }
}

/// Registry of connections that asked for event delivery.
///
/// Tolerates subscribe/remove racing with an in-flight broadcast: the lock
/// is held for the whole fan-out, and a failed write drops that subscriber
/// without affecting the others.
#[derive(Default)]
pub struct Hub {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Hub {
    /// Register a connection's outbound channel for the given topics.
    /// Subscribing again replaces the previous topic set.
    pub fn subscribe(&self, conn_id: u64, topics: Vec<String>, tx: UnboundedSender<String>) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| s.conn_id != conn_id);
        subscribers.push(Subscriber {
            conn_id,
            topics: topics.into_iter().map(canonical_topic).collect(),
            tx,
        });
    }

    /// Drop a connection from the registry (no-op if it never subscribed).
    pub fn remove(&self, conn_id: u64) {
        self.subscribers.lock().retain(|s| s.conn_id != conn_id);
    }

    /// Deliver an event to every interested subscriber, at most once each.
    /// Subscribers whose connection is gone are pruned.
    pub fn broadcast(&self, event: &Event) {
        let line = match protocol::to_json_line(event) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("dropping undeliverable event {}: {e}", event.event);
                return;
            }
        };
        self.subscribers.lock().retain(|s| {
            if !s.wants(&event.event) {
                return true;
            }
            s.tx.send(line.clone()).is_ok()
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc::unbounded_channel;

    fn event(name: &str) -> Event {
        Event::new(name, json!({"n": 1}))
    }

    #[test]
    fn test_delivers_only_to_matching_topics() {
        let hub = Hub::default();
        let (next_tx, mut next_rx) = unbounded_channel();
        let (notif_tx, mut notif_rx) = unbounded_channel();
        hub.subscribe(1, vec!["next".to_string()], next_tx);
        hub.subscribe(2, vec!["notification".to_string()], notif_tx);

        // Topic "next" is shorthand for the next_changed event.
        hub.broadcast(&event("next_changed"));
        assert!(next_rx.try_recv().is_ok());
        assert!(notif_rx.try_recv().is_err());

        hub.broadcast(&event("notification"));
        assert!(next_rx.try_recv().is_err());
        assert!(notif_rx.try_recv().is_ok());
    }

    #[test]
    fn test_empty_topic_set_receives_everything() {
        let hub = Hub::default();
        let (tx, mut rx) = unbounded_channel();
        hub.subscribe(1, vec![], tx);

        hub.broadcast(&event("next_changed"));
        hub.broadcast(&event("morning_agenda"));
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_dead_subscriber_is_pruned_without_affecting_others() {
        let hub = Hub::default();
        let (dead_tx, dead_rx) = unbounded_channel();
        let (live_tx, mut live_rx) = unbounded_channel();
        hub.subscribe(1, vec![], dead_tx);
        hub.subscribe(2, vec![], live_tx);
        drop(dead_rx);

        hub.broadcast(&event("next_changed"));
        assert_eq!(hub.subscriber_count(), 1);
        assert!(live_rx.try_recv().is_ok());
    }

    #[test]
    fn test_resubscribe_replaces_topics() {
        let hub = Hub::default();
        let (tx, mut rx) = unbounded_channel();
        hub.subscribe(1, vec!["next_changed".to_string()], tx.clone());
        hub.subscribe(1, vec!["notification".to_string()], tx);
        assert_eq!(hub.subscriber_count(), 1);

        hub.broadcast(&event("next_changed"));
        assert!(rx.try_recv().is_err());
        hub.broadcast(&event("notification"));
        assert!(rx.try_recv().is_ok());
    }
}
