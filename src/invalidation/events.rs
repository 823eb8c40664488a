//! Invalidation events and the pending-event queue.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::util::lock::mutex_lock;

const SOURCE: &str = "invalidation::events";

/// Monotonic epoch for ordering events within this process.
pub type Epoch = u64;

/// Event type, the key invalidation rules are registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    BrokerUpdate,
    BrokerCreate,
    BrokerDelete,
    BulkUpdate,
    ConfigChange,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::BrokerUpdate => "broker_update",
            EventType::BrokerCreate => "broker_create",
            EventType::BrokerDelete => "broker_delete",
            EventType::BulkUpdate => "bulk_update",
            EventType::ConfigChange => "config_change",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What changed in the data layer.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// Fields of one broker changed.
    BrokerUpdate {
        broker_id: String,
        affected_fields: Vec<String>,
        significant: bool,
        before: Value,
        after: Value,
    },
    /// A broker was added.
    BrokerCreate { broker_id: String, broker: Value },
    /// A broker was removed.
    BrokerDelete { broker_id: String },
    /// Many brokers changed at once.
    BulkUpdate {
        broker_ids: Vec<String>,
        operation: String,
    },
    /// Static page configuration changed.
    ConfigChange {
        config_type: String,
        affected_slugs: Vec<String>,
    },
}

impl EventKind {
    pub fn event_type(&self) -> EventType {
        match self {
            EventKind::BrokerUpdate { .. } => EventType::BrokerUpdate,
            EventKind::BrokerCreate { .. } => EventType::BrokerCreate,
            EventKind::BrokerDelete { .. } => EventType::BrokerDelete,
            EventKind::BulkUpdate { .. } => EventType::BulkUpdate,
            EventKind::ConfigChange { .. } => EventType::ConfigChange,
        }
    }

    pub fn entity_id(&self) -> Option<&str> {
        match self {
            EventKind::BrokerUpdate { broker_id, .. }
            | EventKind::BrokerCreate { broker_id, .. }
            | EventKind::BrokerDelete { broker_id } => Some(broker_id),
            EventKind::BulkUpdate { .. } | EventKind::ConfigChange { .. } => None,
        }
    }

    /// Every broker the event names, including each broker of a bulk update.
    pub fn broker_ids(&self) -> Vec<&str> {
        match self {
            EventKind::BulkUpdate { broker_ids, .. } => {
                broker_ids.iter().map(String::as_str).collect()
            }
            other => other.entity_id().into_iter().collect(),
        }
    }

    pub fn affected_fields(&self) -> &[String] {
        match self {
            EventKind::BrokerUpdate {
                affected_fields, ..
            } => affected_fields,
            _ => &[],
        }
    }

    /// Deletions, configuration changes and significant updates skip the
    /// debounce window.
    pub fn is_high_priority(&self) -> bool {
        match self {
            EventKind::BrokerDelete { .. } | EventKind::ConfigChange { .. } => true,
            EventKind::BrokerUpdate { significant, .. } => *significant,
            EventKind::BrokerCreate { .. } | EventKind::BulkUpdate { .. } => false,
        }
    }

    pub fn impact_key(&self) -> ImpactKey {
        match self {
            EventKind::BrokerUpdate { broker_id, .. } => ImpactKey::Broker(broker_id.clone()),
            EventKind::BrokerCreate { .. } | EventKind::BrokerDelete { .. } => {
                ImpactKey::BrokerGlobal
            }
            EventKind::BulkUpdate { .. } => ImpactKey::BulkGlobal,
            EventKind::ConfigChange { .. } => ImpactKey::ConfigGlobal,
        }
    }
}

/// Grouping key for events that affect the same scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImpactKey {
    Broker(String),
    BrokerGlobal,
    BulkGlobal,
    ConfigGlobal,
}

impl fmt::Display for ImpactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImpactKey::Broker(id) => write!(f, "broker:{id}"),
            ImpactKey::BrokerGlobal => f.write_str("broker:global"),
            ImpactKey::BulkGlobal => f.write_str("bulk:global"),
            ImpactKey::ConfigGlobal => f.write_str("config:global"),
        }
    }
}

/// A change notification waiting to be turned into evictions.
#[derive(Debug, Clone)]
pub struct InvalidationEvent {
    /// Unique identifier for log correlation (UUIDv4).
    pub id: Uuid,
    pub epoch: Epoch,
    pub kind: EventKind,
    pub timestamp: OffsetDateTime,
}

impl InvalidationEvent {
    pub fn new(kind: EventKind, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            kind,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn event_type(&self) -> EventType {
        self.kind.event_type()
    }
}

/// FIFO of pending events.
///
/// Failed batches go back to the front so they are retried before anything
/// that arrived while they were being processed.
pub struct EventQueue {
    queue: Mutex<VecDeque<InvalidationEvent>>,
    epoch_counter: AtomicU64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            epoch_counter: AtomicU64::new(0),
        }
    }

    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Wrap `kind` in an event and append it. Returns the queued event.
    pub fn publish(&self, kind: EventKind) -> InvalidationEvent {
        let event = InvalidationEvent::new(kind, self.next_epoch());

        debug!(
            event_id = %event.id,
            event_epoch = event.epoch,
            event_type = %event.event_type(),
            "Invalidation event enqueued"
        );

        mutex_lock(&self.queue, SOURCE, "publish").push_back(event.clone());
        event
    }

    /// Take every pending event, oldest first.
    pub fn drain_all(&self) -> Vec<InvalidationEvent> {
        mutex_lock(&self.queue, SOURCE, "drain_all").drain(..).collect()
    }

    /// Put events back at the head, preserving their order.
    pub fn requeue_front(&self, events: Vec<InvalidationEvent>) {
        let mut queue = mutex_lock(&self.queue, SOURCE, "requeue_front");
        for event in events.into_iter().rev() {
            queue.push_front(event);
        }
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        mutex_lock(&self.queue, SOURCE, "clear").clear();
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn delete(id: &str) -> EventKind {
        EventKind::BrokerDelete {
            broker_id: id.to_string(),
        }
    }

    #[test]
    fn broker_ids_cover_bulk_updates() {
        let bulk = EventKind::BulkUpdate {
            broker_ids: vec!["1".into(), "2".into()],
            operation: "rescore".into(),
        };
        assert_eq!(bulk.broker_ids(), vec!["1", "2"]);
        assert_eq!(delete("3").broker_ids(), vec!["3"]);
        assert!(
            EventKind::ConfigChange {
                config_type: "category".into(),
                affected_slugs: vec![],
            }
            .broker_ids()
            .is_empty()
        );
    }

    #[test]
    fn impact_keys_group_by_scope() {
        let update = EventKind::BrokerUpdate {
            broker_id: "7".into(),
            affected_fields: vec!["spreads".into()],
            significant: true,
            before: json!({}),
            after: json!({}),
        };
        assert_eq!(update.impact_key().to_string(), "broker:7");
        assert_eq!(delete("7").impact_key().to_string(), "broker:global");
        assert_eq!(
            EventKind::BrokerCreate {
                broker_id: "8".into(),
                broker: json!({"id": "8"}),
            }
            .impact_key(),
            ImpactKey::BrokerGlobal
        );
        assert_eq!(
            EventKind::BulkUpdate {
                broker_ids: vec![],
                operation: "import".into(),
            }
            .impact_key()
            .to_string(),
            "bulk:global"
        );
        assert_eq!(
            EventKind::ConfigChange {
                config_type: "seo".into(),
                affected_slugs: vec![],
            }
            .impact_key()
            .to_string(),
            "config:global"
        );
    }

    #[test]
    fn priority_classification() {
        assert!(delete("1").is_high_priority());
        assert!(
            EventKind::ConfigChange {
                config_type: "country".into(),
                affected_slugs: vec![],
            }
            .is_high_priority()
        );
        let minor = EventKind::BrokerUpdate {
            broker_id: "1".into(),
            affected_fields: vec!["logo".into()],
            significant: false,
            before: Value::Null,
            after: Value::Null,
        };
        assert!(!minor.is_high_priority());
        assert!(
            !EventKind::BrokerCreate {
                broker_id: "2".into(),
                broker: Value::Null,
            }
            .is_high_priority()
        );
    }

    #[test]
    fn drain_returns_fifo_order_and_empties_queue() {
        let queue = EventQueue::new();
        queue.publish(delete("1"));
        queue.publish(delete("2"));

        let events = queue.drain_all();
        assert_eq!(events.len(), 2);
        assert!(events[0].epoch < events[1].epoch);
        assert_eq!(events[0].kind.entity_id(), Some("1"));
        assert!(queue.is_empty());
    }

    #[test]
    fn requeue_front_preserves_batch_order_ahead_of_newer_events() {
        let queue = EventQueue::new();
        queue.publish(delete("1"));
        queue.publish(delete("2"));
        let batch = queue.drain_all();

        queue.publish(delete("3"));
        queue.requeue_front(batch);

        let ids: Vec<_> = queue
            .drain_all()
            .iter()
            .map(|event| event.kind.entity_id().unwrap_or_default().to_string())
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }
}
