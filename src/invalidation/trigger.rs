//! Data-layer entry points for invalidation.
//!
//! Write paths call these after a successful change; each builds the matching
//! event and hands it to the coordinator.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::debug;

use crate::domain::broker::BrokerSummary;
use crate::domain::page::PageBundle;

use super::coordinator::InvalidationCoordinator;
use super::events::EventKind;

pub struct InvalidationTrigger<P = PageBundle> {
    coordinator: InvalidationCoordinator<P>,
    significant_fields: BTreeSet<String>,
}

impl<P> InvalidationTrigger<P>
where
    P: Send + Sync + 'static,
{
    pub fn new(coordinator: InvalidationCoordinator<P>, significant_fields: BTreeSet<String>) -> Self {
        Self {
            coordinator,
            significant_fields,
        }
    }

    pub fn coordinator(&self) -> &InvalidationCoordinator<P> {
        &self.coordinator
    }

    /// True when any of `fields` changes what listing pages show.
    pub fn is_significant(&self, fields: &[String]) -> bool {
        fields
            .iter()
            .any(|field| self.significant_fields.contains(field))
    }

    pub async fn on_broker_update(
        &self,
        broker_id: &str,
        affected_fields: Vec<String>,
        before: Value,
        after: Value,
    ) {
        let significant = self.is_significant(&affected_fields);
        debug!(broker_id, ?affected_fields, significant, "Broker update received");
        self.coordinator
            .notify(EventKind::BrokerUpdate {
                broker_id: broker_id.to_string(),
                affected_fields,
                significant,
                before,
                after,
            })
            .await;
    }

    pub async fn on_broker_create(&self, broker: &BrokerSummary) {
        let snapshot = serde_json::to_value(broker).unwrap_or(Value::Null);
        self.coordinator
            .notify(EventKind::BrokerCreate {
                broker_id: broker.id.clone(),
                broker: snapshot,
            })
            .await;
    }

    pub async fn on_broker_delete(&self, broker_id: &str) {
        self.coordinator
            .notify(EventKind::BrokerDelete {
                broker_id: broker_id.to_string(),
            })
            .await;
    }

    pub async fn on_bulk_update(&self, broker_ids: Vec<String>, operation: &str) {
        self.coordinator
            .notify(EventKind::BulkUpdate {
                broker_ids,
                operation: operation.to_string(),
            })
            .await;
    }

    pub async fn on_config_change(&self, config_type: &str, affected_slugs: Vec<String>) {
        self.coordinator
            .notify(EventKind::ConfigChange {
                config_type: config_type.to_string(),
                affected_slugs,
            })
            .await;
    }
}
