//! Broker records as seen by page bundles and change notifications.

use serde::{Deserialize, Serialize};

/// The subset of a broker record that listing pages render.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerSummary {
    pub id: String,
    pub name: String,
    pub score: f64,
    pub min_deposit: f64,
    pub avg_spread: f64,
    pub regulators: Vec<String>,
    pub platforms: Vec<String>,
    pub islamic_account: bool,
    pub copy_trading: bool,
}

impl BrokerSummary {
    /// Dependency tag attached to cached pages that list this broker.
    pub fn dependency_tag(&self) -> String {
        broker_dependency(&self.id)
    }
}

/// Dependency tag for a single broker: `broker:<id>`.
pub fn broker_dependency(id: &str) -> String {
    format!("broker:{id}")
}

/// Dependency tag shared by every page built from the broker dataset.
pub const ALL_BROKERS_DEPENDENCY: &str = "brokers:all";
