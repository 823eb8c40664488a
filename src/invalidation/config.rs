//! Coordinator configuration.
//!
//! Controlled through the `[invalidation]` section of `programmatic-cache.toml`.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::Deserialize;

use super::impact::CategoryImpactMap;
use super::rules::{InvalidationRule, RuleSet};

const DEFAULT_DEBOUNCE_MS: u64 = 1_000;

/// Longest accepted debounce window.
pub const MAX_DEBOUNCE: Duration = Duration::from_secs(60 * 60);
const DEFAULT_SIGNIFICANT_FIELDS: [&str; 9] = [
    "name",
    "score",
    "regulation",
    "minDeposit",
    "spreads",
    "platforms",
    "islamicAccount",
    "copyTrading",
    "status",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Quiet period after the last low-priority event before a batch runs.
    pub debounce_ms: u64,
    /// Broker fields whose change makes an update high priority.
    pub significant_fields: BTreeSet<String>,
    /// Rules to register; replaces the defaults when non-empty.
    pub rules: Vec<InvalidationRule>,
    pub category_impact: CategoryImpactMap,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            significant_fields: DEFAULT_SIGNIFICANT_FIELDS
                .iter()
                .map(|field| field.to_string())
                .collect(),
            rules: Vec::new(),
            category_impact: CategoryImpactMap::default(),
        }
    }
}

impl From<&crate::config::InvalidationSettings> for CoordinatorConfig {
    fn from(settings: &crate::config::InvalidationSettings) -> Self {
        Self {
            debounce_ms: u64::try_from(settings.debounce.as_millis()).unwrap_or(u64::MAX),
            significant_fields: settings.significant_fields.clone(),
            rules: settings.rules.clone(),
            category_impact: settings.category_impact.clone(),
        }
    }
}

impl CoordinatorConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms).min(MAX_DEBOUNCE)
    }

    pub fn rule_set(&self) -> RuleSet {
        if self.rules.is_empty() {
            RuleSet::default()
        } else {
            RuleSet::new(self.rules.iter().cloned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invalidation::events::EventType;
    use crate::invalidation::rules::RuleScope;

    #[test]
    fn default_values() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.debounce(), Duration::from_secs(1));
        assert_eq!(config.significant_fields.len(), 9);
        assert_eq!(config.rule_set(), RuleSet::default());
    }

    #[test]
    fn debounce_is_clamped() {
        let config = CoordinatorConfig {
            debounce_ms: u64::MAX,
            ..Default::default()
        };
        assert_eq!(config.debounce(), MAX_DEBOUNCE);
    }

    #[test]
    fn configured_rules_replace_defaults() {
        let config = CoordinatorConfig {
            rules: vec![InvalidationRule {
                event_type: EventType::BrokerUpdate,
                priority: 1,
                scope: RuleScope::Category,
                patterns: vec![],
                dependencies: vec![],
            }],
            ..Default::default()
        };

        let rules = config.rule_set();
        assert_eq!(rules.len(), 1);
        assert!(rules.find(EventType::BrokerDelete).is_none());
    }
}
