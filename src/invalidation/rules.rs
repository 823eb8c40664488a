//! Invalidation rules: which scope an event type invalidates, and in what order.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cache::KeyPattern;
use crate::domain::broker::ALL_BROKERS_DEPENDENCY;

use super::error::InvalidationError;
use super::events::EventType;

/// Priority of groups whose event type has no rule; processed last.
pub const UNKNOWN_PRIORITY: u32 = 999;

/// How much of the cache an event group invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    /// Entries tagged `broker:<id>` for each event's broker.
    Specific,
    /// Category and SEO pages whose slugs the changed fields affect.
    Category,
    /// Every key matching the rule patterns, plus entries tagged with the rule
    /// dependencies.
    Global,
}

impl fmt::Display for RuleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RuleScope::Specific => "specific",
            RuleScope::Category => "category",
            RuleScope::Global => "global",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationRule {
    pub event_type: EventType,
    /// Lower numbers are processed first.
    pub priority: u32,
    pub scope: RuleScope,
    /// Key patterns used by the global scope: globs where `*` matches any run,
    /// or regular expressions when they start with `^`.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Dependency tags, used by the global scope.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl InvalidationRule {
    pub fn global(event_type: EventType, priority: u32, dependency: &str) -> Self {
        Self {
            event_type,
            priority,
            scope: RuleScope::Global,
            patterns: vec!["programmatic:*".to_string()],
            dependencies: vec![dependency.to_string()],
        }
    }

    /// Compile the rule patterns.
    pub fn key_patterns(&self) -> Result<Vec<KeyPattern>, InvalidationError> {
        self.patterns
            .iter()
            .map(|pattern| {
                let compiled = if pattern.starts_with('^') {
                    KeyPattern::regex(pattern)
                } else {
                    KeyPattern::glob(pattern)
                };
                compiled.map_err(|source| InvalidationError::pattern(self.event_type, pattern, source))
            })
            .collect()
    }
}

/// The registered rules, at most one per event type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<InvalidationRule>,
}

impl RuleSet {
    /// Build a rule set; later rules for the same event type replace earlier ones.
    pub fn new(rules: impl IntoIterator<Item = InvalidationRule>) -> Self {
        let mut set = Self { rules: Vec::new() };
        for rule in rules {
            set.upsert(rule);
        }
        set
    }

    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Register `rule`, replacing any rule for the same event type.
    /// Returns the replaced rule.
    pub fn upsert(&mut self, rule: InvalidationRule) -> Option<InvalidationRule> {
        match self
            .rules
            .iter_mut()
            .find(|existing| existing.event_type == rule.event_type)
        {
            Some(existing) => Some(std::mem::replace(existing, rule)),
            None => {
                self.rules.push(rule);
                None
            }
        }
    }

    pub fn find(&self, event_type: EventType) -> Option<&InvalidationRule> {
        self.rules.iter().find(|rule| rule.event_type == event_type)
    }

    pub fn priority(&self, event_type: EventType) -> u32 {
        self.find(event_type)
            .map_or(UNKNOWN_PRIORITY, |rule| rule.priority)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InvalidationRule> {
        self.rules.iter()
    }
}

impl Default for RuleSet {
    /// Every broker and configuration change flushes all programmatic pages.
    /// Bulk updates have no rule and are discarded with a warning.
    fn default() -> Self {
        Self::new([
            InvalidationRule::global(EventType::BrokerUpdate, 1, ALL_BROKERS_DEPENDENCY),
            InvalidationRule::global(EventType::BrokerCreate, 2, ALL_BROKERS_DEPENDENCY),
            InvalidationRule::global(EventType::BrokerDelete, 3, ALL_BROKERS_DEPENDENCY),
            InvalidationRule::global(EventType::ConfigChange, 4, "config:all"),
        ])
    }
}
