//! Event-driven cache invalidation.
//!
//! Data-layer changes arrive through [`InvalidationTrigger`] as events. The
//! [`InvalidationCoordinator`] queues them, debounces low-priority ones, groups
//! each batch by impact and applies the matching [`InvalidationRule`] scopes to
//! the page cache.

mod config;
mod coordinator;
mod error;
mod events;
mod impact;
mod planner;
mod rules;
mod trigger;

pub use config::{CoordinatorConfig, MAX_DEBOUNCE};
pub use coordinator::{BatchReport, CoordinatorStats, InvalidationCoordinator, SchedulerPhase};
pub use error::InvalidationError;
pub use events::{Epoch, EventKind, EventQueue, EventType, ImpactKey, InvalidationEvent};
pub use impact::CategoryImpactMap;
pub use planner::{EventGroup, InvalidationPlan};
pub use rules::{InvalidationRule, RuleScope, RuleSet, UNKNOWN_PRIORITY};
pub use trigger::InvalidationTrigger;

pub(crate) use coordinator::{METRIC_INVALIDATION_BATCH_MS, METRIC_INVALIDATION_QUEUE_LEN};
