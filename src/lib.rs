//! Page cache, invalidation coordinator and performance telemetry for
//! programmatically generated broker directory pages.
//!
//! [`application::service::PageCacheService`] wires the pieces together:
//! a bounded TTL cache of generated page bundles, a debounced invalidation
//! coordinator fed by broker and configuration change events, and a
//! recorder that aggregates page load metrics into reports.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod invalidation;
pub mod performance;
pub(crate) mod util;
