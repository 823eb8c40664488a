//! Recorded samples: page loads, generation errors and batch preloads.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::page::PageType;

/// One page load as observed by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetric {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub page_type: PageType,
    pub page_slug: String,
    /// Milliseconds from request to payload.
    pub load_time: f64,
    pub cache_hit: bool,
    pub broker_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_time: Option<f64>,
    #[serde(default)]
    pub is_preload: bool,
    #[serde(default)]
    pub is_batch_preload: bool,
}

impl PerformanceMetric {
    pub fn page_key(&self) -> String {
        page_key(self.page_type, &self.page_slug)
    }
}

/// `type/slug` identity used to group metrics by page.
pub fn page_key(page_type: PageType, slug: &str) -> String {
    format!("{page_type}/{slug}")
}

/// Optional detail attached to a recorded load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadContext {
    /// Number of active filters.
    pub filters: Option<u32>,
    pub generation_time: Option<f64>,
    pub is_preload: bool,
    pub is_batch_preload: bool,
}

/// A page generation failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub page_key: String,
    pub message: String,
}

/// Summary of one pre-warm run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPreloadRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub page_count: usize,
    pub total_time: f64,
    pub average_time: f64,
    /// Page the batch was started from, if any.
    pub current_page: Option<String>,
}
