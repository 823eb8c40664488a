//! Programmatic page identity and payload.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::broker::BrokerSummary;
use super::error::DomainError;

/// Kind of programmatically generated directory page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    Category,
    Country,
    Seo,
}

impl PageType {
    pub const ALL: [PageType; 3] = [PageType::Category, PageType::Country, PageType::Seo];

    pub fn as_str(self) -> &'static str {
        match self {
            PageType::Category => "category",
            PageType::Country => "country",
            PageType::Seo => "seo",
        }
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PageType {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "category" => Ok(PageType::Category),
            "country" => Ok(PageType::Country),
            "seo" => Ok(PageType::Seo),
            other => Err(DomainError::unknown_page_type(other)),
        }
    }
}

/// A request for one page: `(type, slug, filters)`.
///
/// `filters` is kept as raw JSON so that malformed filter sets reach the cache
/// key builder, which decides how to canonicalize them.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub page_type: PageType,
    pub slug: String,
    pub filters: Option<Value>,
}

impl PageRequest {
    pub fn new(page_type: PageType, slug: impl Into<String>) -> Result<Self, DomainError> {
        let slug = slug.into();
        let trimmed = slug.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("page slug must not be empty"));
        }
        Ok(Self {
            page_type,
            slug: trimmed.to_string(),
            filters: None,
        })
    }

    pub fn with_filters(mut self, filters: Value) -> Self {
        self.filters = Some(filters);
        self
    }

    /// Number of filter keys, or zero when filters are absent or not an object.
    pub fn filter_count(&self) -> u32 {
        match &self.filters {
            Some(Value::Object(map)) => u32::try_from(map.len()).unwrap_or(u32::MAX),
            _ => 0,
        }
    }
}

impl fmt::Display for PageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.page_type, self.slug)
    }
}

/// Generated page bundle stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageBundle {
    pub brokers: Vec<BrokerSummary>,
    pub config: PageConfigRef,
    pub metadata: PageMetadata,
    pub seo: SeoFields,
}

impl PageBundle {
    pub fn broker_count(&self) -> usize {
        self.brokers.len()
    }
}

/// Reference to the static page configuration a bundle was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageConfigRef {
    pub page_type: PageType,
    pub slug: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    pub total_count: usize,
    pub avg_rating: f64,
    pub min_deposit: f64,
    pub avg_spread: f64,
    pub top_regulators: Vec<String>,
    /// Unix timestamp in milliseconds.
    pub last_updated: i64,
}

impl PageMetadata {
    /// Summarize a broker list the way listing pages present it.
    pub fn summarize(brokers: &[BrokerSummary], last_updated: i64) -> Self {
        let total_count = brokers.len();
        if total_count == 0 {
            return Self {
                total_count,
                avg_rating: 0.0,
                min_deposit: 0.0,
                avg_spread: 0.0,
                top_regulators: Vec::new(),
                last_updated,
            };
        }

        let count = total_count as f64;
        let avg_rating = brokers.iter().map(|broker| broker.score).sum::<f64>() / count;
        let avg_spread = brokers.iter().map(|broker| broker.avg_spread).sum::<f64>() / count;
        let min_deposit = brokers
            .iter()
            .map(|broker| broker.min_deposit)
            .fold(f64::INFINITY, f64::min);

        let mut regulator_counts: Vec<(String, usize)> = Vec::new();
        for regulator in brokers.iter().flat_map(|broker| broker.regulators.iter()) {
            match regulator_counts
                .iter_mut()
                .find(|(name, _)| name == regulator)
            {
                Some((_, count)) => *count += 1,
                None => regulator_counts.push((regulator.clone(), 1)),
            }
        }
        regulator_counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let top_regulators = regulator_counts
            .into_iter()
            .take(3)
            .map(|(name, _)| name)
            .collect();

        Self {
            total_count,
            avg_rating,
            min_deposit,
            avg_spread,
            top_regulators,
            last_updated,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeoFields {
    pub title: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub structured_data: Value,
}
