//! Page generation contract and a synthetic implementation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::broker::BrokerSummary;
use crate::domain::page::{PageBundle, PageConfigRef, PageMetadata, PageRequest, PageType, SeoFields};

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("no page configuration for `{page}`")]
    UnknownPage { page: String },
    #[error("broker data unavailable: {0}")]
    Source(String),
}

impl GenerateError {
    pub fn unknown_page(page: impl Into<String>) -> Self {
        Self::UnknownPage { page: page.into() }
    }

    pub fn from_source(err: impl std::fmt::Display) -> Self {
        Self::Source(err.to_string())
    }
}

/// Builds a page bundle on a cache miss. The cache never generates pages
/// itself.
#[async_trait]
pub trait PageGenerator: Send + Sync {
    async fn generate(&self, request: &PageRequest) -> Result<PageBundle, GenerateError>;
}

const REGULATORS: [&str; 5] = ["FCA", "CySEC", "ASIC", "NFA", "FSCA"];
const PLATFORMS: [&str; 3] = ["MT4", "MT5", "cTrader"];

/// Deterministic in-memory broker directory with an artificial latency.
///
/// Backs the `simulate` command and tests; slugs starting with `missing-`
/// fail with [`GenerateError::UnknownPage`].
pub struct SyntheticGenerator {
    brokers: Vec<BrokerSummary>,
    latency: Duration,
    calls: AtomicUsize,
}

impl SyntheticGenerator {
    pub fn new(broker_count: usize, latency: Duration) -> Self {
        let brokers = (0..broker_count).map(synthetic_broker).collect();
        Self {
            brokers,
            latency,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn brokers(&self) -> &[BrokerSummary] {
        &self.brokers
    }

    /// Number of `generate` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn select(&self, request: &PageRequest) -> Vec<BrokerSummary> {
        let slug = request.slug.as_str();
        let keep = |broker: &&BrokerSummary| -> bool {
            match (request.page_type, slug) {
                (PageType::Category, "islamic-swap-free") => broker.islamic_account,
                (PageType::Category, "copy-trading") => broker.copy_trading,
                (PageType::Category, "no-minimum-deposit") => broker.min_deposit == 0.0,
                (PageType::Category, "low-deposit" | "100-deposit") => broker.min_deposit <= 100.0,
                (PageType::Category, "metatrader4-mt4") => has(&broker.platforms, "MT4"),
                (PageType::Category, "metatrader5-mt5") => has(&broker.platforms, "MT5"),
                (PageType::Category, "ctrader") => has(&broker.platforms, "cTrader"),
                (PageType::Category, "uk-fca-regulated") => has(&broker.regulators, "FCA"),
                (PageType::Category, "usa-traders") => has(&broker.regulators, "NFA"),
                (PageType::Country, _) => broker.score >= 6.0,
                _ => true,
            }
        };
        self.brokers.iter().filter(keep).cloned().collect()
    }
}

#[async_trait]
impl PageGenerator for SyntheticGenerator {
    async fn generate(&self, request: &PageRequest) -> Result<PageBundle, GenerateError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if request.slug.starts_with("missing-") {
            return Err(GenerateError::unknown_page(request.to_string()));
        }

        let brokers = self.select(request);
        let title = title_for(request);
        let last_updated =
            i64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX);
        let metadata = PageMetadata::summarize(&brokers, last_updated);
        let seo = SeoFields {
            title: format!("{title} ({} brokers reviewed)", brokers.len()),
            description: format!(
                "Compare {} {} brokers by rating, spreads and minimum deposit.",
                brokers.len(),
                request.slug.replace('-', " ")
            ),
            keywords: request.slug.split('-').map(str::to_string).collect(),
            structured_data: json!({
                "@context": "https://schema.org",
                "@type": "ItemList",
                "numberOfItems": brokers.len(),
                "itemListElement": brokers
                    .iter()
                    .enumerate()
                    .map(|(position, broker)| json!({
                        "@type": "ListItem",
                        "position": position + 1,
                        "name": broker.name,
                    }))
                    .collect::<Vec<_>>(),
            }),
        };

        Ok(PageBundle {
            brokers,
            config: PageConfigRef {
                page_type: request.page_type,
                slug: request.slug.clone(),
                title,
            },
            metadata,
            seo,
        })
    }
}

fn has(values: &[String], wanted: &str) -> bool {
    values.iter().any(|value| value == wanted)
}

fn title_for(request: &PageRequest) -> String {
    let words: Vec<String> = request
        .slug
        .split('-')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect();
    match request.page_type {
        PageType::Country => format!("Best Forex Brokers in {}", words.join(" ")),
        PageType::Category | PageType::Seo => format!("Best {} Brokers", words.join(" ")),
    }
}

fn synthetic_broker(index: usize) -> BrokerSummary {
    let id = index + 1;
    BrokerSummary {
        id: id.to_string(),
        name: format!("Broker {id:03}"),
        score: 5.0 + (index % 50) as f64 / 10.0,
        min_deposit: [0.0, 50.0, 100.0, 250.0, 500.0][index % 5],
        avg_spread: 0.6 + (index % 7) as f64 / 10.0,
        regulators: vec![
            REGULATORS[index % REGULATORS.len()].to_string(),
            REGULATORS[(index + 2) % REGULATORS.len()].to_string(),
        ],
        platforms: PLATFORMS
            .iter()
            .take(1 + index % PLATFORMS.len())
            .map(|platform| platform.to_string())
            .collect(),
        islamic_account: index % 3 == 0,
        copy_trading: index % 4 == 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn generates_a_filtered_bundle() {
        let generator = SyntheticGenerator::new(20, Duration::ZERO);
        let request = PageRequest::new(PageType::Category, "islamic-swap-free").unwrap();

        let bundle = generator.generate(&request).await.unwrap();
        assert_eq!(bundle.broker_count(), 7);
        assert!(bundle.brokers.iter().all(|broker| broker.islamic_account));
        assert_eq!(bundle.config.title, "Best Islamic Swap Free Brokers");
        assert_eq!(bundle.metadata.total_count, 7);
        assert_eq!(bundle.seo.structured_data["numberOfItems"], 7);
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn country_pages_have_their_own_title() {
        let generator = SyntheticGenerator::new(5, Duration::ZERO);
        let request = PageRequest::new(PageType::Country, "united-kingdom").unwrap();
        let bundle = generator.generate(&request).await.unwrap();
        assert_eq!(bundle.config.title, "Best Forex Brokers in United Kingdom");
    }

    #[tokio::test]
    async fn missing_pages_fail() {
        let generator = SyntheticGenerator::new(5, Duration::ZERO);
        let request = PageRequest::new(PageType::Seo, "missing-page").unwrap();
        let err = generator.generate(&request).await.unwrap_err();
        assert!(matches!(err, GenerateError::UnknownPage { page } if page == "seo/missing-page"));
    }

    #[test]
    fn synthetic_brokers_are_deterministic() {
        let first = synthetic_broker(3);
        assert_eq!(first, synthetic_broker(3));
        assert_eq!(first.id, "4");
        assert_eq!(first.name, "Broker 004");
        assert!(first.islamic_account);
        assert_eq!(first.regulators, vec!["NFA", "FCA"]);
    }
}
