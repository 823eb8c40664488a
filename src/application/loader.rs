//! Get-or-generate page loading with telemetry, background refresh and
//! pre-warming.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::cache::{PageCache, SetOptions, cache_key};
use crate::domain::broker::{ALL_BROKERS_DEPENDENCY, BrokerSummary};
use crate::domain::page::{PageBundle, PageRequest};
use crate::performance::{LoadContext, PerformanceRecorder, page_key};

use super::generator::{GenerateError, PageGenerator};

const DEFAULT_REFRESH_DELAY_MS: u64 = 100;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Regenerate pages in the background when a hit is near expiry.
    pub background_refresh: bool,
    /// Delay before a scheduled background refresh runs.
    pub refresh_delay_ms: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            background_refresh: true,
            refresh_delay_ms: DEFAULT_REFRESH_DELAY_MS,
        }
    }
}

impl From<&crate::config::LoaderSettings> for LoaderConfig {
    fn from(settings: &crate::config::LoaderSettings) -> Self {
        Self {
            background_refresh: settings.background_refresh,
            refresh_delay_ms: u64::try_from(settings.refresh_delay.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl LoaderConfig {
    pub fn refresh_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_delay_ms)
    }
}

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("failed to generate page `{page}`: {source}")]
    Generate {
        page: String,
        #[source]
        source: GenerateError,
    },
}

impl LoaderError {
    pub fn generate(request: &PageRequest, source: GenerateError) -> Self {
        Self::Generate {
            page: request.to_string(),
            source,
        }
    }
}

/// A page to generate ahead of traffic. Higher priorities go first.
#[derive(Debug, Clone)]
pub struct PreWarmPage {
    pub request: PageRequest,
    pub priority: u32,
}

impl PreWarmPage {
    pub fn new(request: PageRequest, priority: u32) -> Self {
        Self { request, priority }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PreWarmSummary {
    pub warmed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Serves pages from the cache, generating and storing them on a miss.
#[derive(Clone)]
pub struct PageLoader {
    cache: Arc<PageCache>,
    recorder: Arc<PerformanceRecorder>,
    generator: Arc<dyn PageGenerator>,
    config: LoaderConfig,
    refreshes: Arc<DashMap<String, (u64, JoinHandle<()>)>>,
    refresh_generation: Arc<AtomicU64>,
}

impl PageLoader {
    pub fn new(
        cache: Arc<PageCache>,
        recorder: Arc<PerformanceRecorder>,
        generator: Arc<dyn PageGenerator>,
        config: LoaderConfig,
    ) -> Self {
        Self {
            cache,
            recorder,
            generator,
            config,
            refreshes: Arc::new(DashMap::new()),
            refresh_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Return the cached page or generate it. Every call records a metric.
    #[instrument(skip(self), fields(page = %request))]
    pub async fn load(&self, request: &PageRequest) -> Result<Arc<PageBundle>, LoaderError> {
        let started = Instant::now();
        let key = cache_key(request.page_type, &request.slug, request.filters.as_ref());
        let filters = Some(request.filter_count()).filter(|count| *count > 0);

        if let Some(hit) = self.cache.get_by_key(&key) {
            if hit.near_expiry && self.config.background_refresh {
                self.schedule_refresh(key, request.clone());
            }
            self.recorder.record(
                request.page_type,
                &request.slug,
                elapsed_ms(started),
                true,
                hit.data.broker_count(),
                LoadContext {
                    filters,
                    ..Default::default()
                },
            );
            return Ok(hit.data);
        }

        let (bundle, generation_ms) = self.generate_and_store(key, request).await?;
        self.recorder.record(
            request.page_type,
            &request.slug,
            elapsed_ms(started),
            false,
            bundle.broker_count(),
            LoadContext {
                filters,
                generation_time: Some(generation_ms),
                ..Default::default()
            },
        );
        Ok(bundle)
    }

    /// Generate pages that are not cached yet, highest priority first.
    #[instrument(skip_all, fields(pages = pages.len()))]
    pub async fn pre_warm(&self, mut pages: Vec<PreWarmPage>) -> PreWarmSummary {
        pages.sort_by(|left, right| right.priority.cmp(&left.priority));
        let started = Instant::now();
        let mut summary = PreWarmSummary::default();

        for page in &pages {
            let request = &page.request;
            let key = cache_key(request.page_type, &request.slug, request.filters.as_ref());
            if self.cache.contains(&key) {
                summary.skipped += 1;
                continue;
            }

            let page_started = Instant::now();
            match self.generate_and_store(key, request).await {
                Ok((bundle, generation_ms)) => {
                    summary.warmed += 1;
                    self.recorder.record(
                        request.page_type,
                        &request.slug,
                        elapsed_ms(page_started),
                        false,
                        bundle.broker_count(),
                        LoadContext {
                            filters: Some(request.filter_count()).filter(|count| *count > 0),
                            generation_time: Some(generation_ms),
                            is_preload: true,
                            is_batch_preload: true,
                        },
                    );
                }
                Err(err) => {
                    summary.failed += 1;
                    warn!(page = %request, error = %err, "Pre-warm failed");
                }
            }
        }

        let total_ms = elapsed_ms(started);
        self.recorder.track_batch_preload(
            summary.warmed,
            total_ms,
            pages.first().map(|page| page.request.to_string()),
        );
        info!(
            warmed = summary.warmed,
            skipped = summary.skipped,
            failed = summary.failed,
            total_ms,
            "Pre-warm complete"
        );
        summary
    }

    /// Background refreshes not yet finished.
    pub fn pending_refreshes(&self) -> usize {
        self.refreshes.len()
    }

    pub fn cancel_refreshes(&self) {
        for entry in self.refreshes.iter() {
            entry.value().1.abort();
        }
        self.refreshes.clear();
    }

    async fn generate_and_store(
        &self,
        key: String,
        request: &PageRequest,
    ) -> Result<(Arc<PageBundle>, f64), LoaderError> {
        let started = Instant::now();
        let bundle = match self.generator.generate(request).await {
            Ok(bundle) => bundle,
            Err(source) => {
                self.recorder
                    .track_error(&page_key(request.page_type, &request.slug), &source.to_string());
                return Err(LoaderError::generate(request, source));
            }
        };
        let generation_ms = elapsed_ms(started);

        let dependencies: Vec<String> = std::iter::once(ALL_BROKERS_DEPENDENCY.to_string())
            .chain(bundle.brokers.iter().map(BrokerSummary::dependency_tag))
            .collect();
        let stored = self
            .cache
            .set_by_key(key, bundle, SetOptions::new().dependencies(dependencies));
        Ok((stored, generation_ms))
    }

    /// Regenerate `key` after the refresh delay. A refresh already pending or
    /// running for the key is kept; only a finished one is replaced.
    fn schedule_refresh(&self, key: String, request: PageRequest) {
        let Ok(runtime) = Handle::try_current() else {
            return;
        };

        let slot = self.refreshes.entry(key.clone());
        if let Entry::Occupied(occupied) = &slot {
            if !occupied.get().1.is_finished() {
                return;
            }
        }

        let generation = self.refresh_generation.fetch_add(1, Ordering::Relaxed);
        let loader = self.clone();
        let delay = self.config.refresh_delay();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            match loader.generate_and_store(key.clone(), &request).await {
                Ok(_) => debug!(key = %key, "Background refresh complete"),
                Err(err) => debug!(key = %key, error = %err, "Background refresh failed"),
            }
            loader
                .refreshes
                .remove_if(&key, |_, (current, _)| *current == generation);
        });

        match slot {
            Entry::Occupied(mut occupied) => {
                occupied.insert((generation, handle));
            }
            Entry::Vacant(vacant) => {
                vacant.insert((generation, handle));
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::generator::SyntheticGenerator;
    use crate::cache::CacheConfig;
    use crate::domain::page::PageType;
    use crate::performance::PerformanceConfig;

    struct Fixture {
        cache: Arc<PageCache>,
        recorder: Arc<PerformanceRecorder>,
        generator: Arc<SyntheticGenerator>,
        loader: PageLoader,
    }

    fn fixture(cache_config: CacheConfig) -> Fixture {
        let cache = Arc::new(PageCache::new(cache_config));
        let recorder = Arc::new(PerformanceRecorder::new(PerformanceConfig::default()));
        let generator = Arc::new(SyntheticGenerator::new(12, Duration::ZERO));
        let loader = PageLoader::new(
            Arc::clone(&cache),
            Arc::clone(&recorder),
            generator.clone(),
            LoaderConfig::default(),
        );
        Fixture {
            cache,
            recorder,
            generator,
            loader,
        }
    }

    fn request(page_type: PageType, slug: &str) -> PageRequest {
        PageRequest::new(page_type, slug).unwrap()
    }

    #[tokio::test]
    async fn miss_generates_and_hit_serves_from_cache() {
        let fx = fixture(CacheConfig::default());
        let page = request(PageType::Category, "copy-trading");

        let first = fx.loader.load(&page).await.unwrap();
        let second = fx.loader.load(&page).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fx.generator.calls(), 1);

        let metrics = fx.recorder.metrics();
        assert_eq!(metrics.len(), 2);
        assert!(!metrics[0].cache_hit);
        assert!(metrics[0].generation_time.is_some());
        assert!(metrics[1].cache_hit);
        assert_eq!(metrics[1].broker_count, first.broker_count());
    }

    #[tokio::test]
    async fn stored_pages_carry_broker_dependencies() {
        let fx = fixture(CacheConfig::default());
        let page = request(PageType::Category, "copy-trading");
        let bundle = fx.loader.load(&page).await.unwrap();
        let listed = bundle.brokers[0].id.clone();

        assert_eq!(fx.cache.invalidate_broker("unlisted-broker"), 0);
        assert_eq!(fx.cache.invalidate_broker(&listed), 1);

        fx.loader.load(&page).await.unwrap();
        assert_eq!(fx.cache.invalidate(None, Some(ALL_BROKERS_DEPENDENCY)), 1);
    }

    #[tokio::test]
    async fn filters_key_pages_separately() {
        let fx = fixture(CacheConfig::default());
        let plain = request(PageType::Category, "ctrader");
        let filtered = plain.clone().with_filters(serde_json::json!({"minRating": 8}));

        fx.loader.load(&plain).await.unwrap();
        fx.loader.load(&filtered).await.unwrap();

        assert_eq!(fx.generator.calls(), 2);
        assert_eq!(fx.recorder.metrics()[1].filters, Some(1));
    }

    #[tokio::test]
    async fn generation_failure_is_tracked_and_returned() {
        let fx = fixture(CacheConfig::default());
        let page = request(PageType::Seo, "missing-guide");

        let err = fx.loader.load(&page).await.unwrap_err();
        assert!(matches!(err, LoaderError::Generate { ref page, .. } if page == "seo/missing-guide"));

        let errors = fx.recorder.recent_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].page_key, "seo/missing-guide");
        assert!(fx.cache.is_empty());
        assert!(fx.recorder.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn near_expiry_hit_refreshes_in_background() {
        let fx = fixture(CacheConfig {
            default_ttl_secs: 100,
            ..Default::default()
        });
        let page = request(PageType::Country, "germany");
        fx.loader.load(&page).await.unwrap();

        tokio::time::advance(Duration::from_secs(85)).await;
        fx.loader.load(&page).await.unwrap();
        fx.loader.load(&page).await.unwrap();
        assert_eq!(fx.loader.pending_refreshes(), 1);
        assert_eq!(fx.generator.calls(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fx.generator.calls(), 2);
        assert_eq!(fx.loader.pending_refreshes(), 0);

        // The refreshed entry has a full TTL again.
        tokio::time::advance(Duration::from_secs(50)).await;
        let hit = fx.cache.get(PageType::Country, "germany", None).unwrap();
        assert!(!hit.near_expiry);
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_near_expiry_traffic_still_refreshes() {
        let fx = fixture(CacheConfig {
            default_ttl_secs: 100,
            ..Default::default()
        });
        let page = request(PageType::Country, "spain");
        fx.loader.load(&page).await.unwrap();

        tokio::time::advance(Duration::from_secs(85)).await;
        for _ in 0..200 {
            fx.loader.load(&page).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        assert_eq!(fx.generator.calls(), 2);
        assert_eq!(fx.loader.pending_refreshes(), 0);
        let hit = fx.cache.get(PageType::Country, "spain", None).unwrap();
        assert!(!hit.near_expiry);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_refresh_never_runs() {
        let fx = fixture(CacheConfig {
            default_ttl_secs: 100,
            ..Default::default()
        });
        let page = request(PageType::Country, "france");
        fx.loader.load(&page).await.unwrap();

        tokio::time::advance(Duration::from_secs(90)).await;
        fx.loader.load(&page).await.unwrap();
        fx.loader.cancel_refreshes();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fx.generator.calls(), 1);
        assert_eq!(fx.loader.pending_refreshes(), 0);
    }

    #[tokio::test]
    async fn pre_warm_skips_cached_and_counts_failures() {
        let fx = fixture(CacheConfig::default());
        fx.loader
            .load(&request(PageType::Category, "ecn-brokers"))
            .await
            .unwrap();

        let summary = fx
            .loader
            .pre_warm(vec![
                PreWarmPage::new(request(PageType::Category, "ecn-brokers"), 5),
                PreWarmPage::new(request(PageType::Country, "uk"), 1),
                PreWarmPage::new(request(PageType::Seo, "missing-page"), 3),
                PreWarmPage::new(request(PageType::Seo, "best-brokers"), 9),
            ])
            .await;

        assert_eq!(
            summary,
            PreWarmSummary {
                warmed: 2,
                skipped: 1,
                failed: 1,
            }
        );
        assert!(fx.cache.get(PageType::Country, "uk", None).is_some());

        let preloads: Vec<String> = fx
            .recorder
            .metrics()
            .into_iter()
            .filter(|metric| metric.is_batch_preload)
            .map(|metric| metric.page_slug)
            .collect();
        assert_eq!(preloads, vec!["best-brokers", "uk"]);

        let batches = fx.recorder.batch_preloads();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].page_count, 2);
        assert_eq!(batches[0].current_page.as_deref(), Some("seo/best-brokers"));
    }
}
