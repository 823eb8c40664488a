//! Service handle owning one cache, coordinator, recorder and loader.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::{CacheConfig, PageCache};
use crate::config::Settings;
use crate::domain::page::{PageBundle, PageRequest};
use crate::invalidation::{
    BatchReport, CoordinatorConfig, InvalidationCoordinator, InvalidationTrigger,
};
use crate::performance::{PerformanceConfig, PerformanceRecorder};

use super::error::AppError;
use super::generator::PageGenerator;
use super::loader::{LoaderConfig, PageLoader};

const SOURCE: &str = "application::service";

#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub cache: CacheConfig,
    pub invalidation: CoordinatorConfig,
    pub performance: PerformanceConfig,
    pub loader: LoaderConfig,
}

impl From<&Settings> for ServiceConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            cache: CacheConfig::from(&settings.cache),
            invalidation: CoordinatorConfig::from(&settings.invalidation),
            performance: PerformanceConfig::from(&settings.performance),
            loader: LoaderConfig::from(&settings.loader),
        }
    }
}

/// Independent instance of the page cache stack. Two services never share
/// state.
pub struct PageCacheService {
    cache: Arc<PageCache>,
    coordinator: InvalidationCoordinator,
    trigger: InvalidationTrigger,
    recorder: Arc<PerformanceRecorder>,
    loader: PageLoader,
    sweeper: Option<JoinHandle<()>>,
}

impl PageCacheService {
    /// Build the stack and, inside a Tokio runtime, start the expiry sweeper.
    pub fn create(config: &ServiceConfig, generator: Arc<dyn PageGenerator>) -> Result<Self, AppError> {
        for rule in &config.invalidation.rules {
            rule.key_patterns()?;
        }

        let cache = Arc::new(PageCache::new(config.cache.clone()));
        let coordinator = InvalidationCoordinator::new(Arc::clone(&cache), &config.invalidation);
        let trigger = InvalidationTrigger::new(
            coordinator.clone(),
            config.invalidation.significant_fields.clone(),
        );
        let recorder = Arc::new(PerformanceRecorder::new(config.performance.clone()));
        let loader = PageLoader::new(
            Arc::clone(&cache),
            Arc::clone(&recorder),
            generator,
            config.loader.clone(),
        );
        let sweeper = spawn_sweeper(&cache);

        info!(
            target = SOURCE,
            max_entries = config.cache.max_entries,
            default_ttl_secs = config.cache.default_ttl_secs,
            debounce_ms = config.invalidation.debounce_ms,
            rules = coordinator.stats().rules_count,
            sweeper = sweeper.is_some(),
            "page cache service created"
        );

        Ok(Self {
            cache,
            coordinator,
            trigger,
            recorder,
            loader,
            sweeper,
        })
    }

    pub fn cache(&self) -> &Arc<PageCache> {
        &self.cache
    }

    pub fn coordinator(&self) -> &InvalidationCoordinator {
        &self.coordinator
    }

    pub fn trigger(&self) -> &InvalidationTrigger {
        &self.trigger
    }

    pub fn recorder(&self) -> &Arc<PerformanceRecorder> {
        &self.recorder
    }

    pub fn loader(&self) -> &PageLoader {
        &self.loader
    }

    pub async fn load(&self, request: &PageRequest) -> Result<Arc<PageBundle>, AppError> {
        Ok(self.loader.load(request).await?)
    }

    /// Flush pending invalidations, then stop background work.
    pub async fn shutdown(mut self) -> Result<Option<BatchReport>, AppError> {
        let report = self.coordinator.flush().await;
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
        self.loader.cancel_refreshes();
        self.coordinator.clear_queue();

        let report = report?;
        info!(
            target = SOURCE,
            flushed = report.as_ref().map_or(0, |report| report.event_count),
            entries = self.cache.len(),
            "page cache service stopped"
        );
        Ok(report)
    }
}

impl Drop for PageCacheService {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

fn spawn_sweeper(cache: &Arc<PageCache>) -> Option<JoinHandle<()>> {
    let period = cache.config().sweep_interval()?;
    let Ok(handle) = Handle::try_current() else {
        warn!(
            target = SOURCE,
            "no Tokio runtime; expired entries are only dropped on access"
        );
        return None;
    };

    let cache = Arc::downgrade(cache);
    Some(handle.spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(cache) = cache.upgrade() else {
                break;
            };
            let removed = cache.cleanup_expired();
            if removed > 0 {
                debug!(target = SOURCE, removed, "expired entries swept");
            }
        }
    }))
}
