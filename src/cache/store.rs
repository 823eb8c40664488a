//! In-memory page store with lazy expiry, LRU eviction and dependency tags.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;
use metrics::{counter, gauge};
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::broker::broker_dependency;
use crate::domain::page::{PageBundle, PageType};
use crate::util::lock::mutex_lock;

use super::config::{CacheConfig, MAX_TTL};
use super::entry::{CacheEntry, CacheHit, SetOptions};
use super::health::{CacheHealthReport, CacheStats, hit_rate};
use super::keys::{KEY_PREFIX, KeyPattern, cache_key};

const SOURCE: &str = "cache::store";

pub(crate) const METRIC_CACHE_HIT: &str = "programmatic_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS: &str = "programmatic_cache_miss_total";
pub(crate) const METRIC_CACHE_EVICT: &str = "programmatic_cache_evict_total";
pub(crate) const METRIC_CACHE_INVALIDATED: &str = "programmatic_cache_invalidated_total";
pub(crate) const METRIC_CACHE_ENTRIES: &str = "programmatic_cache_entries";

static BROKER_PAGES: Lazy<Vec<KeyPattern>> = Lazy::new(|| {
    PageType::ALL
        .iter()
        .map(|page_type| KeyPattern::substring(format!("{KEY_PREFIX}:{page_type}:")))
        .collect()
});

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    hits: u64,
    misses: u64,
    writes: u64,
    invalidations: u64,
    evictions: u64,
}

struct CacheState<P> {
    entries: LruCache<String, CacheEntry<P>>,
    counters: Counters,
}

/// Page cache keyed by `(type, slug, filters)`.
///
/// All reads and writes go through one mutex around an LRU list. The list order
/// is access order, so popping its tail evicts the least-recently-accessed
/// entry, with insertion order breaking ties between untouched entries.
pub struct PageCache<P = PageBundle> {
    config: CacheConfig,
    state: Mutex<CacheState<P>>,
}

impl<P> PageCache<P> {
    pub fn new(config: CacheConfig) -> Self {
        let entries = LruCache::new(config.max_entries_non_zero());
        Self {
            config,
            state: Mutex::new(CacheState {
                entries,
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a page. Expired entries are removed when observed.
    pub fn get(&self, page_type: PageType, slug: &str, filters: Option<&Value>) -> Option<CacheHit<P>> {
        let key = cache_key(page_type, slug, filters);
        self.get_by_key(&key)
    }

    /// Look up a page by its precomputed key.
    pub fn get_by_key(&self, key: &str) -> Option<CacheHit<P>> {
        let now = Instant::now();
        let mut guard = mutex_lock(&self.state, SOURCE, "get");
        let state = &mut *guard;

        let expired = match state.entries.peek(key) {
            Some(entry) => entry.is_expired_at(now),
            None => {
                state.counters.misses += 1;
                counter!(METRIC_CACHE_MISS).increment(1);
                return None;
            }
        };

        if expired {
            state.entries.pop(key);
            state.counters.misses += 1;
            counter!(METRIC_CACHE_MISS).increment(1);
            gauge!(METRIC_CACHE_ENTRIES).set(state.entries.len() as f64);
            debug!(key, "Expired cache entry removed on read");
            return None;
        }

        let entry = state.entries.get_mut(key)?;
        entry.hits += 1;
        entry.last_accessed = now;
        let hit = CacheHit {
            data: Arc::clone(&entry.data),
            near_expiry: entry.remaining_fraction(now) < self.config.refresh_threshold(),
            version: entry.version.clone(),
            hits: entry.hits,
        };

        state.counters.hits += 1;
        counter!(METRIC_CACHE_HIT).increment(1);
        Some(hit)
    }

    /// True when `key` holds a live entry. Does not count as a lookup or
    /// refresh the entry's recency.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        mutex_lock(&self.state, SOURCE, "contains")
            .entries
            .peek(key)
            .is_some_and(|entry| !entry.is_expired_at(now))
    }

    /// Remove entries whose key matches `pattern` or whose dependencies contain
    /// `dependency`. With neither selector nothing is removed.
    pub fn invalidate(&self, pattern: Option<&KeyPattern>, dependency: Option<&str>) -> usize {
        if pattern.is_none() && dependency.is_none() {
            return 0;
        }

        let mut guard = mutex_lock(&self.state, SOURCE, "invalidate");
        let state = &mut *guard;

        let doomed: Vec<String> = state
            .entries
            .iter()
            .filter(|(key, entry)| {
                pattern.is_some_and(|pattern| pattern.matches(key))
                    || dependency.is_some_and(|dependency| entry.depends_on(dependency))
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            state.entries.pop(key);
        }

        let removed = doomed.len();
        state.counters.invalidations += removed as u64;
        counter!(METRIC_CACHE_INVALIDATED).increment(removed as u64);
        gauge!(METRIC_CACHE_ENTRIES).set(state.entries.len() as f64);

        debug!(
            pattern = ?pattern.map(ToString::to_string),
            dependency = ?dependency,
            removed,
            "Cache entries invalidated"
        );
        removed
    }

    /// Remove every category, country and SEO page.
    pub fn invalidate_broker_data(&self) -> usize {
        BROKER_PAGES
            .iter()
            .map(|pattern| self.invalidate(Some(pattern), None))
            .sum()
    }

    /// Remove every page tagged with `broker:<id>`.
    pub fn invalidate_broker(&self, broker_id: &str) -> usize {
        let dependency = broker_dependency(broker_id);
        self.invalidate(None, Some(&dependency))
    }

    /// Eagerly drop expired entries. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut guard = mutex_lock(&self.state, SOURCE, "cleanup_expired");
        let state = &mut *guard;

        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.entries.pop(key);
        }

        gauge!(METRIC_CACHE_ENTRIES).set(state.entries.len() as f64);
        if !expired.is_empty() {
            debug!(removed = expired.len(), "Expired cache entries swept");
        }
        expired.len()
    }

    /// Drop all entries and reset counters.
    pub fn clear(&self) {
        let mut guard = mutex_lock(&self.state, SOURCE, "clear");
        guard.entries.clear();
        guard.counters = Counters::default();
        gauge!(METRIC_CACHE_ENTRIES).set(0.0);
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let guard = mutex_lock(&self.state, SOURCE, "stats");

        let mut total_entries = 0_usize;
        let mut approx_size_bytes = 0_u64;
        let mut oldest = None;
        let mut newest = None;
        for (_, entry) in guard.entries.iter() {
            if entry.is_expired_at(now) {
                continue;
            }
            total_entries += 1;
            approx_size_bytes += entry.size_bytes as u64;
            let age = entry.age_at(now);
            oldest = Some(oldest.map_or(age, |current: Duration| current.max(age)));
            newest = Some(newest.map_or(age, |current: Duration| current.min(age)));
        }

        let counters = guard.counters;
        CacheStats {
            total_entries,
            capacity: guard.entries.cap().get(),
            hit_rate: hit_rate(counters.hits, counters.misses),
            total_hits: counters.hits,
            total_misses: counters.misses,
            total_writes: counters.writes,
            total_invalidations: counters.invalidations,
            total_evictions: counters.evictions,
            approx_size_bytes,
            oldest_entry_age_ms: oldest.map_or(0, duration_ms),
            newest_entry_age_ms: newest.map_or(0, duration_ms),
        }
    }

    pub fn health_report(&self) -> CacheHealthReport {
        CacheHealthReport::evaluate(self.stats(), self.config.size_warning_bytes)
    }

    /// Number of physically stored entries, expired ones included.
    pub fn len(&self) -> usize {
        mutex_lock(&self.state, SOURCE, "len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<P: Serialize> PageCache<P> {
    /// Store a page, evicting least-recently-accessed entries when full.
    ///
    /// Returns the key the page was stored under.
    pub fn set(&self, page_type: PageType, slug: &str, data: P, options: SetOptions) -> String {
        let key = cache_key(page_type, slug, options.filters.as_ref());
        self.set_by_key(key.clone(), data, options);
        key
    }

    /// Store a page under a precomputed key. `options.filters` is ignored.
    ///
    /// Returns the stored payload.
    pub fn set_by_key(&self, key: String, data: P, options: SetOptions) -> Arc<P> {
        let size_bytes = match serde_json::to_vec(&data) {
            Ok(bytes) => bytes.len(),
            Err(err) => {
                warn!(key = %key, error = %err, "Failed to measure cached payload size");
                0
            }
        };

        let data = Arc::new(data);
        let now = Instant::now();
        let ttl = options
            .ttl
            .filter(|ttl| !ttl.is_zero())
            .unwrap_or_else(|| self.config.default_ttl())
            .min(MAX_TTL);
        let entry = CacheEntry {
            key: key.clone(),
            data: Arc::clone(&data),
            generated_at: now,
            expires_at: now + ttl,
            hits: 0,
            last_accessed: now,
            version: options
                .version
                .unwrap_or_else(|| self.config.default_version.clone()),
            dependencies: options.dependencies.into_iter().collect::<BTreeSet<_>>(),
            size_bytes,
        };

        let mut guard = mutex_lock(&self.state, SOURCE, "set");
        let state = &mut *guard;

        if !state.entries.contains(key.as_str()) {
            let capacity = state.entries.cap().get();
            while state.entries.len() >= capacity {
                let Some((evicted, _)) = state.entries.pop_lru() else {
                    break;
                };
                state.counters.evictions += 1;
                counter!(METRIC_CACHE_EVICT).increment(1);
                debug!(key = %evicted, "Evicted least-recently-accessed cache entry");
            }
        }

        state.entries.put(key, entry);
        state.counters.writes += 1;
        gauge!(METRIC_CACHE_ENTRIES).set(state.entries.len() as f64);
        data
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn cache(max_entries: usize) -> PageCache<String> {
        PageCache::new(CacheConfig {
            max_entries,
            ..Default::default()
        })
    }

    fn put(cache: &PageCache<String>, slug: &str) {
        cache.set(PageType::Category, slug, slug.to_string(), SetOptions::new());
    }

    fn has(cache: &PageCache<String>, slug: &str) -> bool {
        cache.get(PageType::Category, slug, None).is_some()
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_at_ttl_boundary() {
        let cache = cache(10);
        cache.set(
            PageType::Country,
            "uk",
            "uk page".to_string(),
            SetOptions::new().ttl(Duration::from_secs(60)),
        );

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(
            cache.get(PageType::Country, "uk", None).map(|hit| hit.data.to_string()),
            Some("uk page".to_string())
        );

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get(PageType::Country, "uk", None).is_none());
        assert_eq!(cache.stats().total_entries, 0);
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn default_ttl_is_two_hours() {
        let cache = cache(10);
        put(&cache, "ecn-brokers");

        tokio::time::advance(Duration::from_secs(2 * 60 * 60 - 1)).await;
        assert!(has(&cache, "ecn-brokers"));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!has(&cache, "ecn-brokers"));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ttl_falls_back_to_default() {
        let cache = cache(10);
        cache.set(
            PageType::Seo,
            "zero",
            "zero".to_string(),
            SetOptions::new().ttl(Duration::ZERO),
        );
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(cache.get(PageType::Seo, "zero", None).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_ttl_is_clamped() {
        let cache = cache(10);
        cache.set(
            PageType::Country,
            "au",
            "au page".to_string(),
            SetOptions::new().ttl(Duration::MAX),
        );

        tokio::time::advance(MAX_TTL - Duration::from_secs(1)).await;
        assert!(cache.get(PageType::Country, "au", None).is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get(PageType::Country, "au", None).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn near_expiry_flag_raised_after_eighty_percent_of_ttl() {
        let cache = cache(10);
        cache.set(
            PageType::Seo,
            "best-brokers",
            "page".to_string(),
            SetOptions::new().ttl(Duration::from_secs(100)),
        );

        tokio::time::advance(Duration::from_secs(79)).await;
        let hit = cache.get(PageType::Seo, "best-brokers", None).unwrap();
        assert!(!hit.near_expiry);

        tokio::time::advance(Duration::from_secs(2)).await;
        let hit = cache.get(PageType::Seo, "best-brokers", None).unwrap();
        assert!(hit.near_expiry);
        assert_eq!(hit.data.as_str(), "page");
        assert_eq!(hit.hits, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn contains_ignores_expired_entries_and_counts_nothing() {
        let cache = cache(10);
        let key = cache.set(
            PageType::Country,
            "de",
            "de".to_string(),
            SetOptions::new().ttl(Duration::from_secs(10)),
        );

        assert!(cache.contains(&key));
        assert!(!cache.contains("programmatic:country:fr"));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!cache.contains(&key));

        let stats = cache.stats();
        assert_eq!(stats.total_hits + stats.total_misses, 0);
    }

    #[test]
    fn eviction_removes_least_recently_accessed() {
        let cache = cache(3);
        put(&cache, "a");
        put(&cache, "b");
        put(&cache, "c");

        // Touch the oldest insert so it outlives later ones.
        assert!(has(&cache, "a"));

        put(&cache, "d");
        put(&cache, "e");

        assert!(has(&cache, "a"));
        assert!(!has(&cache, "b"));
        assert!(!has(&cache, "c"));
        assert!(has(&cache, "d"));
        assert!(has(&cache, "e"));
        assert_eq!(cache.stats().total_evictions, 2);
    }

    #[test]
    fn capacity_plus_k_inserts_evict_exactly_k() {
        let capacity = 5;
        let k = 3;
        let cache = cache(capacity);
        for i in 0..capacity + k {
            put(&cache, &format!("page-{i}"));
        }

        assert_eq!(cache.len(), capacity);
        for i in 0..k {
            assert!(!has(&cache, &format!("page-{i}")));
        }
        for i in k..capacity + k {
            assert!(has(&cache, &format!("page-{i}")));
        }
    }

    #[test]
    fn replacing_a_key_is_not_an_eviction() {
        let cache = cache(2);
        put(&cache, "a");
        put(&cache, "b");
        cache.set(PageType::Category, "a", "updated".to_string(), SetOptions::new());

        let stats = cache.stats();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.total_evictions, 0);
        assert_eq!(
            cache.get(PageType::Category, "a", None).unwrap().data.as_str(),
            "updated"
        );
    }

    #[test]
    fn hit_rate_counts_hits_and_misses() {
        let cache = cache(10);
        for slug in ["a", "b", "c"] {
            put(&cache, slug);
        }
        for slug in ["a", "b", "c", "a"] {
            assert!(has(&cache, slug));
        }
        for slug in ["x", "y"] {
            assert!(!has(&cache, slug));
        }

        let stats = cache.stats();
        assert_eq!(stats.total_hits, 4);
        assert_eq!(stats.total_misses, 2);
        assert!((stats.hit_rate - 4.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn empty_cache_hit_rate_is_zero() {
        assert_eq!(cache(10).stats().hit_rate, 0.0);
    }

    #[test]
    fn dependency_invalidation_is_targeted() {
        let cache = cache(10);
        cache.set(PageType::Category, "one", "1".into(), SetOptions::new().dependency("broker:1"));
        cache.set(PageType::Category, "two", "2".into(), SetOptions::new().dependency("broker:2"));
        cache.set(PageType::Category, "all", "*".into(), SetOptions::new().dependency("brokers:all"));

        assert_eq!(cache.invalidate(None, Some("broker:1")), 1);
        assert!(!has(&cache, "one"));
        assert!(has(&cache, "two"));
        assert!(has(&cache, "all"));

        assert_eq!(cache.invalidate(None, Some("brokers:all")), 1);
        assert!(!has(&cache, "all"));
        assert!(has(&cache, "two"));
    }

    #[test]
    fn invalidate_without_selectors_is_a_no_op() {
        let cache = cache(10);
        put(&cache, "a");
        assert_eq!(cache.invalidate(None, None), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn invalidating_twice_removes_nothing_the_second_time() {
        let cache = cache(10);
        put(&cache, "ecn-brokers");
        put(&cache, "stp-brokers");
        cache.set(PageType::Country, "uk", "uk".into(), SetOptions::new());

        let pattern = KeyPattern::regex("programmatic:category:").unwrap();
        assert_eq!(cache.invalidate(Some(&pattern), None), 2);
        assert_eq!(cache.invalidate(Some(&pattern), None), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn pattern_or_dependency_both_select() {
        let cache = cache(10);
        put(&cache, "ecn-brokers");
        cache.set(PageType::Country, "uk", "uk".into(), SetOptions::new().dependency("broker:7"));
        cache.set(PageType::Seo, "guide", "guide".into(), SetOptions::new());

        let pattern = KeyPattern::substring(":category:");
        assert_eq!(cache.invalidate(Some(&pattern), Some("broker:7")), 2);
        assert!(cache.get(PageType::Seo, "guide", None).is_some());
    }

    #[test]
    fn broker_helpers_use_standard_selectors() {
        let cache = cache(10);
        cache.set(PageType::Category, "a", "a".into(), SetOptions::new().dependency("broker:42"));
        cache.set(PageType::Country, "uk", "uk".into(), SetOptions::new());
        cache.set(PageType::Seo, "guide", "guide".into(), SetOptions::new());

        assert_eq!(cache.invalidate_broker("42"), 1);
        assert_eq!(cache.invalidate_broker_data(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn filtered_pages_are_stored_separately() {
        let cache = cache(10);
        let uk = json!({"country": "uk"});
        cache.set(
            PageType::Category,
            "low-deposit",
            "uk".into(),
            SetOptions::new().filters(uk.clone()),
        );
        put(&cache, "low-deposit");

        assert_eq!(
            cache.get(PageType::Category, "low-deposit", Some(&uk)).unwrap().data.as_str(),
            "uk"
        );
        assert_eq!(
            cache.get(PageType::Category, "low-deposit", None).unwrap().data.as_str(),
            "low-deposit"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_sweeps_only_expired_entries() {
        let cache = cache(10);
        cache.set(PageType::Seo, "short", "s".into(), SetOptions::new().ttl(Duration::from_secs(5)));
        put(&cache, "long");

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.cleanup_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stats_report_sizes_and_ages() {
        let cache = cache(10);
        put(&cache, "first");
        tokio::time::advance(Duration::from_secs(30)).await;
        put(&cache, "second");
        tokio::time::advance(Duration::from_secs(10)).await;

        let stats = cache.stats();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.oldest_entry_age_ms, 40_000);
        assert_eq!(stats.newest_entry_age_ms, 10_000);
        // "first" and "second" serialize with their quotes.
        assert_eq!(stats.approx_size_bytes, 7 + 8);
    }

    #[test]
    fn clear_resets_entries_and_counters() {
        let cache = cache(10);
        put(&cache, "a");
        assert!(has(&cache, "a"));
        cache.clear();

        let stats = cache.stats();
        assert_eq!(stats.total_entries, 0);
        assert_eq!(stats.total_hits, 0);
        assert_eq!(stats.total_writes, 0);
    }

    #[test]
    fn health_report_warns_when_near_capacity() {
        let cache = cache(10);
        for i in 0..10 {
            put(&cache, &format!("page-{i}"));
        }
        for i in 0..10 {
            assert!(has(&cache, &format!("page-{i}")));
        }

        let report = cache.health_report();
        assert_eq!(report.issues, vec!["Cache is near capacity"]);
    }
}
