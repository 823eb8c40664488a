use std::collections::HashSet;
use std::sync::Arc;

use metrics_util::debugging::DebuggingRecorder;
use programmatic_cache::cache::{CacheConfig, KeyPattern, PageCache, SetOptions};
use programmatic_cache::domain::page::PageType;
use programmatic_cache::infra::telemetry;
use programmatic_cache::invalidation::{CoordinatorConfig, EventKind, InvalidationCoordinator};
use programmatic_cache::performance::{LoadContext, PerformanceConfig, PerformanceRecorder};
use serial_test::serial;

#[tokio::test]
#[serial]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    telemetry::describe_metrics();

    // Hit, miss, eviction and invalidation on a single-slot cache.
    let config = CacheConfig {
        max_entries: 1,
        ..CacheConfig::default()
    };
    let cache = Arc::new(PageCache::<String>::new(config));
    assert!(cache.get(PageType::Seo, "guide", None).is_none());
    cache.set(PageType::Seo, "guide", "guide".to_string(), SetOptions::new());
    assert!(cache.get(PageType::Seo, "guide", None).is_some());
    cache.set(PageType::Seo, "faq", "faq".to_string(), SetOptions::new());
    let pattern = KeyPattern::glob("programmatic:seo:*").unwrap();
    assert_eq!(cache.invalidate(Some(&pattern), None), 1);

    // Queue gauge and batch latency.
    let coordinator = InvalidationCoordinator::new(Arc::clone(&cache), &CoordinatorConfig::default());
    coordinator
        .notify(EventKind::BrokerDelete {
            broker_id: "1".to_string(),
        })
        .await;

    // Page load latency.
    let performance = PerformanceRecorder::new(PerformanceConfig::default());
    performance.record(PageType::Seo, "guide", 12.0, true, 3, LoadContext::default());

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "programmatic_cache_hit_total",
        "programmatic_cache_miss_total",
        "programmatic_cache_evict_total",
        "programmatic_cache_invalidated_total",
        "programmatic_cache_entries",
        "programmatic_invalidation_queue_len",
        "programmatic_invalidation_batch_ms",
        "programmatic_page_load_ms",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
