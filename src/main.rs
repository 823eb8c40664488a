use std::{process, sync::Arc, time::Duration};

use futures::future::join_all;
use programmatic_cache::{
    application::{
        error::AppError,
        generator::{PageGenerator, SyntheticGenerator},
        loader::PreWarmPage,
        service::{PageCacheService, ServiceConfig},
    },
    config::{self, SimulateArgs},
    domain::page::{PageRequest, PageType},
    infra::{error::InfraError, telemetry},
};
use serde_json::json;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const CATEGORY_SLUGS: [&str; 8] = [
    "islamic-swap-free",
    "copy-trading",
    "no-minimum-deposit",
    "low-deposit",
    "metatrader4-mt4",
    "metatrader5-mt5",
    "uk-fca-regulated",
    "ecn-brokers",
];
const COUNTRY_SLUGS: [&str; 4] = ["united-kingdom", "australia", "germany", "south-africa"];
const SEO_SLUGS: [&str; 3] = ["best-forex-brokers", "beginner-brokers", "missing-guide"];
const CONCURRENCY: usize = 16;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, chain = ?error.chain(), "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, chain = ?error.chain(), "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Simulate(Box::<SimulateArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Simulate(args) => run_simulate(settings, *args).await,
    }
}

async fn run_simulate(settings: config::Settings, args: SimulateArgs) -> Result<(), AppError> {
    let generator = Arc::new(SyntheticGenerator::new(
        args.brokers,
        Duration::from_millis(args.latency_ms),
    ));
    let service_config = ServiceConfig::from(&settings);
    let service = PageCacheService::create(
        &service_config,
        Arc::clone(&generator) as Arc<dyn PageGenerator>,
    )?;

    let catalogue = catalogue()?;
    let pre_warm: Vec<PreWarmPage> = catalogue
        .iter()
        .take(CATEGORY_SLUGS.len())
        .enumerate()
        .map(|(rank, request)| {
            PreWarmPage::new(request.clone(), (CATEGORY_SLUGS.len() - rank) as u32)
        })
        .collect();
    let summary = service.loader().pre_warm(pre_warm).await;
    info!(
        target = "programmatic_cache::simulate",
        warmed = summary.warmed,
        skipped = summary.skipped,
        failed = summary.failed,
        "Pre-warm finished"
    );

    drive_traffic(&service, &catalogue, args.requests).await;

    let trigger = service.trigger();
    trigger
        .on_broker_update(
            "3",
            vec!["description".to_string()],
            json!({ "description": "Established 2009" }),
            json!({ "description": "Established 2009, regulated in three jurisdictions" }),
        )
        .await;
    if let Some(broker) = generator.brokers().first() {
        trigger.on_broker_create(broker).await;
    }
    trigger
        .on_broker_update(
            "5",
            vec!["minDeposit".to_string()],
            json!({ "minDeposit": 250 }),
            json!({ "minDeposit": 100 }),
        )
        .await;
    trigger
        .on_config_change("category", vec!["copy-trading".to_string()])
        .await;

    let debounce = service_config.invalidation.debounce();
    tokio::time::sleep(debounce + Duration::from_millis(100)).await;

    drive_traffic(&service, &catalogue, args.requests / 2).await;
    log_summary(&service);

    if let Some(path) = args.export.as_ref() {
        let exported = service.recorder().export(args.format)?;
        tokio::fs::write(path, exported)
            .await
            .map_err(|err| InfraError::write(path, err))?;
        info!(
            target = "programmatic_cache::simulate",
            path = %path.display(),
            format = %args.format,
            metrics = service.recorder().len(),
            "Metrics exported"
        );
    }

    service.shutdown().await?;
    Ok(())
}

fn catalogue() -> Result<Vec<PageRequest>, AppError> {
    let categories = CATEGORY_SLUGS
        .iter()
        .map(|slug| PageRequest::new(PageType::Category, *slug));
    let countries = COUNTRY_SLUGS
        .iter()
        .map(|slug| PageRequest::new(PageType::Country, *slug));
    let seo = SEO_SLUGS
        .iter()
        .map(|slug| PageRequest::new(PageType::Seo, *slug));

    let mut pages = categories
        .chain(countries)
        .chain(seo)
        .collect::<Result<Vec<_>, _>>()?;

    let filtered = PageRequest::new(PageType::Category, "low-deposit")?
        .with_filters(json!({ "platform": "MT5", "minScore": 7 }));
    pages.push(filtered);
    Ok(pages)
}

/// Issue `requests` loads, skewed towards the start of the catalogue.
async fn drive_traffic(service: &PageCacheService, catalogue: &[PageRequest], requests: usize) {
    let picks: Vec<&PageRequest> = (0..requests)
        .map(|index| {
            let popular = index % 3 != 0;
            let slot = if popular {
                index % 4
            } else {
                (index * 7) % catalogue.len()
            };
            &catalogue[slot.min(catalogue.len() - 1)]
        })
        .collect();

    let mut failures = 0usize;
    for chunk in picks.chunks(CONCURRENCY) {
        let results = join_all(chunk.iter().map(|request| service.load(request))).await;
        failures += results.iter().filter(|result| result.is_err()).count();
    }

    if failures > 0 {
        warn!(
            target = "programmatic_cache::simulate",
            requests,
            failures,
            "Some page loads failed"
        );
    }
}

fn log_summary(service: &PageCacheService) {
    let health = service.cache().health_report();
    let stats = &health.stats;
    info!(
        target = "programmatic_cache::simulate",
        entries = stats.total_entries,
        capacity = stats.capacity,
        hit_rate = stats.hit_rate,
        hits = stats.total_hits,
        misses = stats.total_misses,
        invalidations = stats.total_invalidations,
        evictions = stats.total_evictions,
        approx_size_bytes = stats.approx_size_bytes,
        "Cache statistics"
    );
    info!(
        target = "programmatic_cache::simulate",
        status = %health.status,
        issues = ?health.issues,
        recommendations = ?health.recommendations,
        "Cache health"
    );

    let coordinator = service.coordinator().stats();
    info!(
        target = "programmatic_cache::simulate",
        queue_length = coordinator.queue_length,
        rules = coordinator.rules_count,
        batches = coordinator.batches_processed,
        state = ?coordinator.last_processed_state,
        last_batch = ?coordinator.last_batch,
        "Invalidation coordinator"
    );

    let realtime = service.recorder().realtime_stats();
    info!(
        target = "programmatic_cache::simulate",
        current_load = realtime.current_load,
        avg_load_time = realtime.avg_load_time,
        health = %realtime.system_health,
        recent_errors = realtime.recent_errors,
        "Realtime view"
    );

    let report = service.recorder().system_report();
    info!(
        target = "programmatic_cache::simulate",
        views = report.total_page_views,
        unique_pages = report.unique_pages,
        avg_load_time = report.avg_load_time,
        cache_hit_rate = report.cache_hit_rate,
        "System report"
    );
    for recommendation in &report.recommendations {
        info!(target = "programmatic_cache::simulate", %recommendation, "Recommendation");
    }
}
