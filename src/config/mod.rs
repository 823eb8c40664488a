//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    collections::{BTreeMap, BTreeSet},
    num::NonZeroUsize,
    str::FromStr,
    time::Duration,
};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::loader::LoaderConfig;
use crate::cache::{CacheConfig, MAX_TTL};
use crate::invalidation::{
    CategoryImpactMap, CoordinatorConfig, InvalidationRule, MAX_DEBOUNCE,
};
use crate::performance::{MAX_REALTIME_WINDOW_SECS, PerformanceConfig};

mod cli;

pub use cli::{CliArgs, Command, SimulateArgs, SimulateOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "programmatic-cache";
const ENV_PREFIX: &str = "PROGRAMMATIC_CACHE";

#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub invalidation: InvalidationSettings,
    pub performance: PerformanceSettings,
    pub loader: LoaderSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub default_ttl: Duration,
    pub max_entries: NonZeroUsize,
    pub refresh_threshold: f64,
    pub size_warning_bytes: u64,
    /// Zero disables the background sweep.
    pub sweep_interval: Duration,
    pub default_version: String,
}

#[derive(Debug, Clone)]
pub struct InvalidationSettings {
    pub debounce: Duration,
    pub significant_fields: BTreeSet<String>,
    pub rules: Vec<InvalidationRule>,
    pub category_impact: CategoryImpactMap,
}

#[derive(Debug, Clone)]
pub struct PerformanceSettings {
    pub buffer_capacity: NonZeroUsize,
    pub slow_load_ms: f64,
    pub aggregation_interval: Duration,
    pub realtime_window: Duration,
    pub error_log_capacity: NonZeroUsize,
    pub batch_log_capacity: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct LoaderSettings {
    pub background_refresh: bool,
    pub refresh_delay: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Simulate(args)) => raw.apply_overrides(&args.overrides),
        None => raw.apply_overrides(&SimulateOverrides::default()),
    }

    Settings::from_raw(raw)
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    use clap::Parser;

    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

impl Default for Settings {
    fn default() -> Self {
        let cache = CacheConfig::default();
        let invalidation = CoordinatorConfig::default();
        let performance = PerformanceConfig::default();
        let loader = LoaderConfig::default();

        Self {
            logging: LoggingSettings {
                level: LevelFilter::INFO,
                format: LogFormat::Compact,
            },
            cache: CacheSettings {
                default_ttl: Duration::from_secs(cache.default_ttl_secs),
                max_entries: cache.max_entries_non_zero(),
                refresh_threshold: cache.refresh_threshold,
                size_warning_bytes: cache.size_warning_bytes,
                sweep_interval: Duration::from_secs(cache.sweep_interval_secs),
                default_version: cache.default_version,
            },
            invalidation: InvalidationSettings {
                debounce: invalidation.debounce(),
                significant_fields: invalidation.significant_fields,
                rules: invalidation.rules,
                category_impact: invalidation.category_impact,
            },
            performance: PerformanceSettings {
                buffer_capacity: non_zero(performance.buffer_capacity),
                slow_load_ms: performance.slow_load_ms,
                aggregation_interval: performance.aggregation_interval(),
                realtime_window: Duration::from_secs(performance.realtime_window_secs),
                error_log_capacity: non_zero(performance.error_log_capacity),
                batch_log_capacity: non_zero(performance.batch_log_capacity),
            },
            loader: LoaderSettings {
                background_refresh: loader.background_refresh,
                refresh_delay: loader.refresh_delay(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    invalidation: RawInvalidationSettings,
    performance: RawPerformanceSettings,
    loader: RawLoaderSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &SimulateOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(max) = overrides.cache_max_entries {
            self.cache.max_entries = Some(max);
        }
        if let Some(seconds) = overrides.cache_default_ttl_seconds {
            self.cache.default_ttl_seconds = Some(seconds);
        }
        if let Some(millis) = overrides.invalidation_debounce_ms {
            self.invalidation.debounce_ms = Some(millis);
        }
        if let Some(millis) = overrides.performance_slow_load_ms {
            self.performance.slow_load_ms = Some(millis);
        }
        if let Some(enabled) = overrides.loader_background_refresh {
            self.loader.background_refresh = Some(enabled);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            cache,
            invalidation,
            performance,
            loader,
        } = raw;
        let defaults = Settings::default();

        Ok(Self {
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache, defaults.cache)?,
            invalidation: build_invalidation_settings(invalidation, defaults.invalidation)?,
            performance: build_performance_settings(performance, defaults.performance)?,
            loader: build_loader_settings(loader, defaults.loader),
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(
    cache: RawCacheSettings,
    defaults: CacheSettings,
) -> Result<CacheSettings, LoadError> {
    let default_ttl = match cache.default_ttl_seconds {
        Some(0) => {
            return Err(LoadError::invalid(
                "cache.default_ttl_seconds",
                "must be greater than zero",
            ));
        }
        Some(seconds) if seconds > MAX_TTL.as_secs() => {
            return Err(LoadError::invalid(
                "cache.default_ttl_seconds",
                format!("must not exceed {} seconds", MAX_TTL.as_secs()),
            ));
        }
        Some(seconds) => Duration::from_secs(seconds),
        None => defaults.default_ttl,
    };

    let max_entries = match cache.max_entries {
        Some(value) => non_zero_usize(value, "cache.max_entries")?,
        None => defaults.max_entries,
    };

    let refresh_threshold = cache.refresh_threshold.unwrap_or(defaults.refresh_threshold);
    if !(0.0..=1.0).contains(&refresh_threshold) {
        return Err(LoadError::invalid(
            "cache.refresh_threshold",
            "must be between 0 and 1",
        ));
    }

    let default_version = match cache.default_version {
        Some(version) if version.trim().is_empty() => {
            return Err(LoadError::invalid(
                "cache.default_version",
                "must not be empty",
            ));
        }
        Some(version) => version.trim().to_string(),
        None => defaults.default_version,
    };

    Ok(CacheSettings {
        default_ttl,
        max_entries,
        refresh_threshold,
        size_warning_bytes: cache.size_warning_bytes.unwrap_or(defaults.size_warning_bytes),
        sweep_interval: cache
            .sweep_interval_seconds
            .map_or(defaults.sweep_interval, Duration::from_secs),
        default_version,
    })
}

fn build_invalidation_settings(
    invalidation: RawInvalidationSettings,
    defaults: InvalidationSettings,
) -> Result<InvalidationSettings, LoadError> {
    let significant_fields = match invalidation.significant_fields {
        Some(fields) => fields
            .into_iter()
            .map(|field| field.trim().to_string())
            .filter(|field| !field.is_empty())
            .collect(),
        None => defaults.significant_fields,
    };

    let rules = invalidation.rules.unwrap_or(defaults.rules);
    for rule in &rules {
        rule.key_patterns()
            .map_err(|err| LoadError::invalid("invalidation.rules", err.to_string()))?;
    }

    let mut category_impact = defaults.category_impact;
    for (field, slugs) in invalidation.category_impact.unwrap_or_default() {
        if slugs.iter().any(|slug| slug.trim().is_empty()) {
            return Err(LoadError::invalid(
                "invalidation.category_impact",
                format!("empty slug registered for `{field}`"),
            ));
        }
        category_impact.register(field, slugs);
    }

    let debounce = invalidation
        .debounce_ms
        .map_or(defaults.debounce, Duration::from_millis);
    if debounce > MAX_DEBOUNCE {
        return Err(LoadError::invalid(
            "invalidation.debounce_ms",
            format!("must not exceed {} milliseconds", MAX_DEBOUNCE.as_millis()),
        ));
    }

    Ok(InvalidationSettings {
        debounce,
        significant_fields,
        rules,
        category_impact,
    })
}

fn build_performance_settings(
    performance: RawPerformanceSettings,
    defaults: PerformanceSettings,
) -> Result<PerformanceSettings, LoadError> {
    let buffer_capacity = match performance.buffer_capacity {
        Some(value) => non_zero_usize(value, "performance.buffer_capacity")?,
        None => defaults.buffer_capacity,
    };

    let slow_load_ms = performance.slow_load_ms.unwrap_or(defaults.slow_load_ms);
    if !slow_load_ms.is_finite() || slow_load_ms <= 0.0 {
        return Err(LoadError::invalid(
            "performance.slow_load_ms",
            "must be a positive number of milliseconds",
        ));
    }

    let realtime_window = match performance.realtime_window_seconds {
        Some(0) => {
            return Err(LoadError::invalid(
                "performance.realtime_window_seconds",
                "must be greater than zero",
            ));
        }
        Some(seconds) if seconds > MAX_REALTIME_WINDOW_SECS => {
            return Err(LoadError::invalid(
                "performance.realtime_window_seconds",
                format!("must not exceed {MAX_REALTIME_WINDOW_SECS} seconds"),
            ));
        }
        Some(seconds) => Duration::from_secs(seconds),
        None => defaults.realtime_window,
    };

    let error_log_capacity = match performance.error_log_capacity {
        Some(value) => non_zero_usize(value, "performance.error_log_capacity")?,
        None => defaults.error_log_capacity,
    };
    let batch_log_capacity = match performance.batch_log_capacity {
        Some(value) => non_zero_usize(value, "performance.batch_log_capacity")?,
        None => defaults.batch_log_capacity,
    };

    Ok(PerformanceSettings {
        buffer_capacity,
        slow_load_ms,
        aggregation_interval: performance
            .aggregation_interval_seconds
            .map_or(defaults.aggregation_interval, Duration::from_secs),
        realtime_window,
        error_log_capacity,
        batch_log_capacity,
    })
}

fn build_loader_settings(loader: RawLoaderSettings, defaults: LoaderSettings) -> LoaderSettings {
    LoaderSettings {
        background_refresh: loader.background_refresh.unwrap_or(defaults.background_refresh),
        refresh_delay: loader
            .refresh_delay_ms
            .map_or(defaults.refresh_delay, Duration::from_millis),
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    default_ttl_seconds: Option<u64>,
    max_entries: Option<u64>,
    refresh_threshold: Option<f64>,
    size_warning_bytes: Option<u64>,
    sweep_interval_seconds: Option<u64>,
    default_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawInvalidationSettings {
    debounce_ms: Option<u64>,
    significant_fields: Option<Vec<String>>,
    rules: Option<Vec<InvalidationRule>>,
    category_impact: Option<BTreeMap<String, Vec<String>>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPerformanceSettings {
    buffer_capacity: Option<u64>,
    slow_load_ms: Option<f64>,
    aggregation_interval_seconds: Option<u64>,
    realtime_window_seconds: Option<u64>,
    error_log_capacity: Option<u64>,
    batch_log_capacity: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoaderSettings {
    background_refresh: Option<bool>,
    refresh_delay_ms: Option<u64>,
}

fn non_zero(value: usize) -> NonZeroUsize {
    NonZeroUsize::new(value).unwrap_or(NonZeroUsize::MIN)
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
