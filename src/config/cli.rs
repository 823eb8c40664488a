use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

use crate::performance::ExportFormat;

/// Command-line arguments for the programmatic-cache binary.
#[derive(Debug, Parser)]
#[command(
    name = "programmatic-cache",
    version,
    about = "Page cache and invalidation coordinator for programmatic broker pages"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "PROGRAMMATIC_CACHE_CONFIG_FILE",
        value_name = "PATH"
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Drive a synthetic request mix through the cache and report on it.
    Simulate(Box<SimulateArgs>),
}

#[derive(Debug, Args, Clone)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub overrides: SimulateOverrides,

    /// Number of page requests to issue after pre-warming.
    #[arg(long, default_value_t = 200)]
    pub requests: usize,

    /// Number of brokers in the synthetic directory.
    #[arg(long, default_value_t = 60)]
    pub brokers: usize,

    /// Artificial generation latency per page, in milliseconds.
    #[arg(long = "latency-ms", default_value_t = 20)]
    pub latency_ms: u64,

    /// Write the recorded metrics to this file.
    #[arg(long, value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub export: Option<PathBuf>,

    /// Export format (json|csv).
    #[arg(long, default_value_t = ExportFormat::Json)]
    pub format: ExportFormat,
}

impl Default for SimulateArgs {
    fn default() -> Self {
        Self {
            overrides: SimulateOverrides::default(),
            requests: 200,
            brokers: 60,
            latency_ms: 20,
            export: None,
            format: ExportFormat::Json,
        }
    }
}

#[derive(Debug, Args, Default, Clone)]
pub struct SimulateOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the maximum number of cached pages.
    #[arg(long = "cache-max-entries", value_name = "COUNT")]
    pub cache_max_entries: Option<u64>,

    /// Override the default page TTL.
    #[arg(long = "cache-default-ttl-seconds", value_name = "SECONDS")]
    pub cache_default_ttl_seconds: Option<u64>,

    /// Override the invalidation debounce window.
    #[arg(long = "invalidation-debounce-ms", value_name = "MILLIS")]
    pub invalidation_debounce_ms: Option<u64>,

    /// Override the slow page threshold.
    #[arg(long = "performance-slow-load-ms", value_name = "MILLIS")]
    pub performance_slow_load_ms: Option<f64>,

    /// Toggle background refresh of near-expiry pages.
    #[arg(
        long = "loader-background-refresh",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub loader_background_refresh: Option<bool>,
}
