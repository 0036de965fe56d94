//! This module handles the initial setup of the application.
use super::args::AppArgs;
use anyhow::{anyhow, Context, Result};
use logtap::interceptors::{CaptureLayer, ExpectedError};
use logtap::{CoreConfig, LogFilter, Severity};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Everything the selected mode needs to run.
pub struct PreparedApp {
    pub args: AppArgs,
    pub config: CoreConfig,
    /// Filter applied when printing the history.
    pub filter: LogFilter,
}

/// Prepares the application for running.
///
/// Loads the config file if one was given, applies command-line overrides,
/// points persistence at the data directory and builds the viewer filter.
///
/// # Errors
///
/// Returns an error if the config file is invalid, the data directory cannot
/// be created, or `--level` is not a severity.
pub fn prepare(args: AppArgs) -> Result<PreparedApp> {
    let mut config = match &args.config {
        Some(path) => CoreConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => default_config(),
    };

    if let Some(capacity) = args.capacity {
        config.capacity = capacity;
    }

    std::fs::create_dir_all(&args.data_dir)?;
    config.persistence.enabled = true;
    if config.persistence.path.is_none() {
        config.persistence.path = Some(args.data_dir.join("console"));
    }
    config.validate()?;

    let mut filter = LogFilter::new();
    if let Some(level) = &args.level {
        let severity = Severity::parse(level).ok_or_else(|| anyhow!("unknown level '{}'", level))?;
        filter = filter.at_least(severity);
    }
    if let Some(text) = &args.filter {
        filter = filter.matching(text.clone());
    }

    print_start_banner(&args, &config);

    Ok(PreparedApp {
        args,
        config,
        filter,
    })
}

/// The configuration used when no config file is given.
fn default_config() -> CoreConfig {
    let mut config = CoreConfig::default();
    config.scanner.enabled = true;
    config.scanner.warmup_ms = 200;
    config.scanner.interval_ms = 500;
    config
        .expected_errors
        .push(ExpectedError::exact("assets.example.com", 404));
    config
}

/// Configures logging for the host mode.
///
/// The host's own formatting layer keeps writing to stderr while the capture
/// layer feeds the same events into the history.
pub fn configure_logging(capture: CaptureLayer) -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(capture)
        .try_init()?;
    Ok(())
}

/// Configures plain stderr logging for the recovery mode.
pub fn configure_plain_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn"))
        .with_writer(std::io::stderr)
        .try_init();
}

/// Prints a banner with startup information.
fn print_start_banner(args: &AppArgs, config: &CoreConfig) {
    println!("Starting logtap");
    println!("Mode: {}", if args.recover { "Recovery" } else { "Host demo" });
    println!("Capacity: {} entries", config.capacity);
    if let Some(path) = &config.persistence.path {
        println!("History: {}", path.display());
    }
    println!();
}
