//! Logging system configuration and initialization
//!
//! - Console output and daily-rolling file output (either or both)
//! - Optional structured JSON lines for the file output
//! - `RUST_LOG` overrides the configured level
//! - KST (Korea Standard Time) timestamps

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use chrono::{FixedOffset, Utc};
use lazy_static::lazy_static;
use tracing::info;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub use crate::infrastructure::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "musinsa-price-crawler.log";

// Keeps the non-blocking file writer alive for the whole process
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>> = Mutex::new(Vec::new());
}

/// Timestamps in KST (UTC+9)
struct KstTimeFormatter;

impl FormatTime for KstTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        let kst = FixedOffset::east_opt(9 * 3600).ok_or(std::fmt::Error)?;
        write!(w, "{}", Utc::now().with_timezone(&kst).format("%Y-%m-%d %H:%M:%S%.3f %:z"))
    }
}

/// Configured log directory, or `logs/` next to the executable.
pub fn get_log_directory(config: &LoggingConfig) -> PathBuf {
    if let Some(dir) = &config.log_dir {
        return dir.clone();
    }
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(std::path::Path::to_path_buf))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default())
        .join("logs")
}

/// Base filter: `RUST_LOG` when set, otherwise the configured level with
/// dependency noise suppressed unless the level is `trace`.
fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut filter = EnvFilter::try_new(&config.level)
        .with_context(|| format!("Invalid log level: {}", config.level))?;
    if !config.level.to_lowercase().contains("trace") {
        for directive in [
            "sqlx::query=warn",
            "sqlx::sqlite=warn",
            "reqwest=info",
            "hyper=warn",
            "hyper_util=warn",
            "h2=warn",
            "chromiumoxide=warn",
            "tokio=info",
        ] {
            filter = filter.add_directive(directive.parse()?);
        }
        if !config.level.contains(['=', ',']) {
            filter = filter.add_directive(format!("musinsa_price_crawler={}", config.level).parse()?);
        }
    }
    Ok(filter)
}

/// Install the global subscriber. Fails if no output is enabled or a
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    if !config.file_output && !config.console_output {
        return Err(anyhow!("No logging output configured"));
    }

    let env_filter = build_env_filter(config)?;
    let log_dir = get_log_directory(config);

    let file_layer = if config.file_output {
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
        let (writer, guard) = non_blocking(rolling::daily(&log_dir, LOG_FILE_PREFIX));
        LOG_GUARDS
            .lock()
            .map_err(|_| anyhow!("log guard registry poisoned"))?
            .push(guard);

        let layer = if config.json_format {
            fmt::Layer::new()
                .json()
                .with_writer(writer)
                .with_timer(KstTimeFormatter)
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .boxed()
        } else {
            fmt::Layer::new()
                .with_writer(writer)
                .with_timer(KstTimeFormatter)
                .with_target(false)
                .with_ansi(false)
                .boxed()
        };
        Some(layer)
    } else {
        None
    };

    let console_layer = config.console_output.then(|| {
        fmt::Layer::new()
            .with_writer(std::io::stdout)
            .with_timer(KstTimeFormatter)
            .with_target(false)
    });

    Registry::default()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {e}"))?;

    info!("📝 Logging initialized (level: {}, json: {})", config.level, config.json_format);
    if config.file_output {
        info!("📁 Log directory: {}", log_dir.display());
    }
    Ok(())
}

/// Log system information for diagnostics
pub fn log_system_info() {
    info!("=== Musinsa Price Crawler ===");
    info!("Application version: {}", env!("CARGO_PKG_VERSION"));
    info!("Operating system: {}", std::env::consts::OS);
    info!("Architecture: {}", std::env::consts::ARCH);
}
