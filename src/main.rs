//! Scheduler daemon: runs the configured crawl jobs until interrupted.
//!
//! Usage: `musinsa-price-crawler [config.toml]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use musinsa_price_crawler::JobScheduler;
use musinsa_price_crawler::infrastructure::config::AppConfig;
use musinsa_price_crawler::infrastructure::database_connection::DatabaseConnection;
use musinsa_price_crawler::infrastructure::logging::{init_logging, log_system_info};
use musinsa_price_crawler::infrastructure::page_loader::PageLoader;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref()).context("Failed to load configuration")?;
    init_logging(&config.logging).context("Failed to initialize logging")?;
    log_system_info();

    info!("🚀 Musinsa price crawler starting");

    let database = DatabaseConnection::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to open database")?;
    database.migrate().await.context("Failed to migrate database")?;

    let loader = page_loader(&config).await?;
    info!("🌐 Page loader: {}", loader.name());

    let scheduler = JobScheduler::new(&config, &database, loader).context("Failed to build scheduler")?;
    let recovered = scheduler.start().await.context("Failed to start scheduler")?;
    if !recovered.is_empty() {
        info!("♻️ Recovered {} stale run(s)", recovered.len());
    }

    let mut events = scheduler.subscribe();
    let monitor = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!(
                kind = %event.kind,
                status = %event.status,
                attempted = event.counts.attempted,
                succeeded = event.counts.succeeded,
                failed = event.counts.failed,
                skipped = event.counts.skipped,
                elapsed_ms = event.elapsed_ms,
                "📊 Run completed"
            );
        }
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    scheduler.shutdown().await;
    monitor.abort();
    database.close().await;
    info!("👋 Musinsa price crawler stopped");
    Ok(())
}

#[cfg(feature = "browser")]
async fn page_loader(config: &AppConfig) -> Result<Arc<dyn PageLoader>> {
    use musinsa_price_crawler::infrastructure::browser_page_loader::BrowserPageLoader;

    let loader = BrowserPageLoader::launch(&config.crawler)
        .await
        .context("Failed to launch headless browser")?;
    Ok(Arc::new(loader))
}

#[cfg(not(feature = "browser"))]
#[allow(clippy::unused_async)]
async fn page_loader(config: &AppConfig) -> Result<Arc<dyn PageLoader>> {
    use musinsa_price_crawler::infrastructure::page_loader::HttpPageLoader;

    let loader = HttpPageLoader::new(&config.crawler).context("Failed to build HTTP client")?;
    Ok(Arc::new(loader))
}
