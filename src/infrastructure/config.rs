//! Configuration infrastructure
//!
//! Layered loading with the `config` crate:
//! 1. Built-in defaults (`AppConfig::default()`)
//! 2. Optional TOML file (`config/default.toml` unless another path is given)
//! 3. Environment variables prefixed `MUSINSA_`, `__` between sections
//!    (e.g. `MUSINSA_CRAWLER__CONCURRENCY_LIMIT=5`)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::domain::job::JobKind;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {source}")]
    FileLoad {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },
}

impl ConfigError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub crawler: CrawlerConfig,
    pub catalog: CatalogConfig,
    pub scheduler: SchedulerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

/// Fetch pacing, retries and deadlines
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Maximum simultaneous page fetches
    pub concurrency_limit: usize,
    pub per_target_timeout_secs: u64,
    /// Retries after the first attempt for retryable fetch failures
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Minimum spacing between two requests to the same site (0 disables)
    pub min_request_spacing_ms: u64,
    pub run_deadline_secs: u64,
    pub user_agent: String,
}

/// Store catalogue: where listings live and which categories to crawl
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub base_url: String,
    /// Listing URL with `{category}` and `{page}` placeholders
    pub listing_url_template: String,
    pub max_listing_pages: u32,
    /// Cap on product targets per category (0 = unlimited)
    pub max_targets_per_category: usize,
    /// Store category code → display name
    pub categories: BTreeMap<String, String>,
    /// Categories sampled per category refresh run (0 = all)
    pub categories_per_run: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Running rows older than this are reclassified as failed on start
    pub stale_run_grace_secs: u64,
    /// Fire every enabled job once right after start
    pub run_on_startup: bool,
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub category_refresh: JobScheduleConfig,
    pub product_refresh: JobScheduleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobScheduleConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable JSON format for structured logging
    pub json_format: bool,
    pub console_output: bool,
    pub file_output: bool,
    /// Directory for rolling log files; next to the executable when empty
    pub log_dir: Option<PathBuf>,
}

/// Default values
pub mod defaults {
    pub const CONCURRENCY_LIMIT: usize = 3;
    pub const PER_TARGET_TIMEOUT_SECS: u64 = 30;
    pub const MAX_RETRIES: u32 = 3;
    pub const BASE_BACKOFF_MS: u64 = 1_000;
    pub const MAX_BACKOFF_MS: u64 = 60_000;
    /// 요청 간 2초 대기
    pub const MIN_REQUEST_SPACING_MS: u64 = 2_000;
    pub const RUN_DEADLINE_SECS: u64 = 3_600;
    pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

    pub const BASE_URL: &str = "https://www.musinsa.com";
    pub const LISTING_URL_TEMPLATE: &str = "https://www.musinsa.com/category/{category}?d_cat_cd={category}&brand=&list_kind=small&sort=pop&page={page}";
    pub const MAX_LISTING_PAGES: u32 = 10;
    pub const MAX_TARGETS_PER_CATEGORY: usize = 15;
    pub const CATEGORIES_PER_RUN: usize = 4;

    /// Top-level store categories (code, name). Codes key the config map
    /// because `config` key paths only accept ASCII.
    pub const CATEGORIES: &[(&str, &str)] = &[
        ("001", "상의"),
        ("002", "아우터"),
        ("003", "하의"),
        ("007", "모자"),
        ("008", "양말"),
        ("009", "언더웨어"),
        ("010", "악세서리"),
        ("022", "신발"),
        ("025", "가방"),
    ];

    pub const STALE_RUN_GRACE_SECS: u64 = 7_200;
    /// 카테고리 탐색: 6시간마다
    pub const CATEGORY_REFRESH_INTERVAL_SECS: u64 = 21_600;
    /// 상품 가격 갱신: 1시간마다
    pub const PRODUCT_REFRESH_INTERVAL_SECS: u64 = 3_600;

    pub const DB_MAX_CONNECTIONS: u32 = 5;
    pub const DB_FILE_NAME: &str = "musinsa.db";
    pub const APP_DIR_NAME: &str = "musinsa-price-crawler";

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_JSON_FORMAT: bool = false;
    pub const LOG_CONSOLE_OUTPUT: bool = true;
    pub const LOG_FILE_OUTPUT: bool = true;

    pub const CONFIG_PATH: &str = "config/default.toml";
    pub const ENV_PREFIX: &str = "MUSINSA";
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: defaults::CONCURRENCY_LIMIT,
            per_target_timeout_secs: defaults::PER_TARGET_TIMEOUT_SECS,
            max_retries: defaults::MAX_RETRIES,
            base_backoff_ms: defaults::BASE_BACKOFF_MS,
            max_backoff_ms: defaults::MAX_BACKOFF_MS,
            min_request_spacing_ms: defaults::MIN_REQUEST_SPACING_MS,
            run_deadline_secs: defaults::RUN_DEADLINE_SECS,
            user_agent: defaults::USER_AGENT.to_string(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::BASE_URL.to_string(),
            listing_url_template: defaults::LISTING_URL_TEMPLATE.to_string(),
            max_listing_pages: defaults::MAX_LISTING_PAGES,
            max_targets_per_category: defaults::MAX_TARGETS_PER_CATEGORY,
            categories: defaults::CATEGORIES
                .iter()
                .map(|(code, name)| ((*code).to_string(), (*name).to_string()))
                .collect(),
            categories_per_run: defaults::CATEGORIES_PER_RUN,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            stale_run_grace_secs: defaults::STALE_RUN_GRACE_SECS,
            run_on_startup: false,
            jobs: JobsConfig::default(),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            category_refresh: JobScheduleConfig {
                enabled: true,
                interval_secs: defaults::CATEGORY_REFRESH_INTERVAL_SECS,
            },
            product_refresh: JobScheduleConfig {
                enabled: true,
                interval_secs: defaults::PRODUCT_REFRESH_INTERVAL_SECS,
            },
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: defaults::DB_MAX_CONNECTIONS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: defaults::LOG_JSON_FORMAT,
            console_output: defaults::LOG_CONSOLE_OUTPUT,
            file_output: defaults::LOG_FILE_OUTPUT,
            log_dir: None,
        }
    }
}

/// `sqlite:` URL of the database file in the user's local data directory,
/// or in the working directory when that cannot be determined.
fn default_database_url() -> String {
    let path = dirs::data_local_dir()
        .map(|dir| dir.join(defaults::APP_DIR_NAME).join(defaults::DB_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(defaults::DB_FILE_NAME));
    format!("sqlite:{}", path.display())
}

impl AppConfig {
    /// Load defaults, then `path` (or `config/default.toml`) if it exists,
    /// then `MUSINSA_*` environment overrides, and validate the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = path.map_or_else(|| PathBuf::from(defaults::CONFIG_PATH), Path::to_path_buf);

        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::from(file.as_path()).required(path.is_some()))
            .add_source(
                config::Environment::with_prefix(defaults::ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        info!("⚙️ Configuration loaded (file: {})", file.display());
        Ok(config)
    }

    /// Parse a TOML document on top of the defaults. Used by tests and tools.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let crawler = &self.crawler;
        if crawler.concurrency_limit == 0 {
            return Err(ConfigError::invalid("crawler.concurrency_limit must be greater than 0"));
        }
        if crawler.per_target_timeout_secs == 0 {
            return Err(ConfigError::invalid("crawler.per_target_timeout_secs must be greater than 0"));
        }
        if crawler.run_deadline_secs == 0 {
            return Err(ConfigError::invalid("crawler.run_deadline_secs must be greater than 0"));
        }
        if crawler.base_backoff_ms > crawler.max_backoff_ms {
            return Err(ConfigError::invalid("crawler.base_backoff_ms cannot be greater than max_backoff_ms"));
        }

        let catalog = &self.catalog;
        if catalog.listing_url_template.trim().is_empty() {
            return Err(ConfigError::invalid("catalog.listing_url_template must not be empty"));
        }
        if !catalog.listing_url_template.contains("{category}") {
            return Err(ConfigError::invalid("catalog.listing_url_template needs a {category} placeholder"));
        }
        if catalog.max_listing_pages == 0 {
            return Err(ConfigError::invalid("catalog.max_listing_pages must be greater than 0"));
        }
        if url::Url::parse(&catalog.base_url).is_err() {
            return Err(ConfigError::invalid(format!("catalog.base_url is not a URL: {}", catalog.base_url)));
        }

        for kind in JobKind::ALL {
            let schedule = self.scheduler.jobs.schedule(kind);
            if schedule.enabled && schedule.interval_secs == 0 {
                return Err(ConfigError::invalid(format!("scheduler.jobs.{kind}.interval_secs must be greater than 0")));
            }
        }

        if self.database.url.trim().is_empty() {
            return Err(ConfigError::invalid("database.url must not be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::invalid("database.max_connections must be greater than 0"));
        }
        Ok(())
    }
}

impl CrawlerConfig {
    pub fn per_target_timeout(&self) -> Duration {
        Duration::from_secs(self.per_target_timeout_secs)
    }

    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn min_request_spacing(&self) -> Duration {
        Duration::from_millis(self.min_request_spacing_ms)
    }

    pub fn run_deadline(&self) -> Duration {
        Duration::from_secs(self.run_deadline_secs)
    }
}

impl CatalogConfig {
    /// Listing URL for one page of a category.
    pub fn listing_url(&self, category: &str, page: u32) -> String {
        self.listing_url_template
            .replace("{category}", category)
            .replace("{page}", &page.to_string())
    }

    /// Category codes in a stable order.
    pub fn category_codes(&self) -> Vec<String> {
        self.categories.keys().cloned().collect()
    }

    pub fn category_name(&self, code: &str) -> Option<&str> {
        self.categories.get(code).map(String::as_str)
    }
}

impl SchedulerConfig {
    pub fn stale_run_grace(&self) -> Duration {
        Duration::from_secs(self.stale_run_grace_secs)
    }
}

impl JobsConfig {
    pub const fn schedule(&self, kind: JobKind) -> &JobScheduleConfig {
        match kind {
            JobKind::CategoryRefresh => &self.category_refresh,
            JobKind::ProductRefresh => &self.product_refresh,
        }
    }
}

impl JobScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}
