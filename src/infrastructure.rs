//! Infrastructure layer: configuration, logging, SQLite persistence, page
//! loading and HTML parsing.

pub mod config;
pub mod database_connection;
pub mod job_run_repository;
pub mod logging;
pub mod page_loader;
pub mod parsing;
pub mod product_repository;

#[cfg(feature = "browser")]
pub mod browser_page_loader;

// Re-export commonly used items
pub use config::{AppConfig, ConfigError};
pub use database_connection::DatabaseConnection;
pub use job_run_repository::JobRunRepository;
pub use logging::{get_log_directory, init_logging};
pub use page_loader::{HttpPageLoader, LoadedPage, PageLoader, ReplayPageLoader, ReplayResponse};
pub use parsing::{DetailParser, ListingLink, ListingParser};
pub use product_repository::{ProductRepository, ProductTx};

#[cfg(feature = "browser")]
pub use browser_page_loader::BrowserPageLoader;
