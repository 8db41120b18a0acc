//! Domain module - crawl targets, snapshots, persisted records and job runs
//!
//! Modern Rust module organization (Rust 2018+ style):
//! - Each module is its own file in the domain/ directory
//! - Public exports are defined here for convenience

pub mod crawl_target;
pub mod events;
pub mod job;
pub mod product;
pub mod snapshot;

pub use crawl_target::{CategoryId, CrawlTarget, ListingCursor, PageKind, product_key};
pub use events::{RunCompleted, RunEventBus};
pub use job::{JobKind, JobRun, JobState, JobStatus, RunCounts};
pub use product::{NewPriceEntry, PriceHistoryEntry, Product, ProductId, TrackedState};
pub use snapshot::{
    DiscountRate, PriceFields, ProductIdentity, ProductSnapshot, ReviewAggregate, StockStatus,
};
