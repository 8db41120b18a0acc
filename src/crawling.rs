//! Crawl engine: governor-gated fetching, extraction, enumeration and
//! change-aware writing.
//!
//! Control flow for one product target:
//! `Governor slot → PageFetcher → Extractor → ChangeAwareWriter`.
//! Category jobs obtain their targets from the [`TargetEnumerator`].

pub mod enumerator;
pub mod extractor;
pub mod fetcher;
pub mod governor;
pub mod pipeline;
pub mod writer;

pub use enumerator::{TargetEnumerator, TargetStream};
pub use extractor::{Extraction, Extractor};
pub use fetcher::{FetchedPage, PageFetcher};
pub use governor::{FetchSlot, Governor, GovernorSettings};
pub use pipeline::{CrawlPipeline, TargetOutcome};
pub use writer::{ChangeAwareWriter, WriteOutcome};
