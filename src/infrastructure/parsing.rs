//! HTML parsing infrastructure
//!
//! One parser per page kind. Both report [`ExtractionError`] naming the
//! required field they could not locate; optional fields are left absent.

pub mod detail_parser;
pub mod listing_parser;

pub use detail_parser::DetailParser;
pub use listing_parser::{ListingLink, ListingParser};

use scraper::Selector;
use tracing::warn;

use crate::error::ExtractionError;

/// Compile a selector list, skipping (and logging) the invalid ones.
/// Fails only when none compiles.
pub(crate) fn compile_selectors(selector_strings: &[&str]) -> Result<Vec<Selector>, ExtractionError> {
    let mut selectors = Vec::new();
    let mut errors = Vec::new();

    for selector_str in selector_strings {
        match Selector::parse(selector_str) {
            Ok(selector) => selectors.push(selector),
            Err(e) => {
                warn!("Failed to compile selector '{}': {}", selector_str, e);
                errors.push(format!("'{selector_str}': {e}"));
            }
        }
    }

    if selectors.is_empty() {
        return Err(ExtractionError::invalid(
            "selectors",
            format!("no valid selectors compiled: {}", errors.join(", ")),
        ));
    }
    Ok(selectors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_selectors_are_skipped() {
        let selectors = compile_selectors(&["a.ok", "a[[broken"]).expect("one valid");
        assert_eq!(selectors.len(), 1);
        assert!(compile_selectors(&["[[["]).is_err());
    }
}
