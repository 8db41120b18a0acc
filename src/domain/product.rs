//! Persisted catalog record and its append-only price history.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::snapshot::{PriceFields, ProductSnapshot, StockStatus};

/// Row id of a product in the `products` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub i64);

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current identity/catalog record. Updated in place on every crawl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub source_url: String,
    pub goods_no: Option<String>,
    pub name: String,
    pub brand: Option<String>,
    pub brand_english: Option<String>,
    /// `" > "`-joined category names.
    pub category_path: String,
    pub image_url: Option<String>,
    pub review_count: Option<u32>,
    pub rating: Option<f64>,
    /// Only active products are picked up by the product refresh job.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    /// Capture time of the newest crawl written for this product.
    pub updated_at: DateTime<Utc>,
}

/// The fields whose change produces a new history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedState {
    pub prices: PriceFields,
    pub stock: StockStatus,
}

impl TrackedState {
    pub const fn of(snapshot: &ProductSnapshot) -> Self {
        Self {
            prices: *snapshot.prices(),
            stock: snapshot.stock(),
        }
    }

    /// True when regular price, sale price, discount rate or stock differ.
    /// Review metrics are not compared.
    pub fn differs_from(&self, other: &Self) -> bool {
        self != other
    }
}

/// One stored row of `price_history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceHistoryEntry {
    pub id: i64,
    pub product_id: ProductId,
    pub prices: PriceFields,
    pub stock: StockStatus,
    pub captured_at: DateTime<Utc>,
}

impl PriceHistoryEntry {
    pub const fn tracked(&self) -> TrackedState {
        TrackedState {
            prices: self.prices,
            stock: self.stock,
        }
    }
}

/// Insert payload for a new history row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPriceEntry {
    pub product_id: ProductId,
    pub prices: PriceFields,
    pub stock: StockStatus,
    pub captured_at: DateTime<Utc>,
}

impl NewPriceEntry {
    pub const fn from_snapshot(product_id: ProductId, snapshot: &ProductSnapshot) -> Self {
        Self {
            product_id,
            prices: *snapshot.prices(),
            stock: snapshot.stock(),
            captured_at: snapshot.captured_at(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::snapshot::{DiscountRate, ProductIdentity, ReviewAggregate};
    use url::Url;

    fn snapshot(regular: i64, sale: i64, stock: StockStatus, reviews: u32) -> ProductSnapshot {
        let identity = ProductIdentity {
            source_url: Url::parse("https://www.musinsa.com/products/1").expect("url"),
            goods_no: Some("1".into()),
            name: "오버핏 후드".into(),
            brand: Some("무신사 스탠다드".into()),
            brand_english: None,
            category_path: vec!["상의".into()],
            image_url: None,
        };
        ProductSnapshot::new(
            identity,
            PriceFields::new(regular, sale, None).expect("prices"),
            stock,
            ReviewAggregate::new(Some(reviews), Some(4.5)),
            Utc::now(),
        )
        .expect("snapshot")
    }

    #[test]
    fn review_drift_is_not_a_change() {
        let a = TrackedState::of(&snapshot(10_000, 8_000, StockStatus::InStock, 3));
        let b = TrackedState::of(&snapshot(10_000, 8_000, StockStatus::InStock, 300));
        assert!(!a.differs_from(&b));
    }

    #[test]
    fn price_or_stock_change_is_detected() {
        let base = TrackedState::of(&snapshot(10_000, 8_000, StockStatus::InStock, 3));
        let cheaper = TrackedState::of(&snapshot(10_000, 7_000, StockStatus::InStock, 3));
        let sold_out = TrackedState::of(&snapshot(10_000, 8_000, StockStatus::OutOfStock, 3));
        assert!(base.differs_from(&cheaper));
        assert!(base.differs_from(&sold_out));
    }

    #[test]
    fn published_rate_difference_alone_is_a_change() {
        let computed = PriceFields::new(10_000, 8_000, None).expect("prices");
        let published =
            PriceFields::new(10_000, 8_000, Some(DiscountRate::from_basis_points(2_100).expect("bp")))
                .expect("prices");
        let a = TrackedState {
            prices: computed,
            stock: StockStatus::Unknown,
        };
        let b = TrackedState {
            prices: published,
            stock: StockStatus::Unknown,
        };
        assert!(a.differs_from(&b));
    }
}
