//! Product snapshots: the immutable result of one successful extraction.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::domain::crawl_target::product_key;
use crate::error::ExtractionError;

/// 재고 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    InStock,
    OutOfStock,
    Unknown,
}

impl StockStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InStock => "in_stock",
            Self::OutOfStock => "out_of_stock",
            Self::Unknown => "unknown",
        }
    }

    /// `None` when the page carries no sold-out signal at all.
    pub const fn from_sold_out(sold_out: Option<bool>) -> Self {
        match sold_out {
            Some(true) => Self::OutOfStock,
            Some(false) => Self::InStock,
            None => Self::Unknown,
        }
    }
}

impl fmt::Display for StockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StockStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_stock" => Ok(Self::InStock),
            "out_of_stock" => Ok(Self::OutOfStock),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("Invalid StockStatus: {other}")),
        }
    }
}

/// Discount rate in basis points of a percent (`2000` = 20.00 %).
///
/// Stored as an integer so that dedup comparisons are exact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiscountRate(u32);

impl DiscountRate {
    pub const ZERO: Self = Self(0);
    const MAX_BP: u32 = 10_000;

    pub fn from_basis_points(bp: u32) -> Result<Self, ExtractionError> {
        if bp > Self::MAX_BP {
            return Err(ExtractionError::invalid(
                "discount_rate",
                format!("{bp} basis points is above 100%"),
            ));
        }
        Ok(Self(bp))
    }

    /// Percent value as published by the site, rounded to two decimals.
    pub fn from_percent(percent: f64) -> Result<Self, ExtractionError> {
        if !percent.is_finite() || percent < 0.0 || percent > 100.0 {
            return Err(ExtractionError::invalid(
                "discount_rate",
                format!("{percent} is outside 0..=100"),
            ));
        }
        Self::from_basis_points((percent * 100.0).round() as u32)
    }

    /// `round((regular - sale) / regular * 100, 2)`; zero when there is no
    /// markdown or the regular price is unknown.
    pub fn compute(regular: i64, sale: i64) -> Self {
        if regular <= 0 || sale >= regular || sale < 0 {
            return Self::ZERO;
        }
        let diff = i128::from(regular - sale);
        let regular = i128::from(regular);
        let bp = (diff * 10_000 + regular / 2) / regular;
        Self(bp.clamp(0, i128::from(Self::MAX_BP)) as u32)
    }

    pub const fn basis_points(self) -> u32 {
        self.0
    }

    pub fn as_percent(self) -> f64 {
        f64::from(self.0) / 100.0
    }
}

impl fmt::Display for DiscountRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}%", self.as_percent())
    }
}

/// Price facts tracked in history. Amounts are whole won.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceFields {
    regular: i64,
    sale: i64,
    discount_rate: DiscountRate,
}

impl PriceFields {
    /// Validates `0 <= sale <= regular`. A zero regular price with a positive
    /// sale price means the site omitted the list price; the sale price is
    /// taken as regular in that case.
    pub fn new(regular: i64, sale: i64, discount_rate: Option<DiscountRate>) -> Result<Self, ExtractionError> {
        if regular < 0 {
            return Err(ExtractionError::invalid("regular_price", format!("negative amount {regular}")));
        }
        if sale < 0 {
            return Err(ExtractionError::invalid("sale_price", format!("negative amount {sale}")));
        }
        let regular = if regular == 0 { sale } else { regular };
        if sale > regular {
            return Err(ExtractionError::invalid(
                "sale_price",
                format!("sale price {sale} exceeds regular price {regular}"),
            ));
        }
        let discount_rate = discount_rate.unwrap_or_else(|| DiscountRate::compute(regular, sale));
        Ok(Self {
            regular,
            sale,
            discount_rate,
        })
    }

    pub const fn regular(&self) -> i64 {
        self.regular
    }

    pub const fn sale(&self) -> i64 {
        self.sale
    }

    pub const fn discount_rate(&self) -> DiscountRate {
        self.discount_rate
    }
}

/// Review aggregate; both parts are absent when the page omits them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewAggregate {
    pub count: Option<u32>,
    /// Average rating in `[0, 5]`.
    pub rating: Option<f64>,
}

impl ReviewAggregate {
    /// Drops ratings outside `[0, 5]` instead of failing the snapshot.
    pub fn new(count: Option<u32>, rating: Option<f64>) -> Self {
        let rating = rating.filter(|r| r.is_finite() && (0.0..=5.0).contains(r));
        Self { count, rating }
    }
}

/// Catalog identity of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductIdentity {
    pub source_url: Url,
    /// Site-assigned goods number, when the page exposes it.
    pub goods_no: Option<String>,
    pub name: String,
    pub brand: Option<String>,
    pub brand_english: Option<String>,
    /// Category names from the root down, e.g. `["상의", "반소매 티셔츠"]`.
    pub category_path: Vec<String>,
    pub image_url: Option<String>,
}

impl ProductIdentity {
    /// Key used for per-product serialization and dedup within a run.
    pub fn key(&self) -> String {
        self.goods_no
            .clone()
            .unwrap_or_else(|| product_key(&self.source_url))
    }

    pub fn category_label(&self) -> String {
        self.category_path.join(" > ")
    }
}

/// Result of one successful extraction. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    identity: ProductIdentity,
    prices: PriceFields,
    stock: StockStatus,
    reviews: ReviewAggregate,
    captured_at: DateTime<Utc>,
}

impl ProductSnapshot {
    pub fn new(
        identity: ProductIdentity,
        prices: PriceFields,
        stock: StockStatus,
        reviews: ReviewAggregate,
        captured_at: DateTime<Utc>,
    ) -> Result<Self, ExtractionError> {
        if identity.name.trim().is_empty() {
            return Err(ExtractionError::missing("name"));
        }
        Ok(Self {
            identity,
            prices,
            stock,
            reviews,
            captured_at,
        })
    }

    pub const fn identity(&self) -> &ProductIdentity {
        &self.identity
    }

    pub const fn prices(&self) -> &PriceFields {
        &self.prices
    }

    pub const fn stock(&self) -> StockStatus {
        self.stock
    }

    pub const fn reviews(&self) -> &ReviewAggregate {
        &self.reviews
    }

    pub const fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Same snapshot captured at another instant.
    #[must_use]
    pub fn recaptured_at(&self, captured_at: DateTime<Utc>) -> Self {
        Self {
            captured_at,
            ..self.clone()
        }
    }
}
