//! Product detail parser.
//!
//! The store renders product state as a JSON object assigned in an inline
//! script: `window.__MSS_FE__.product.state = {...};`. Required fields are
//! the product name and the sale price; everything else is optional.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::domain::snapshot::{
    DiscountRate, PriceFields, ProductIdentity, ProductSnapshot, ReviewAggregate, StockStatus,
};
use crate::error::ExtractionError;

const STATE_ASSIGNMENT: &str = r"window\.__MSS_FE__\.product\.state\s*=\s*";
const IMAGE_CDN: &str = "https://image.msscdn.net";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ProductState {
    goods_nm: Option<String>,
    goods_no: Option<Value>,
    brand_info: Option<BrandInfo>,
    thumbnail_image_url: Option<String>,
    goods_price: Option<GoodsPrice>,
    category: Option<CategoryInfo>,
    out_of_stock: Option<bool>,
    is_sold_out: Option<bool>,
    goods_review: Option<GoodsReview>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct BrandInfo {
    brand_name: Option<String>,
    brand_english_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GoodsPrice {
    normal_price: Option<Value>,
    sale_price: Option<Value>,
    discount_rate: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CategoryInfo {
    #[serde(rename = "categoryDepth1Name")]
    depth1: Option<String>,
    #[serde(rename = "categoryDepth2Name")]
    depth2: Option<String>,
    #[serde(rename = "categoryDepth3Name")]
    depth3: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GoodsReview {
    total_count: Option<Value>,
    satisfaction_score: Option<Value>,
}

pub struct DetailParser {
    state_assignment: Regex,
}

impl DetailParser {
    pub fn new() -> Result<Self, ExtractionError> {
        let state_assignment = Regex::new(STATE_ASSIGNMENT)
            .map_err(|e| ExtractionError::invalid("product_state", e.to_string()))?;
        Ok(Self { state_assignment })
    }

    /// Extract a snapshot of the product page at `source_url`.
    pub fn parse(
        &self,
        html: &str,
        source_url: &Url,
        captured_at: DateTime<Utc>,
    ) -> Result<ProductSnapshot, ExtractionError> {
        let state = self.product_state(html)?;

        let name = state
            .goods_nm
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ExtractionError::missing("name"))?
            .to_string();

        let price = state.goods_price.unwrap_or_default();
        let sale = match price.sale_price.as_ref() {
            Some(value) => amount(value).ok_or_else(|| ExtractionError::invalid("sale_price", format!("not an amount: {value}")))?,
            None => return Err(ExtractionError::missing("sale_price")),
        };
        let regular = match price.normal_price.as_ref() {
            Some(value) => amount(value).ok_or_else(|| ExtractionError::invalid("regular_price", format!("not an amount: {value}")))?,
            None => 0,
        };
        let published_rate = price
            .discount_rate
            .as_ref()
            .and_then(number)
            .and_then(|pct| DiscountRate::from_percent(pct).ok());
        let prices = PriceFields::new(regular, sale, published_rate)?;

        let brand = state.brand_info.unwrap_or_default();
        let category = state.category.unwrap_or_default();
        let category_path: Vec<String> = [category.depth1, category.depth2, category.depth3]
            .into_iter()
            .flatten()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        let identity = ProductIdentity {
            source_url: source_url.clone(),
            goods_no: state.goods_no.as_ref().and_then(goods_number),
            name,
            brand: non_empty(brand.brand_name),
            brand_english: non_empty(brand.brand_english_name),
            category_path,
            image_url: state.thumbnail_image_url.as_deref().and_then(absolute_image_url),
        };

        let stock = StockStatus::from_sold_out(state.is_sold_out.or(state.out_of_stock));
        let review = state.goods_review.unwrap_or_default();
        let reviews = ReviewAggregate::new(
            review
                .total_count
                .as_ref()
                .and_then(amount)
                .and_then(|c| u32::try_from(c).ok()),
            review.satisfaction_score.as_ref().and_then(number),
        );

        debug!(url = %source_url, sale = prices.sale(), stock = %stock, "Parsed product detail");
        ProductSnapshot::new(identity, prices, stock, reviews, captured_at)
    }

    fn product_state(&self, html: &str) -> Result<ProductState, ExtractionError> {
        let found = self
            .state_assignment
            .find(html)
            .ok_or_else(|| ExtractionError::missing("product_state"))?;
        let rest = &html[found.end()..];

        let value = serde_json::Deserializer::from_str(rest)
            .into_iter::<Value>()
            .next()
            .ok_or_else(|| ExtractionError::missing("product_state"))?
            .map_err(|e| ExtractionError::invalid("product_state", e.to_string()))?;
        serde_json::from_value(value).map_err(|e| ExtractionError::invalid("product_state", e.to_string()))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Numbers or numeric strings ("39,000") as f64.
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s.chars().filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-').collect();
            cleaned.parse().ok()
        }
        _ => None,
    }
}

/// Whole won amount; fractional values are rounded.
fn amount(value: &Value) -> Option<i64> {
    if let Some(i) = value.as_i64() {
        return Some(i);
    }
    number(value).filter(|f| f.is_finite()).map(|f| f.round() as i64)
}

fn goods_number(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn absolute_image_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        None
    } else if raw.starts_with("//") {
        Some(format!("https:{raw}"))
    } else if raw.starts_with('/') {
        Some(format!("{IMAGE_CDN}{raw}"))
    } else {
        Some(raw.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(state: &str) -> String {
        format!(
            r"<html><head><script>window.__MSS_FE__ = window.__MSS_FE__ || {{}};
            window.__MSS_FE__.product.state = {state};
            window.__MSS_FE__.other = 1;</script></head><body></body></html>"
        )
    }

    fn parse(state: &str) -> Result<ProductSnapshot, ExtractionError> {
        let url = Url::parse("https://www.musinsa.com/products/5394845").expect("url");
        DetailParser::new().expect("parser").parse(&page(state), &url, Utc::now())
    }

    #[test]
    fn full_state_is_extracted() {
        let snapshot = parse(
            r#"{"goodsNm":"세미 오버핏 후드","goodsNo":5394845,
                "brandInfo":{"brandName":"무신사 스탠다드","brandEnglishName":"musinsa standard"},
                "thumbnailImageUrl":"/images/goods_img/1.jpg",
                "goodsPrice":{"normalPrice":39000,"salePrice":29250,"discountRate":25,"isSale":true},
                "category":{"categoryDepth1Name":"상의","categoryDepth2Name":"후드 티셔츠","categoryDepth3Name":""},
                "isSoldOut":false,
                "goodsReview":{"totalCount":1234,"satisfactionScore":4.8},
                "note":"a } brace ; inside"}"#,
        )
        .expect("snapshot");

        let identity = snapshot.identity();
        assert_eq!(identity.name, "세미 오버핏 후드");
        assert_eq!(identity.goods_no.as_deref(), Some("5394845"));
        assert_eq!(identity.brand.as_deref(), Some("무신사 스탠다드"));
        assert_eq!(identity.category_path, ["상의", "후드 티셔츠"]);
        assert_eq!(identity.image_url.as_deref(), Some("https://image.msscdn.net/images/goods_img/1.jpg"));
        assert_eq!(snapshot.prices().regular(), 39_000);
        assert_eq!(snapshot.prices().sale(), 29_250);
        assert_eq!(snapshot.prices().discount_rate().basis_points(), 2_500);
        assert_eq!(snapshot.stock(), StockStatus::InStock);
        assert_eq!(snapshot.reviews().count, Some(1234));
        assert_eq!(snapshot.reviews().rating, Some(4.8));
    }

    #[test]
    fn optional_fields_stay_absent() {
        let snapshot = parse(r#"{"goodsNm":"양말","goodsPrice":{"normalPrice":5000,"salePrice":4000}}"#)
            .expect("snapshot");
        assert_eq!(snapshot.reviews().count, None);
        assert_eq!(snapshot.reviews().rating, None);
        assert_eq!(snapshot.stock(), StockStatus::Unknown);
        assert_eq!(snapshot.identity().brand, None);
        assert_eq!(snapshot.prices().discount_rate().basis_points(), 2_000);
    }

    #[test]
    fn missing_sale_price_names_the_field() {
        let err = parse(r#"{"goodsNm":"모자","goodsPrice":{"normalPrice":5000}}"#).expect_err("missing");
        assert_eq!(err.field, "sale_price");
    }

    #[test]
    fn missing_name_names_the_field() {
        let err = parse(r#"{"goodsNm":"  ","goodsPrice":{"salePrice":5000}}"#).expect_err("missing");
        assert_eq!(err.field, "name");
    }

    #[test]
    fn page_without_state_is_rejected() {
        let url = Url::parse("https://www.musinsa.com/products/1").expect("url");
        let err = DetailParser::new()
            .expect("parser")
            .parse("<html><body>점검 중</body></html>", &url, Utc::now())
            .expect_err("no state");
        assert_eq!(err.field, "product_state");
    }

    #[test]
    fn string_prices_and_sold_out_flag() {
        let snapshot = parse(
            r#"{"goodsNm":"가방","goodsPrice":{"normalPrice":"0","salePrice":"59,000"},"outOfStock":true,
                "thumbnailImageUrl":"//image.msscdn.net/a.jpg"}"#,
        )
        .expect("snapshot");
        assert_eq!(snapshot.prices().regular(), 59_000);
        assert_eq!(snapshot.stock(), StockStatus::OutOfStock);
        assert_eq!(snapshot.identity().image_url.as_deref(), Some("https://image.msscdn.net/a.jpg"));
    }
}
