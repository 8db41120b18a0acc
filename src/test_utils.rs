//! Test utilities
//!
//! In-memory databases, page fixtures in the store's markup and a
//! configuration tuned for fast, deterministic runs. Used by unit tests and
//! by the integration tests under `tests/`.

use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;

use crate::infrastructure::config::AppConfig;
use crate::infrastructure::database_connection::DatabaseConnection;
use crate::infrastructure::job_run_repository::JobRunRepository;
use crate::infrastructure::product_repository::ProductRepository;

pub const BASE_URL: &str = "https://www.musinsa.com";
pub const LISTING_TEMPLATE: &str = "https://www.musinsa.com/category/{category}?page={page}";

/// Fresh, migrated in-memory database.
pub struct TestDatabase {
    pub connection: DatabaseConnection,
}

impl TestDatabase {
    pub async fn new() -> Result<Self> {
        let connection = DatabaseConnection::in_memory().await?;
        connection.migrate().await?;
        Ok(Self { connection })
    }

    pub fn pool(&self) -> Arc<SqlitePool> {
        Arc::new(self.connection.pool().clone())
    }

    pub fn products(&self) -> ProductRepository {
        ProductRepository::new(self.pool())
    }

    pub fn runs(&self) -> JobRunRepository {
        JobRunRepository::new(self.pool())
    }
}

/// Configuration for tests: one category, no pacing, millisecond backoff,
/// timers far in the future.
pub fn test_config(concurrency_limit: usize) -> AppConfig {
    let mut config = AppConfig::default();
    config.crawler.concurrency_limit = concurrency_limit;
    config.crawler.per_target_timeout_secs = 5;
    config.crawler.max_retries = 1;
    config.crawler.base_backoff_ms = 1;
    config.crawler.max_backoff_ms = 5;
    config.crawler.min_request_spacing_ms = 0;
    config.crawler.run_deadline_secs = 60;

    config.catalog.base_url = BASE_URL.to_string();
    config.catalog.listing_url_template = LISTING_TEMPLATE.to_string();
    config.catalog.categories = [("001".to_string(), "상의".to_string())].into_iter().collect();
    config.catalog.categories_per_run = 0;
    config.catalog.max_targets_per_category = 0;
    config.catalog.max_listing_pages = 5;

    config.scheduler.run_on_startup = false;
    config.logging.file_output = false;
    config
}

pub fn product_url(goods_no: u32) -> String {
    format!("{BASE_URL}/products/{goods_no}")
}

pub fn listing_url(category: &str, page: u32) -> String {
    LISTING_TEMPLATE
        .replace("{category}", category)
        .replace("{page}", &page.to_string())
}

/// Listing page with one product anchor per goods number.
pub fn listing_page(goods_nos: &[u32]) -> String {
    let anchors: String = goods_nos
        .iter()
        .map(|no| {
            format!(
                r#"<li><a class="gtm-select-item" data-item-id="{no}" href="/products/{no}">상품 {no}</a></li>"#
            )
        })
        .collect();
    format!("<html><body><ul>{anchors}</ul></body></html>")
}

/// Detail page carrying the product state script.
pub fn detail_page(goods_no: u32, regular: i64, sale: i64, sold_out: bool) -> String {
    format!(
        r#"<html><head><script>
        window.__MSS_FE__ = window.__MSS_FE__ || {{}};
        window.__MSS_FE__.product.state = {{"goodsNo":{goods_no},"goodsNm":"테스트 상품 {goods_no}",
            "brandInfo":{{"brandName":"테스트","brandEnglishName":"test"}},
            "thumbnailImageUrl":"/images/goods_img/{goods_no}.jpg",
            "goodsPrice":{{"normalPrice":{regular},"salePrice":{sale}}},
            "category":{{"categoryDepth1Name":"상의","categoryDepth2Name":"반소매 티셔츠"}},
            "isSoldOut":{sold_out},
            "goodsReview":{{"totalCount":10,"satisfactionScore":4.7}}}};
        </script></head><body></body></html>"#
    )
}
