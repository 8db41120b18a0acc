//! Products and their price history.
//!
//! The change-aware write needs `upsert → latest → insert` to happen inside
//! one transaction; [`ProductRepository::begin`] hands out a [`ProductTx`]
//! exposing exactly those three steps.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use url::Url;

use crate::domain::crawl_target::product_key;
use crate::domain::product::{NewPriceEntry, PriceHistoryEntry, Product, ProductId};
use crate::domain::snapshot::{DiscountRate, PriceFields, ProductSnapshot, StockStatus};
use crate::error::StoreError;

const PRODUCT_COLUMNS: &str = "id, source_url, goods_no, name, brand, brand_english, category_path, \
     image_url, review_count, rating, is_active, created_at, updated_at";

const HISTORY_COLUMNS: &str =
    "id, product_id, regular_price, sale_price, discount_bp, stock_status, captured_at";

#[derive(Clone)]
pub struct ProductRepository {
    pool: Arc<SqlitePool>,
}

impl ProductRepository {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Open a write transaction for one product.
    pub async fn begin(&self) -> Result<ProductTx, StoreError> {
        Ok(ProductTx {
            tx: self.pool.begin().await?,
        })
    }

    /// Products tracked by the product refresh job, oldest first.
    pub async fn list_active_products(&self) -> Result<Vec<Product>, StoreError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE is_active = 1 ORDER BY id");
        let rows = sqlx::query(&sql).fetch_all(&*self.pool).await?;
        rows.iter().map(product_from_row).collect()
    }

    /// Full history of one product in capture order.
    pub async fn price_history(&self, product_id: ProductId) -> Result<Vec<PriceHistoryEntry>, StoreError> {
        let sql = format!("SELECT {HISTORY_COLUMNS} FROM price_history WHERE product_id = ? ORDER BY id");
        let rows = sqlx::query(&sql)
            .bind(product_id.0)
            .fetch_all(&*self.pool)
            .await?;
        rows.iter().map(entry_from_row).collect()
    }

    /// Looks a product up by the identity derived from its URL.
    pub async fn find_by_source_url(&self, url: &Url) -> Result<Option<Product>, StoreError> {
        self.find_by_key(&product_key(url)).await
    }

    pub async fn find_by_key(&self, key: &str) -> Result<Option<Product>, StoreError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE product_key = ?");
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&*self.pool)
            .await?;
        row.as_ref().map(product_from_row).transpose()
    }

    /// Toggle tracking. Returns `false` when the product does not exist.
    pub async fn set_active(&self, product_id: ProductId, active: bool) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE products SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(product_id.0)
            .execute(&*self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_products(&self) -> Result<i64, StoreError> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&*self.pool)
            .await?)
    }

    pub async fn count_history(&self) -> Result<i64, StoreError> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM price_history")
            .fetch_one(&*self.pool)
            .await?)
    }
}

/// Transaction scoped to one product write. Dropped without `commit` it
/// rolls back.
pub struct ProductTx {
    tx: Transaction<'static, Sqlite>,
}

impl ProductTx {
    /// Id and newest capture time of the product stored under `key`.
    pub async fn last_crawl(&mut self, key: &str) -> Result<Option<(ProductId, DateTime<Utc>)>, StoreError> {
        let row: Option<(i64, DateTime<Utc>)> =
            sqlx::query_as("SELECT id, updated_at FROM products WHERE product_key = ?")
                .bind(key)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(row.map(|(id, at)| (ProductId(id), at)))
    }

    /// Insert or refresh the identity record. Always reflects the latest
    /// crawl; the tracking flag of an existing product is left untouched.
    pub async fn upsert_product(&mut self, snapshot: &ProductSnapshot) -> Result<ProductId, StoreError> {
        let identity = snapshot.identity();
        let reviews = snapshot.reviews();
        let id: i64 = sqlx::query_scalar(
            r"
            INSERT INTO products
                (product_key, source_url, goods_no, name, brand, brand_english, category_path,
                 image_url, review_count, rating, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
            ON CONFLICT (product_key) DO UPDATE SET
                source_url = excluded.source_url,
                goods_no = COALESCE(excluded.goods_no, products.goods_no),
                name = excluded.name,
                brand = excluded.brand,
                brand_english = excluded.brand_english,
                category_path = excluded.category_path,
                image_url = excluded.image_url,
                review_count = excluded.review_count,
                rating = excluded.rating,
                updated_at = excluded.updated_at
            RETURNING id
            ",
        )
        .bind(identity.key())
        .bind(identity.source_url.as_str())
        .bind(identity.goods_no.as_deref())
        .bind(&identity.name)
        .bind(identity.brand.as_deref())
        .bind(identity.brand_english.as_deref())
        .bind(identity.category_label())
        .bind(identity.image_url.as_deref())
        .bind(reviews.count.map(i64::from))
        .bind(reviews.rating)
        .bind(snapshot.captured_at())
        .bind(snapshot.captured_at())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(ProductId(id))
    }

    pub async fn latest_price_entry(&mut self, product_id: ProductId) -> Result<Option<PriceHistoryEntry>, StoreError> {
        let sql = format!(
            "SELECT {HISTORY_COLUMNS} FROM price_history WHERE product_id = ? ORDER BY id DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(product_id.0)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(entry_from_row).transpose()
    }

    pub async fn insert_price_entry(&mut self, entry: &NewPriceEntry) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r"
            INSERT INTO price_history
                (product_id, regular_price, sale_price, discount_bp, stock_status, captured_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(entry.product_id.0)
        .bind(entry.prices.regular())
        .bind(entry.prices.sale())
        .bind(i64::from(entry.prices.discount_rate().basis_points()))
        .bind(entry.stock.as_str())
        .bind(entry.captured_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        Ok(self.tx.commit().await?)
    }

    pub async fn rollback(self) -> Result<(), StoreError> {
        Ok(self.tx.rollback().await?)
    }
}

fn corrupt(table: &'static str, reason: impl Into<String>) -> StoreError {
    StoreError::CorruptRow {
        table,
        reason: reason.into(),
    }
}

fn product_from_row(row: &SqliteRow) -> Result<Product, StoreError> {
    let review_count: Option<i64> = row.try_get("review_count")?;
    let review_count = review_count
        .map(u32::try_from)
        .transpose()
        .map_err(|e| corrupt("products", format!("review_count: {e}")))?;
    Ok(Product {
        id: ProductId(row.try_get("id")?),
        source_url: row.try_get("source_url")?,
        goods_no: row.try_get("goods_no")?,
        name: row.try_get("name")?,
        brand: row.try_get("brand")?,
        brand_english: row.try_get("brand_english")?,
        category_path: row.try_get("category_path")?,
        image_url: row.try_get("image_url")?,
        review_count,
        rating: row.try_get("rating")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn entry_from_row(row: &SqliteRow) -> Result<PriceHistoryEntry, StoreError> {
    let discount_bp: i64 = row.try_get("discount_bp")?;
    let discount = u32::try_from(discount_bp)
        .map_err(|e| corrupt("price_history", format!("discount_bp: {e}")))
        .and_then(|bp| DiscountRate::from_basis_points(bp).map_err(|e| corrupt("price_history", e.to_string())))?;
    let prices = PriceFields::new(row.try_get("regular_price")?, row.try_get("sale_price")?, Some(discount))
        .map_err(|e| corrupt("price_history", e.to_string()))?;
    let stock: String = row.try_get("stock_status")?;
    let stock = stock
        .parse::<StockStatus>()
        .map_err(|e| corrupt("price_history", e))?;

    Ok(PriceHistoryEntry {
        id: row.try_get("id")?,
        product_id: ProductId(row.try_get("product_id")?),
        prices,
        stock,
        captured_at: row.try_get("captured_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::snapshot::{ProductIdentity, ReviewAggregate};
    use crate::infrastructure::database_connection::DatabaseConnection;

    async fn repo() -> ProductRepository {
        let db = DatabaseConnection::in_memory().await.expect("db");
        db.migrate().await.expect("migrate");
        ProductRepository::new(Arc::new(db.pool().clone()))
    }

    fn snapshot(name: &str, sale: i64) -> ProductSnapshot {
        ProductSnapshot::new(
            ProductIdentity {
                source_url: Url::parse("https://www.musinsa.com/products/777?utm=x").expect("url"),
                goods_no: Some("777".into()),
                name: name.into(),
                brand: Some("브랜드".into()),
                brand_english: Some("brand".into()),
                category_path: vec!["상의".into(), "니트".into()],
                image_url: None,
            },
            PriceFields::new(10_000, sale, None).expect("prices"),
            StockStatus::InStock,
            ReviewAggregate::new(Some(5), None),
            Utc::now(),
        )
        .expect("snapshot")
    }

    #[tokio::test]
    async fn upsert_updates_identity_in_place() {
        let repo = repo().await;

        let mut tx = repo.begin().await.expect("begin");
        let first = tx.upsert_product(&snapshot("니트", 8_000)).await.expect("upsert");
        tx.commit().await.expect("commit");

        let mut tx = repo.begin().await.expect("begin");
        let second = tx.upsert_product(&snapshot("니트 (리뉴얼)", 8_000)).await.expect("upsert");
        tx.commit().await.expect("commit");

        assert_eq!(first, second);
        assert_eq!(repo.count_products().await.expect("count"), 1);
        let url = Url::parse("https://www.musinsa.com/products/777").expect("url");
        let product = repo.find_by_source_url(&url).await.expect("find").expect("exists");
        assert_eq!(product.name, "니트 (리뉴얼)");
        assert_eq!(product.category_path, "상의 > 니트");
        assert_eq!(product.review_count, Some(5));
        assert!(product.is_active);
    }

    #[tokio::test]
    async fn latest_entry_follows_insert_order() {
        let repo = repo().await;
        let s1 = snapshot("니트", 8_000);
        let s2 = snapshot("니트", 7_000);

        let mut tx = repo.begin().await.expect("begin");
        let id = tx.upsert_product(&s1).await.expect("upsert");
        assert!(tx.latest_price_entry(id).await.expect("latest").is_none());
        tx.insert_price_entry(&NewPriceEntry::from_snapshot(id, &s1)).await.expect("insert");
        tx.insert_price_entry(&NewPriceEntry::from_snapshot(id, &s2)).await.expect("insert");
        let latest = tx.latest_price_entry(id).await.expect("latest").expect("some");
        assert_eq!(latest.prices.sale(), 7_000);
        tx.commit().await.expect("commit");

        let history = repo.price_history(id).await.expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].prices.discount_rate().basis_points(), 2_000);
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let repo = repo().await;
        {
            let mut tx = repo.begin().await.expect("begin");
            tx.upsert_product(&snapshot("니트", 8_000)).await.expect("upsert");
        }
        assert_eq!(repo.count_products().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn inactive_products_are_not_listed() {
        let repo = repo().await;
        let mut tx = repo.begin().await.expect("begin");
        let id = tx.upsert_product(&snapshot("니트", 8_000)).await.expect("upsert");
        tx.commit().await.expect("commit");

        assert_eq!(repo.list_active_products().await.expect("list").len(), 1);
        assert!(repo.set_active(id, false).await.expect("set"));
        assert!(repo.list_active_products().await.expect("list").is_empty());
        assert!(!repo.set_active(ProductId(9_999), true).await.expect("set"));
    }
}
