//! Change-aware writer.
//!
//! Upsert identity, read the latest history entry, insert a new entry only
//! when a tracked field changed. The three steps run in one transaction and
//! writes for the same product are serialized in-process, so a manual
//! refresh racing a scheduled run cannot interleave read-latest and insert.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::domain::product::{NewPriceEntry, ProductId, TrackedState};
use crate::domain::snapshot::ProductSnapshot;
use crate::error::{StoreError, WriteError};
use crate::infrastructure::product_repository::ProductRepository;

/// Result of one write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub product_id: ProductId,
    /// A new price history entry was inserted.
    pub history_written: bool,
}

#[derive(Default)]
struct ProductLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ProductLocks {
    fn handle(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    /// Drop the entry once nobody else holds or waits on it.
    fn release(&self, key: &str, handle: Arc<AsyncMutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if Arc::strong_count(&handle) <= 2 {
            locks.remove(key);
        }
    }

    fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or_default()
    }
}

pub struct ChangeAwareWriter {
    repository: ProductRepository,
    locks: ProductLocks,
}

impl ChangeAwareWriter {
    pub fn new(repository: ProductRepository) -> Self {
        Self {
            repository,
            locks: ProductLocks::default(),
        }
    }

    pub const fn repository(&self) -> &ProductRepository {
        &self.repository
    }

    /// Persist `snapshot`. A write conflict is retried once immediately.
    pub async fn write(&self, snapshot: &ProductSnapshot) -> Result<WriteOutcome, WriteError> {
        let key = snapshot.identity().key();
        let handle = self.locks.handle(&key);

        let result = {
            let _guard = handle.lock().await;
            match self.write_once(&key, snapshot).await {
                Err(e) if e.is_conflict() => {
                    warn!(product = %key, "🔁 Write conflict, retrying once");
                    self.write_once(&key, snapshot).await
                }
                other => other,
            }
        };

        self.locks.release(&key, handle);
        result
    }

    async fn write_once(&self, key: &str, snapshot: &ProductSnapshot) -> Result<WriteOutcome, WriteError> {
        let to_write_error = |e: StoreError| WriteError::from_store(key, e);

        let mut tx = self.repository.begin().await.map_err(to_write_error)?;

        // an older crawl must not overwrite identity or history
        if let Some((product_id, newest)) = tx.last_crawl(key).await.map_err(to_write_error)? {
            if snapshot.captured_at() < newest {
                debug!(product = %key, newest = %newest, "Snapshot older than the stored crawl, nothing written");
                return Ok(WriteOutcome {
                    product_id,
                    history_written: false,
                });
            }
        }

        let product_id = tx.upsert_product(snapshot).await.map_err(to_write_error)?;
        let latest = tx.latest_price_entry(product_id).await.map_err(to_write_error)?;
        let history_written = latest.is_none_or(|entry| TrackedState::of(snapshot).differs_from(&entry.tracked()));

        if history_written {
            tx.insert_price_entry(&NewPriceEntry::from_snapshot(product_id, snapshot))
                .await
                .map_err(to_write_error)?;
        }
        tx.commit().await.map_err(to_write_error)?;

        debug!(product = %key, %product_id, history_written, "💾 Product written");
        Ok(WriteOutcome {
            product_id,
            history_written,
        })
    }

    /// Products with a lock entry right now.
    pub fn locked_products(&self) -> usize {
        self.locks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::snapshot::{PriceFields, ProductIdentity, ReviewAggregate, StockStatus};
    use crate::infrastructure::database_connection::DatabaseConnection;
    use chrono::{DateTime, Duration, Utc};
    use url::Url;

    async fn writer() -> ChangeAwareWriter {
        let db = DatabaseConnection::in_memory().await.expect("db");
        db.migrate().await.expect("migrate");
        ChangeAwareWriter::new(ProductRepository::new(Arc::new(db.pool().clone())))
    }

    fn snapshot(sale: i64, stock: StockStatus, reviews: u32, at: DateTime<Utc>) -> ProductSnapshot {
        ProductSnapshot::new(
            ProductIdentity {
                source_url: Url::parse("https://www.musinsa.com/products/501").expect("url"),
                goods_no: Some("501".into()),
                name: "울 코트".into(),
                brand: None,
                brand_english: None,
                category_path: vec!["아우터".into()],
                image_url: None,
            },
            PriceFields::new(10_000, sale, None).expect("prices"),
            stock,
            ReviewAggregate::new(Some(reviews), Some(4.5)),
            at,
        )
        .expect("snapshot")
    }

    #[tokio::test]
    async fn only_tracked_changes_append_history() {
        let writer = writer().await;
        let t0 = Utc::now();

        let first = writer.write(&snapshot(8_000, StockStatus::InStock, 1, t0)).await.expect("s1");
        assert!(first.history_written);

        let same = writer
            .write(&snapshot(8_000, StockStatus::InStock, 9, t0 + Duration::minutes(1)))
            .await
            .expect("s2");
        assert!(!same.history_written, "review drift alone is not a change");

        let sold_out = writer
            .write(&snapshot(8_000, StockStatus::OutOfStock, 9, t0 + Duration::minutes(2)))
            .await
            .expect("s3");
        assert!(sold_out.history_written);

        let history = writer.repository().price_history(first.product_id).await.expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(writer.locked_products(), 0);
    }

    #[tokio::test]
    async fn stale_snapshots_do_not_reorder_history() {
        let writer = writer().await;
        let t0 = Utc::now();

        let fresh = writer.write(&snapshot(8_000, StockStatus::InStock, 1, t0)).await.expect("fresh");
        let stale = writer
            .write(&snapshot(7_000, StockStatus::InStock, 1, t0 - Duration::minutes(5)))
            .await
            .expect("stale");
        assert!(!stale.history_written);

        let history = writer.repository().price_history(fresh.product_id).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].prices.sale(), 8_000);
    }

    #[tokio::test]
    async fn stale_snapshots_leave_identity_untouched() {
        let writer = writer().await;
        let t0 = Utc::now();

        let fresh = writer.write(&snapshot(8_000, StockStatus::InStock, 12, t0)).await.expect("fresh");

        let mut identity = snapshot(8_000, StockStatus::InStock, 3, t0).identity().clone();
        identity.name = "울 코트 (구형)".into();
        let older = ProductSnapshot::new(
            identity,
            PriceFields::new(10_000, 7_000, None).expect("prices"),
            StockStatus::OutOfStock,
            ReviewAggregate::new(Some(3), Some(3.0)),
            t0 - Duration::minutes(5),
        )
        .expect("snapshot");
        let stale = writer.write(&older).await.expect("stale");

        assert_eq!(stale.product_id, fresh.product_id);
        assert!(!stale.history_written);

        let product = writer.repository().find_by_key("501").await.expect("lookup").expect("product");
        assert_eq!(product.name, "울 코트");
        assert_eq!(product.review_count, Some(12));
        assert_eq!(product.rating, Some(4.5));
        assert_eq!(product.updated_at, t0);
        assert_eq!(writer.locked_products(), 0);
    }
}
