//! Change-aware writer properties against a real SQLite schema

use std::sync::Arc;

use chrono::{Duration, Utc};
use url::Url;

use musinsa_price_crawler::crawling::ChangeAwareWriter;
use musinsa_price_crawler::domain::{
    PriceFields, ProductIdentity, ProductSnapshot, ReviewAggregate, StockStatus,
};
use musinsa_price_crawler::test_utils::{TestDatabase, product_url};

fn snapshot(goods_no: u32, regular: i64, sale: i64, at: chrono::DateTime<Utc>) -> ProductSnapshot {
    ProductSnapshot::new(
        ProductIdentity {
            source_url: Url::parse(&product_url(goods_no)).expect("url"),
            goods_no: Some(goods_no.to_string()),
            name: format!("상품 {goods_no}"),
            brand: Some("브랜드".into()),
            brand_english: None,
            category_path: vec!["상의".into()],
            image_url: None,
        },
        PriceFields::new(regular, sale, None).expect("prices"),
        StockStatus::InStock,
        ReviewAggregate::new(Some(3), None),
        at,
    )
    .expect("snapshot")
}

#[tokio::test]
async fn identical_snapshot_twice_writes_one_entry() {
    let db = TestDatabase::new().await.expect("db");
    let writer = ChangeAwareWriter::new(db.products());
    let s = snapshot(1, 10_000, 8_000, Utc::now());

    assert!(writer.write(&s).await.expect("first").history_written);
    assert!(!writer.write(&s).await.expect("second").history_written);
    assert_eq!(db.products().count_history().await.expect("count"), 1);
    assert_eq!(db.products().count_products().await.expect("count"), 1);
}

#[tokio::test]
async fn unchanged_snapshots_are_deduplicated() {
    let db = TestDatabase::new().await.expect("db");
    let writer = ChangeAwareWriter::new(db.products());
    let t0 = Utc::now();

    let s1 = writer.write(&snapshot(2, 10_000, 8_000, t0)).await.expect("s1");
    let s2 = writer
        .write(&snapshot(2, 10_000, 8_000, t0 + Duration::hours(1)))
        .await
        .expect("s2");
    let s3 = writer
        .write(&snapshot(2, 10_000, 7_000, t0 + Duration::hours(2)))
        .await
        .expect("s3");

    assert!(s1.history_written);
    assert!(!s2.history_written);
    assert!(s3.history_written);

    let history = db.products().price_history(s1.product_id).await.expect("history");
    let sales: Vec<i64> = history.iter().map(|e| e.prices.sale()).collect();
    assert_eq!(sales, [8_000, 7_000]);
    assert_eq!(history[0].captured_at, t0);
    assert_eq!(history[1].captured_at, t0 + Duration::hours(2));
}

#[tokio::test]
async fn concurrent_writes_keep_history_ordered() {
    let db = TestDatabase::new().await.expect("db");
    let writer = Arc::new(ChangeAwareWriter::new(db.products()));
    let t0 = Utc::now();

    // captures arrive out of order with alternating prices
    let offsets: [i64; 12] = [5, 1, 9, 3, 11, 0, 7, 2, 10, 4, 8, 6];
    let mut tasks = Vec::new();
    for offset in offsets {
        let writer = Arc::clone(&writer);
        let sale = if offset % 2 == 0 { 8_000 } else { 7_500 };
        let s = snapshot(3, 10_000, sale, t0 + Duration::seconds(offset));
        tasks.push(tokio::spawn(async move { writer.write(&s).await }));
    }
    for task in tasks {
        task.await.expect("join").expect("write");
    }

    let product = db
        .products()
        .find_by_source_url(&Url::parse(&product_url(3)).expect("url"))
        .await
        .expect("lookup")
        .expect("product");
    let history = db.products().price_history(product.id).await.expect("history");

    assert!(!history.is_empty());
    for pair in history.windows(2) {
        assert!(pair[0].captured_at <= pair[1].captured_at, "history out of order");
        assert_ne!(pair[0].tracked(), pair[1].tracked(), "consecutive duplicate entries");
    }
    assert_eq!(writer.locked_products(), 0);
}

#[tokio::test]
async fn identity_fields_follow_the_latest_crawl() {
    let db = TestDatabase::new().await.expect("db");
    let writer = ChangeAwareWriter::new(db.products());
    let t0 = Utc::now();

    writer.write(&snapshot(4, 10_000, 9_000, t0)).await.expect("first");
    let renamed = {
        let base = snapshot(4, 10_000, 9_000, t0 + Duration::minutes(1));
        let mut identity = base.identity().clone();
        identity.name = "새 이름".into();
        ProductSnapshot::new(identity, *base.prices(), base.stock(), ReviewAggregate::new(Some(8), Some(4.9)), base.captured_at())
            .expect("snapshot")
    };
    let outcome = writer.write(&renamed).await.expect("second");
    assert!(!outcome.history_written);

    let product = db.products().find_by_key("4").await.expect("lookup").expect("product");
    assert_eq!(product.name, "새 이름");
    assert_eq!(product.review_count, Some(8));
    assert_eq!(product.rating, Some(4.9));
}
