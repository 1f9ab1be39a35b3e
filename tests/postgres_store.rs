//! Checkout and report scenarios against PostgreSQL.
//!
//! Runs only when `TEST_DATABASE_URL` is set; each test uses its own tables.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use retail_backoffice::checkout::CheckoutEngine;
use retail_backoffice::report::ReportAggregator;
use retail_backoffice::store::{CatalogStore, PgStore, SalesStore, Tables};
use retail_backoffice::{CheckoutError, CheckoutItem, NewCategory, NewProduct, StoreError, TopProduct};

async fn store(name: &str) -> Option<PgStore> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let store = PgStore::connect(&url, 20, Tables::with_suffix(&format!("_test_{name}"))).await.unwrap();
    store.drop_tables().await.unwrap();
    store.migrate().await.unwrap();
    Some(store)
}

async fn product(store: &PgStore, name: &str, price: i64, stock: i32) -> i32 {
    let category = store
        .create_category(&NewCategory { name: "Food".into(), description: "Food category".into() })
        .await
        .unwrap();
    store
        .create_product(&NewProduct { name: name.into(), price, stock, category_id: Some(category.id) })
        .await
        .unwrap()
        .id
}

async fn stock(store: &PgStore, id: i32) -> i32 {
    store.get_product(id).await.unwrap().unwrap().stock
}

async fn transaction_count(store: &PgStore) -> i64 {
    let query = format!("SELECT COUNT(*) FROM {}", store.tables().transaction);
    sqlx::query_scalar(&query).fetch_one(store.pool()).await.unwrap()
}

async fn insert_sale(store: &PgStore, total: i64, created_at: DateTime<Utc>, lines: &[(&str, i32)]) {
    let t = store.tables();
    let id: i32 = sqlx::query_scalar(&format!("INSERT INTO {} (total_amount, created_at) VALUES ($1, $2) RETURNING id", t.transaction))
        .bind(total)
        .bind(created_at)
        .fetch_one(store.pool())
        .await
        .unwrap();
    for (name, quantity) in lines {
        sqlx::query(&format!(
            "INSERT INTO {} (transaction_id, product_id, product_name, quantity, subtotal) VALUES ($1, 1, $2, $3, 0)",
            t.transaction_detail
        ))
        .bind(id)
        .bind(*name)
        .bind(*quantity)
        .execute(store.pool())
        .await
        .unwrap();
    }
}

#[tokio::test]
async fn checkout_success() {
    let Some(store) = store("checkout_success").await else { return };
    let apple = product(&store, "Apple", 10, 50).await;
    let orange = product(&store, "Orange", 20, 30).await;
    let engine = CheckoutEngine::new(Arc::new(store.clone()));

    let trx = engine
        .checkout(&[CheckoutItem { product_id: apple, quantity: 3 }, CheckoutItem { product_id: orange, quantity: 2 }])
        .await
        .unwrap();

    assert!(trx.id > 0);
    assert_eq!(trx.total_amount, 70);
    assert_eq!(trx.details[0].product_description, "Food category");
    assert!(trx.details.iter().all(|d| d.id > 0 && d.transaction_id == trx.id));
    assert_eq!(stock(&store, apple).await, 47);
    assert_eq!(stock(&store, orange).await, 28);
}

#[tokio::test]
async fn checkout_rolls_back_earlier_lines() {
    let Some(store) = store("rollback").await else { return };
    let apple = product(&store, "Apple", 10, 10).await;
    let orange = product(&store, "Orange", 20, 1).await;
    let engine = CheckoutEngine::new(Arc::new(store.clone()));

    let err = engine
        .checkout(&[CheckoutItem { product_id: apple, quantity: 2 }, CheckoutItem { product_id: orange, quantity: 2 }])
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::InsufficientStock { .. }));

    let err = engine
        .checkout(&[CheckoutItem { product_id: apple, quantity: 2 }, CheckoutItem { product_id: 0, quantity: 1 }])
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::InvalidItem { index: 1, .. }));

    assert_eq!(stock(&store, apple).await, 10);
    assert_eq!(stock(&store, orange).await, 1);
    assert_eq!(transaction_count(&store).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn checkout_no_oversell() {
    let Some(store) = store("oversell").await else { return };
    let id = product(&store, "Apple", 10, 10).await;
    let engine = CheckoutEngine::new(Arc::new(store.clone()));

    let handles: Vec<_> = (0..12)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.checkout(&[CheckoutItem { product_id: id, quantity: 3 }]).await })
        })
        .collect();
    let mut succeeded = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            succeeded += 1;
        }
    }

    assert_eq!(succeeded, 3);
    assert_eq!(stock(&store, id).await, 1);
    assert_eq!(transaction_count(&store).await, 3);
}

#[tokio::test]
async fn checkout_lock_timeout() {
    let Some(store) = store("lock_timeout").await else { return };
    let id = product(&store, "Apple", 10, 10).await;
    let mut holder = store.begin(None).await.unwrap();
    holder.lock_product(id).await.unwrap();

    let engine = CheckoutEngine::new(Arc::new(store.clone())).with_lock_timeout(Some(Duration::from_millis(50)));
    let err = engine.checkout(&[CheckoutItem { product_id: id, quantity: 1 }]).await.unwrap_err();
    assert!(matches!(err, CheckoutError::Infrastructure(StoreError::LockTimeout(_))));

    holder.rollback().await.unwrap();
    assert!(engine.checkout(&[CheckoutItem { product_id: id, quantity: 1 }]).await.is_ok());
}

#[tokio::test]
async fn report_between() {
    let Some(store) = store("report").await else { return };
    let start = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
    insert_sale(&store, 15000, start + chrono::Duration::hours(2), &[("Indomie Goreng", 2), ("Teh Botol", 1)]).await;
    insert_sale(&store, 20000, start + chrono::Duration::hours(5), &[("Indomie Goreng", 3), ("Teh Botol", 2)]).await;
    insert_sale(&store, 9999, start - chrono::Duration::days(1), &[("Indomie Goreng", 1)]).await;

    let reports = ReportAggregator::new(Arc::new(store.clone()));
    let summary = reports.report_between(start, start + chrono::Duration::days(1)).await.unwrap();
    assert_eq!(summary.total_revenue, 35000);
    assert_eq!(summary.total_transactions, 2);
    assert_eq!(summary.top_product, Some(TopProduct { name: "Indomie Goreng".into(), quantity_sold: 5 }));

    let empty = reports
        .report_between(start + chrono::Duration::days(10), start + chrono::Duration::days(11))
        .await
        .unwrap();
    assert_eq!((empty.total_revenue, empty.total_transactions, empty.top_product), (0, 0, None));
}
