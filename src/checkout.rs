//! Checkout engine.
//!
//! Turns a list of purchase lines into one recorded sale. Every line locks its
//! product row exclusively, in request order, and the lock is held until the
//! unit of work commits or rolls back. Any failure leaves stock, transactions
//! and details exactly as they were.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use crate::domain::aggregates::{ProductError, Sale};
use crate::domain::events::{DomainEvent, EventSink};
use crate::domain::value_objects::Quantity;
use crate::store::{SalesStore, UnitOfWork};
use crate::{CheckoutError, CheckoutItem, Transaction};

#[derive(Clone)]
pub struct CheckoutEngine {
    store: Arc<dyn SalesStore>,
    lock_timeout: Option<Duration>,
    events: Option<Arc<dyn EventSink>>,
}

impl CheckoutEngine {
    pub fn new(store: Arc<dyn SalesStore>) -> Self {
        Self { store, lock_timeout: None, events: None }
    }

    /// Bounds how long a checkout waits for a product another checkout holds.
    /// `None` waits indefinitely.
    pub fn with_lock_timeout(mut self, lock_timeout: Option<Duration>) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    #[instrument(skip(self, items), fields(items = items.len()))]
    pub async fn checkout(&self, items: &[CheckoutItem]) -> Result<Transaction, CheckoutError> {
        match self.run(items).await {
            Ok((transaction, events)) => {
                info!(
                    transaction_id = transaction.id,
                    total_amount = transaction.total_amount,
                    lines = transaction.details.len(),
                    "checkout committed"
                );
                if let Some(sink) = &self.events {
                    sink.publish(events).await;
                }
                Ok(transaction)
            }
            Err(err) if err.is_business() => {
                warn!(error = %err, "checkout rejected");
                Err(err)
            }
            Err(err) => {
                error!(error = %err, "checkout failed");
                Err(err)
            }
        }
    }

    async fn run(&self, items: &[CheckoutItem]) -> Result<(Transaction, Vec<DomainEvent>), CheckoutError> {
        if items.is_empty() {
            return Err(CheckoutError::EmptyItems);
        }
        for (index, item) in items.iter().enumerate() {
            validate(index, item)?;
        }

        let mut uow = self.store.begin(self.lock_timeout).await?;
        let recorded = match take_lines(&mut *uow, items).await {
            Ok(sale) => persist(&mut *uow, sale).await,
            Err(err) => Err(err),
        };
        match recorded {
            Ok(recorded) => {
                uow.commit().await?;
                Ok(recorded)
            }
            Err(err) => {
                if let Err(e) = uow.rollback().await {
                    warn!(error = %e, "rollback failed; the store discards the unit of work");
                }
                Err(err)
            }
        }
    }
}

fn validate(index: usize, item: &CheckoutItem) -> Result<Quantity, CheckoutError> {
    let invalid = || CheckoutError::InvalidItem { index, product_id: item.product_id, quantity: item.quantity };
    if item.product_id <= 0 {
        return Err(invalid());
    }
    Quantity::new(item.quantity).ok_or_else(invalid)
}

/// Locks, checks and decrements each product in request order.
async fn take_lines(uow: &mut dyn UnitOfWork, items: &[CheckoutItem]) -> Result<Sale, CheckoutError> {
    let mut sale = Sale::new();
    for (index, item) in items.iter().enumerate() {
        let qty = validate(index, item)?;
        let mut product = uow
            .lock_product(item.product_id)
            .await?
            .ok_or(CheckoutError::ProductNotFound { product_id: item.product_id })?;

        product.take_stock(qty).map_err(|ProductError::InsufficientStock { available }| {
            CheckoutError::InsufficientStock {
                product_id: product.id,
                name: product.name.clone(),
                requested: qty.value(),
                available,
            }
        })?;
        uow.update_stock(product.id, product.stock).await?;

        sale.add_line(&product, qty)
            .map_err(|_| CheckoutError::AmountOverflow { product_id: product.id })?;
    }
    Ok(sale)
}

async fn persist(uow: &mut dyn UnitOfWork, mut sale: Sale) -> Result<(Transaction, Vec<DomainEvent>), CheckoutError> {
    let (transaction_id, created_at) = uow.insert_transaction(sale.total().amount()).await?;
    sale.assign_transaction(transaction_id);
    for line in sale.lines_mut() {
        line.id = uow.insert_detail(line).await?;
    }
    Ok(sale.into_transaction(transaction_id, created_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{InventoryEvent, SaleEvent};
    use crate::store::{CatalogStore, MemoryStore};
    use crate::{NewCategory, NewProduct, StoreError};
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    fn item(product_id: i32, quantity: i32) -> CheckoutItem {
        CheckoutItem { product_id, quantity }
    }

    async fn seed(store: &MemoryStore, name: &str, price: i64, stock: i32) -> i32 {
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

    async fn stock(store: &MemoryStore, id: i32) -> i32 {
        store.get_product(id).await.unwrap().unwrap().stock
    }

    #[tokio::test]
    async fn test_checkout_success() {
        let store = MemoryStore::new();
        let apple = seed(&store, "Apple", 10, 50).await;
        let orange = seed(&store, "Orange", 20, 30).await;
        let engine = CheckoutEngine::new(Arc::new(store.clone()));

        let trx = engine.checkout(&[item(apple, 3), item(orange, 2)]).await.unwrap();

        assert!(trx.id > 0);
        assert_eq!(trx.total_amount, 70);
        assert_eq!(trx.details.len(), 2);
        assert_eq!(trx.details[0].product_name, "Apple");
        assert_eq!(trx.details[0].unit_price, 10);
        assert_eq!(trx.details[0].product_description, "Food category");
        assert_eq!(trx.details[1].subtotal, 40);
        assert!(trx.details.iter().all(|d| d.transaction_id == trx.id && d.id > 0));
        assert_eq!(trx.total_amount, trx.details.iter().map(|d| d.unit_price * i64::from(d.quantity)).sum::<i64>());
        assert_eq!(stock(&store, apple).await, 47);
        assert_eq!(stock(&store, orange).await, 28);
        assert_eq!(store.transactions().await, vec![trx]);
    }

    #[tokio::test]
    async fn test_checkout_without_category_has_empty_description() {
        let store = MemoryStore::new();
        let id = store
            .create_product(&NewProduct { name: "NoCatItem".into(), price: 100, stock: 5, category_id: None })
            .await
            .unwrap()
            .id;
        let trx = CheckoutEngine::new(Arc::new(store.clone())).checkout(&[item(id, 1)]).await.unwrap();
        assert_eq!(trx.details[0].product_description, "");
    }

    #[tokio::test]
    async fn test_checkout_empty_items() {
        let engine = CheckoutEngine::new(Arc::new(MemoryStore::new()));
        assert!(matches!(engine.checkout(&[]).await, Err(CheckoutError::EmptyItems)));
    }

    #[tokio::test]
    async fn test_checkout_insufficient_stock() {
        let store = MemoryStore::new();
        let id = seed(&store, "Apple", 10, 1).await;
        let err = CheckoutEngine::new(Arc::new(store.clone())).checkout(&[item(id, 2)]).await.unwrap_err();
        assert!(matches!(err, CheckoutError::InsufficientStock { requested: 2, available: 1, .. }));
        assert!(err.is_business());
        assert_eq!(stock(&store, id).await, 1);
    }

    #[tokio::test]
    async fn test_checkout_product_not_found() {
        let store = MemoryStore::new();
        let err = CheckoutEngine::new(Arc::new(store.clone())).checkout(&[item(999, 1)]).await.unwrap_err();
        assert!(matches!(err, CheckoutError::ProductNotFound { product_id: 999 }));
        assert!(store.transactions().await.is_empty());
    }

    #[tokio::test]
    async fn test_checkout_invalid_items() {
        let engine = CheckoutEngine::new(Arc::new(MemoryStore::new()));
        for bad in [item(0, 1), item(-1, 1), item(1, 0), item(1, -5)] {
            assert!(matches!(engine.checkout(&[bad]).await, Err(CheckoutError::InvalidItem { index: 0, .. })));
        }
    }

    #[tokio::test]
    async fn test_checkout_rollback_on_invalid_item() {
        let store = MemoryStore::new();
        let id = seed(&store, "Apple", 10, 10).await;
        let engine = CheckoutEngine::new(Arc::new(store.clone()));
        let err = engine.checkout(&[item(id, 2), item(0, 1)]).await.unwrap_err();
        assert!(matches!(err, CheckoutError::InvalidItem { index: 1, .. }));
        assert_eq!(stock(&store, id).await, 10);
        assert!(store.transactions().await.is_empty());
    }

    #[tokio::test]
    async fn test_checkout_rollback_on_insufficient_stock_second_item() {
        let store = MemoryStore::new();
        let apple = seed(&store, "Apple", 10, 10).await;
        let orange = seed(&store, "Orange", 20, 1).await;
        let engine = CheckoutEngine::new(Arc::new(store.clone()));
        let err = engine.checkout(&[item(apple, 4), item(orange, 2)]).await.unwrap_err();
        assert!(matches!(err, CheckoutError::InsufficientStock { product_id, .. } if product_id == orange));
        assert_eq!(stock(&store, apple).await, 10);
        assert_eq!(stock(&store, orange).await, 1);
        assert!(store.transactions().await.is_empty());
    }

    #[tokio::test]
    async fn test_checkout_rollback_on_missing_second_product() {
        let store = MemoryStore::new();
        let apple = seed(&store, "Apple", 10, 10).await;
        let engine = CheckoutEngine::new(Arc::new(store.clone()));
        let err = engine.checkout(&[item(apple, 4), item(apple + 100, 1)]).await.unwrap_err();
        assert!(matches!(err, CheckoutError::ProductNotFound { .. }));
        assert_eq!(stock(&store, apple).await, 10);

        // Locks were released by the rollback.
        assert!(engine.checkout(&[item(apple, 4)]).await.is_ok());
        assert_eq!(stock(&store, apple).await, 6);
    }

    #[tokio::test]
    async fn test_checkout_commit_failure_is_infrastructure() {
        let store = MemoryStore::new();
        let id = seed(&store, "Apple", 10, 10).await;
        store.set_fail_on_commit(true);
        let err = CheckoutEngine::new(Arc::new(store.clone())).checkout(&[item(id, 3)]).await.unwrap_err();
        assert!(matches!(err, CheckoutError::Infrastructure(StoreError::Database(_))));
        assert!(!err.is_business());
        assert_eq!(stock(&store, id).await, 10);
        assert!(store.transactions().await.is_empty());
    }

    #[tokio::test]
    async fn test_checkout_same_product_twice() {
        let store = MemoryStore::new();
        let id = seed(&store, "Apple", 10, 5).await;
        let engine = CheckoutEngine::new(Arc::new(store.clone()));

        let trx = engine.checkout(&[item(id, 2), item(id, 3)]).await.unwrap();
        assert_eq!(trx.total_amount, 50);
        assert_eq!(stock(&store, id).await, 0);

        let store = MemoryStore::new();
        let id = seed(&store, "Apple", 10, 4).await;
        let engine = CheckoutEngine::new(Arc::new(store.clone()));
        let err = engine.checkout(&[item(id, 2), item(id, 3)]).await.unwrap_err();
        assert!(matches!(err, CheckoutError::InsufficientStock { available: 2, .. }));
        assert_eq!(stock(&store, id).await, 4);
    }

    #[tokio::test]
    async fn test_checkout_amount_overflow() {
        let store = MemoryStore::new();
        let id = seed(&store, "Gold", i64::MAX, 5).await;
        let err = CheckoutEngine::new(Arc::new(store.clone())).checkout(&[item(id, 2)]).await.unwrap_err();
        assert!(matches!(err, CheckoutError::AmountOverflow { .. }));
        assert_eq!(stock(&store, id).await, 5);
    }

    #[tokio::test]
    async fn test_snapshot_survives_catalog_edit() {
        let store = MemoryStore::new();
        let id = seed(&store, "Apple", 10, 10).await;
        let trx = CheckoutEngine::new(Arc::new(store.clone())).checkout(&[item(id, 1)]).await.unwrap();
        store
            .update_product(id, &NewProduct { name: "Green Apple".into(), price: 99, stock: 9, category_id: None })
            .await
            .unwrap();
        let recorded = &store.transactions().await[0];
        assert_eq!(recorded, &trx);
        assert_eq!(recorded.details[0].product_name, "Apple");
        assert_eq!(recorded.details[0].unit_price, 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_oversell_under_concurrency() {
        let store = MemoryStore::new();
        let id = seed(&store, "Apple", 10, 10).await;
        let engine = CheckoutEngine::new(Arc::new(store.clone()));

        let handles: Vec<_> = (0..25)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.checkout(&[item(id, 3)]).await })
            })
            .collect();

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(err) => assert!(matches!(err, CheckoutError::InsufficientStock { .. })),
            }
        }
        assert_eq!(succeeded, 10 / 3);
        assert_eq!(stock(&store, id).await, 10 - succeeded * 3);
        assert_eq!(store.transactions().await.len(), succeeded as usize);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_opposite_lock_order_never_hangs() {
        let store = MemoryStore::new();
        let apple = seed(&store, "Apple", 10, 100).await;
        let orange = seed(&store, "Orange", 20, 100).await;
        let engine = CheckoutEngine::new(Arc::new(store.clone()));

        let handles: Vec<_> = (0..20)
            .map(|n| {
                let engine = engine.clone();
                let items = if n % 2 == 0 { [item(apple, 1), item(orange, 1)] } else { [item(orange, 1), item(apple, 1)] };
                tokio::spawn(async move { engine.checkout(&items).await })
            })
            .collect();

        let mut succeeded = 0;
        for handle in handles {
            match tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap() {
                Ok(_) => succeeded += 1,
                Err(err) => assert!(matches!(err, CheckoutError::Infrastructure(StoreError::Deadlock(_)))),
            }
        }
        assert!(succeeded > 0);
        assert_eq!(stock(&store, apple).await, 100 - succeeded);
        assert_eq!(stock(&store, orange).await, 100 - succeeded);
        assert_eq!(store.transactions().await.len(), succeeded as usize);
    }

    #[tokio::test]
    async fn test_lock_timeout_is_infrastructure() {
        let store = MemoryStore::new();
        let id = seed(&store, "Apple", 10, 10).await;
        let mut holder = store.begin(None).await.unwrap();
        holder.lock_product(id).await.unwrap();

        let engine = CheckoutEngine::new(Arc::new(store.clone())).with_lock_timeout(Some(Duration::from_millis(20)));
        let err = engine.checkout(&[item(id, 1)]).await.unwrap_err();
        assert!(matches!(err, CheckoutError::Infrastructure(StoreError::LockTimeout(_))));

        drop(holder);
        assert!(engine.checkout(&[item(id, 1)]).await.is_ok());
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<DomainEvent>>,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn publish(&self, events: Vec<DomainEvent>) {
            self.events.lock().await.extend(events);
        }
    }

    #[tokio::test]
    async fn test_events_published_only_after_commit() {
        let store = MemoryStore::new();
        let id = seed(&store, "Apple", 10, 10).await;
        let sink = Arc::new(RecordingSink::default());
        let engine = CheckoutEngine::new(Arc::new(store.clone())).with_event_sink(sink.clone());

        engine.checkout(&[item(id, 20)]).await.unwrap_err();
        assert!(sink.events.lock().await.is_empty());

        let trx = engine.checkout(&[item(id, 4)]).await.unwrap();
        let events = sink.events.lock().await.clone();
        assert_eq!(events, vec![
            DomainEvent::Inventory(InventoryEvent::StockTaken { product_id: id, quantity: 4, remaining: 6 }),
            DomainEvent::Sale(SaleEvent::Recorded { transaction_id: trx.id, total_amount: 40, lines: 1 }),
        ]);
    }
}
