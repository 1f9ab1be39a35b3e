//! In-memory storage.
//!
//! Each product id maps to a `tokio::sync::Mutex` that a unit of work holds
//! until it is committed or dropped. Stock writes and the new transaction are
//! buffered in the unit of work and applied together on commit, so dropping
//! it is a full rollback and readers never see a partial checkout.
//!
//! Units of work that wait on each other in a cycle are detected before the
//! closing wait starts; that unit fails with `StoreError::Deadlock`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

use crate::domain::aggregates::LockedProduct;
use crate::store::{CatalogStore, LedgerStore, SalesStore, UnitOfWork};
use crate::{
    Category, NewCategory, NewProduct, Product, ProductQuantity, Result, StoreError, Transaction,
    TransactionDetail, WindowTotals,
};

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    catalog: RwLock<Catalog>,
    ledger: RwLock<Vec<Transaction>>,
    row_locks: Mutex<HashMap<i32, Arc<Mutex<()>>>>,
    waits: std::sync::Mutex<WaitGraph>,
    next_unit_id: AtomicU64,
    next_transaction_id: AtomicI32,
    next_detail_id: AtomicI32,
    fail_on_commit: AtomicBool,
}

#[derive(Default)]
struct Catalog {
    categories: BTreeMap<i32, Category>,
    products: BTreeMap<i32, ProductRow>,
    next_category_id: i32,
    next_product_id: i32,
}

#[derive(Clone)]
struct ProductRow {
    id: i32,
    name: String,
    price: i64,
    stock: i32,
    category_id: Option<i32>,
}

/// Which unit of work holds each product lock, and which product each
/// blocked unit of work is waiting for.
#[derive(Default)]
struct WaitGraph {
    holders: HashMap<i32, u64>,
    waiting: HashMap<u64, i32>,
}

impl WaitGraph {
    /// Whether `unit` waiting for `product_id` would close a wait cycle.
    fn closes_cycle(&self, unit: u64, product_id: i32) -> bool {
        let mut product_id = product_id;
        for _ in 0..=self.waiting.len() {
            let Some(&holder) = self.holders.get(&product_id) else {
                return false;
            };
            if holder == unit {
                return true;
            }
            match self.waiting.get(&holder) {
                Some(&next) => product_id = next,
                None => return false,
            }
        }
        false
    }
}

impl Catalog {
    fn view(&self, row: &ProductRow) -> Product {
        let category = row.category_id.and_then(|id| self.categories.get(&id));
        Product {
            id: row.id,
            name: row.name.clone(),
            price: row.price,
            stock: row.stock,
            category_id: row.category_id,
            category_name: category.map(|c| c.name.clone()),
            category_description: category.map(|c| c.description.clone()),
        }
    }

    fn check_category(&self, category_id: Option<i32>) -> Result<()> {
        match category_id {
            Some(id) if !self.categories.contains_key(&id) => {
                Err(StoreError::Constraint(format!("category {id} does not exist")))
            }
            _ => Ok(()),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an already-priced transaction, e.g. when loading history.
    pub async fn import_transaction(
        &self,
        total_amount: i64,
        created_at: DateTime<Utc>,
        details: Vec<TransactionDetail>,
    ) -> Transaction {
        let id = self.inner.next_transaction_id();
        let details = details
            .into_iter()
            .map(|d| TransactionDetail { id: self.inner.next_detail_id(), transaction_id: id, ..d })
            .collect();
        let transaction = Transaction { id, total_amount, created_at, details };
        self.inner.ledger.write().await.push(transaction.clone());
        transaction
    }

    pub async fn transactions(&self) -> Vec<Transaction> {
        self.inner.ledger.read().await.clone()
    }

    /// Makes every following commit fail, as a lost connection would.
    pub fn set_fail_on_commit(&self, fail: bool) {
        self.inner.fail_on_commit.store(fail, Ordering::SeqCst);
    }
}

impl Inner {
    async fn row_lock(&self, product_id: i32) -> Arc<Mutex<()>> {
        let mut locks = self.row_locks.lock().await;
        Arc::clone(locks.entry(product_id).or_default())
    }

    /// Forgets the lock of `product_id` once nobody holds or awaits it.
    async fn prune_row_lock(&self, product_id: i32) {
        let mut locks = self.row_locks.lock().await;
        if locks.get(&product_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&product_id);
        }
    }

    fn wait_graph(&self) -> MutexGuard<'_, WaitGraph> {
        self.waits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_waiting(&self, unit: u64, product_id: i32) -> Result<Waiting<'_>> {
        let mut graph = self.wait_graph();
        if graph.closes_cycle(unit, product_id) {
            return Err(StoreError::Deadlock(product_id));
        }
        graph.waiting.insert(unit, product_id);
        Ok(Waiting { inner: self, unit })
    }

    fn next_transaction_id(&self) -> i32 {
        self.next_transaction_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn next_detail_id(&self) -> i32 {
        self.next_detail_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn list_categories(&self) -> Result<Vec<Category>> {
        Ok(self.inner.catalog.read().await.categories.values().cloned().collect())
    }

    async fn get_category(&self, id: i32) -> Result<Option<Category>> {
        Ok(self.inner.catalog.read().await.categories.get(&id).cloned())
    }

    async fn create_category(&self, category: &NewCategory) -> Result<Category> {
        let mut catalog = self.inner.catalog.write().await;
        catalog.next_category_id += 1;
        let created = Category {
            id: catalog.next_category_id,
            name: category.name.clone(),
            description: category.description.clone(),
        };
        catalog.categories.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_category(&self, id: i32, category: &NewCategory) -> Result<Option<Category>> {
        let mut catalog = self.inner.catalog.write().await;
        Ok(catalog.categories.get_mut(&id).map(|existing| {
            existing.name = category.name.clone();
            existing.description = category.description.clone();
            existing.clone()
        }))
    }

    async fn delete_category(&self, id: i32) -> Result<bool> {
        let mut catalog = self.inner.catalog.write().await;
        if catalog.products.values().any(|p| p.category_id == Some(id)) {
            return Err(StoreError::Constraint(format!("category {id} is still referenced by products")));
        }
        Ok(catalog.categories.remove(&id).is_some())
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        let catalog = self.inner.catalog.read().await;
        Ok(catalog.products.values().map(|row| catalog.view(row)).collect())
    }

    async fn get_product(&self, id: i32) -> Result<Option<Product>> {
        let catalog = self.inner.catalog.read().await;
        Ok(catalog.products.get(&id).map(|row| catalog.view(row)))
    }

    async fn create_product(&self, product: &NewProduct) -> Result<Product> {
        let mut catalog = self.inner.catalog.write().await;
        catalog.check_category(product.category_id)?;
        catalog.next_product_id += 1;
        let row = ProductRow {
            id: catalog.next_product_id,
            name: product.name.clone(),
            price: product.price,
            stock: product.stock,
            category_id: product.category_id,
        };
        let created = catalog.view(&row);
        catalog.products.insert(row.id, row);
        Ok(created)
    }

    async fn update_product(&self, id: i32, product: &NewProduct) -> Result<Option<Product>> {
        let updated = {
            // Same row lock as checkout, so an in-flight sale is never overwritten.
            let lock = self.inner.row_lock(id).await;
            let _guard = lock.lock().await;
            let mut catalog = self.inner.catalog.write().await;
            catalog.check_category(product.category_id)?;
            match catalog.products.get_mut(&id) {
                Some(row) => {
                    row.name = product.name.clone();
                    row.price = product.price;
                    row.stock = product.stock;
                    row.category_id = product.category_id;
                    let row = row.clone();
                    Some(catalog.view(&row))
                }
                None => None,
            }
        };
        if updated.is_none() {
            self.inner.prune_row_lock(id).await;
        }
        Ok(updated)
    }

    async fn delete_product(&self, id: i32) -> Result<bool> {
        let removed = {
            let lock = self.inner.row_lock(id).await;
            let _guard = lock.lock().await;
            self.inner.catalog.write().await.products.remove(&id).is_some()
        };
        self.inner.prune_row_lock(id).await;
        Ok(removed)
    }
}

#[async_trait]
impl SalesStore for MemoryStore {
    async fn begin(&self, lock_timeout: Option<Duration>) -> Result<Box<dyn UnitOfWork>> {
        Ok(Box::new(MemoryUnitOfWork {
            inner: Arc::clone(&self.inner),
            unit: self.inner.next_unit_id.fetch_add(1, Ordering::SeqCst),
            lock_timeout,
            held: HashMap::new(),
            stock: BTreeMap::new(),
            transaction: None,
        }))
    }
}

pub struct MemoryUnitOfWork {
    inner: Arc<Inner>,
    unit: u64,
    lock_timeout: Option<Duration>,
    held: HashMap<i32, RowGuard>,
    stock: BTreeMap<i32, i32>,
    transaction: Option<Transaction>,
}

/// A product lock owned by a unit of work, listed in the wait graph until
/// released.
struct RowGuard {
    inner: Arc<Inner>,
    unit: u64,
    product_id: i32,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for RowGuard {
    fn drop(&mut self) {
        let mut graph = self.inner.wait_graph();
        if graph.holders.get(&self.product_id) == Some(&self.unit) {
            graph.holders.remove(&self.product_id);
        }
    }
}

/// A pending wait edge, removed however the wait ends.
struct Waiting<'a> {
    inner: &'a Inner,
    unit: u64,
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.inner.wait_graph().waiting.remove(&self.unit);
    }
}

impl MemoryUnitOfWork {
    async fn acquire(&self, product_id: i32) -> Result<RowGuard> {
        let lock = self.inner.row_lock(product_id).await;
        let guard = match Arc::clone(&lock).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                let _waiting = self.inner.start_waiting(self.unit, product_id)?;
                debug!(product_id, "waiting for product row lock");
                match self.lock_timeout {
                    Some(limit) => tokio::time::timeout(limit, lock.lock_owned())
                        .await
                        .map_err(|_| StoreError::LockTimeout(product_id))?,
                    None => lock.lock_owned().await,
                }
            }
        };
        self.inner.wait_graph().holders.insert(product_id, self.unit);
        Ok(RowGuard { inner: Arc::clone(&self.inner), unit: self.unit, product_id, _guard: guard })
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn lock_product(&mut self, product_id: i32) -> Result<Option<LockedProduct>> {
        if !self.held.contains_key(&product_id) {
            let guard = self.acquire(product_id).await?;
            self.held.insert(product_id, guard);
        }

        let product = {
            let catalog = self.inner.catalog.read().await;
            catalog.products.get(&product_id).map(|row| LockedProduct {
                id: row.id,
                name: row.name.clone(),
                price: row.price,
                stock: self.stock.get(&row.id).copied().unwrap_or(row.stock),
                description: row
                    .category_id
                    .and_then(|id| catalog.categories.get(&id))
                    .map(|c| c.description.clone())
                    .unwrap_or_default(),
            })
        };
        if product.is_none() {
            self.held.remove(&product_id);
            self.inner.prune_row_lock(product_id).await;
        }
        Ok(product)
    }

    async fn update_stock(&mut self, product_id: i32, stock: i32) -> Result<()> {
        if !self.held.contains_key(&product_id) {
            return Err(StoreError::Constraint(format!("product {product_id} is not locked")));
        }
        if stock < 0 {
            return Err(StoreError::Constraint(format!("stock of product {product_id} would be negative")));
        }
        self.stock.insert(product_id, stock);
        Ok(())
    }

    async fn insert_transaction(&mut self, total_amount: i64) -> Result<(i32, DateTime<Utc>)> {
        let id = self.inner.next_transaction_id();
        let created_at = Utc::now();
        self.transaction = Some(Transaction { id, total_amount, created_at, details: Vec::new() });
        Ok((id, created_at))
    }

    async fn insert_detail(&mut self, detail: &TransactionDetail) -> Result<i32> {
        let transaction = self
            .transaction
            .as_mut()
            .filter(|t| t.id == detail.transaction_id)
            .ok_or_else(|| StoreError::Constraint(format!("transaction {} does not exist", detail.transaction_id)))?;
        let id = self.inner.next_detail_id();
        transaction.details.push(TransactionDetail { id, ..detail.clone() });
        Ok(id)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryUnitOfWork { inner, held, stock, transaction, .. } = *self;
        if inner.fail_on_commit.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::Protocol("connection lost during commit".into())));
        }
        {
            let mut catalog = inner.catalog.write().await;
            let mut ledger = inner.ledger.write().await;
            for (product_id, stock) in stock {
                if let Some(row) = catalog.products.get_mut(&product_id) {
                    row.stock = stock;
                }
            }
            if let Some(transaction) = transaction {
                ledger.push(transaction);
            }
        }
        drop(held);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn window_totals(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<WindowTotals> {
        let ledger = self.inner.ledger.read().await;
        let mut totals = WindowTotals::default();
        let mut quantities: BTreeMap<&str, i64> = BTreeMap::new();
        for transaction in ledger.iter().filter(|t| t.created_at >= start && t.created_at < end) {
            totals.revenue = totals
                .revenue
                .checked_add(transaction.total_amount)
                .ok_or_else(|| StoreError::Constraint("revenue exceeds the 64-bit range".into()))?;
            totals.transaction_count += 1;
            for detail in &transaction.details {
                let sold = quantities.entry(detail.product_name.as_str()).or_default();
                *sold = sold
                    .checked_add(i64::from(detail.quantity))
                    .ok_or_else(|| StoreError::Constraint(format!("quantity of {} exceeds the 64-bit range", detail.product_name)))?;
            }
        }
        totals.quantities = quantities
            .into_iter()
            .map(|(name, quantity)| ProductQuantity { product_name: name.to_string(), quantity })
            .collect();
        Ok(totals)
    }
}
