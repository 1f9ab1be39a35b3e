//! Storage backends.
//!
//! The checkout engine and report aggregator only see the traits below. A
//! backend provides exclusive per-product locks held for the lifetime of a
//! [`UnitOfWork`], and makes a committed transaction visible together with all
//! of its detail rows.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::aggregates::LockedProduct;
use crate::{Category, NewCategory, NewProduct, Product, Result, TransactionDetail, WindowTotals};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Table names a store instance targets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tables {
    pub category: String,
    pub product: String,
    pub transaction: String,
    pub transaction_detail: String,
}

impl Default for Tables {
    fn default() -> Self {
        Self::with_suffix("")
    }
}

impl Tables {
    /// `with_suffix("_test")` selects the test schema.
    pub fn with_suffix(suffix: &str) -> Self {
        // "transaction" is a reserved word in PostgreSQL.
        let transaction = if suffix.is_empty() {
            "\"transaction\"".to_string()
        } else {
            format!("transaction{suffix}")
        };
        Self {
            category: format!("category{suffix}"),
            product: format!("product{suffix}"),
            transaction,
            transaction_detail: format!("transaction_detail{suffix}"),
        }
    }
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn list_categories(&self) -> Result<Vec<Category>>;
    async fn get_category(&self, id: i32) -> Result<Option<Category>>;
    async fn create_category(&self, category: &NewCategory) -> Result<Category>;
    async fn update_category(&self, id: i32, category: &NewCategory) -> Result<Option<Category>>;
    async fn delete_category(&self, id: i32) -> Result<bool>;

    async fn list_products(&self) -> Result<Vec<Product>>;
    async fn get_product(&self, id: i32) -> Result<Option<Product>>;
    async fn create_product(&self, product: &NewProduct) -> Result<Product>;
    async fn update_product(&self, id: i32, product: &NewProduct) -> Result<Option<Product>>;
    async fn delete_product(&self, id: i32) -> Result<bool>;
}

#[async_trait]
pub trait SalesStore: Send + Sync {
    /// Opens a unit of work. With `lock_timeout` set, waiting for a product
    /// lock longer than that fails with `StoreError::LockTimeout`.
    async fn begin(&self, lock_timeout: Option<Duration>) -> Result<Box<dyn UnitOfWork>>;
}

/// One atomic checkout. Dropping it without `commit` rolls everything back.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Acquires the exclusive lock on a product row and reads it, joined to
    /// its category description. `None` when the product does not exist.
    async fn lock_product(&mut self, product_id: i32) -> Result<Option<LockedProduct>>;
    async fn update_stock(&mut self, product_id: i32, stock: i32) -> Result<()>;
    /// Returns the new transaction's id and server-assigned creation time.
    async fn insert_transaction(&mut self, total_amount: i64) -> Result<(i32, DateTime<Utc>)>;
    async fn insert_detail(&mut self, detail: &TransactionDetail) -> Result<i32>;
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Totals of transactions with `created_at` in `[start, end)`.
    async fn window_totals(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<WindowTotals>;
}
