//! PostgreSQL storage.
//!
//! Product locks are row locks taken with `SELECT ... FOR UPDATE OF p`; a unit
//! of work is a sqlx transaction, which rolls back when dropped uncommitted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Postgres;
use tracing::{debug, info};

use crate::domain::aggregates::LockedProduct;
use crate::store::{CatalogStore, LedgerStore, SalesStore, Tables, UnitOfWork};
use crate::{
    Category, NewCategory, NewProduct, Product, ProductQuantity, Result, StoreError,
    TransactionDetail, WindowTotals,
};

const LOCK_NOT_AVAILABLE: &str = "55P03";
const DEADLOCK_DETECTED: &str = "40P01";

/// PostgreSQL implementation of every store trait.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    tables: Arc<Tables>,
}

impl PgStore {
    pub fn new(pool: PgPool, tables: Tables) -> Self {
        Self { pool, tables: Arc::new(tables) }
    }

    pub async fn connect(url: &str, max_connections: u32, tables: Tables) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(url).await?;
        Ok(Self::new(pool, tables))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    /// Creates tables and indexes if they do not exist yet.
    pub async fn migrate(&self) -> Result<()> {
        let t = &*self.tables;
        let statements = [
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id SERIAL PRIMARY KEY,
                    name VARCHAR(255) NOT NULL,
                    description TEXT NOT NULL DEFAULT ''
                )",
                t.category
            ),
            format!("CREATE INDEX IF NOT EXISTS idx_{0}_name ON {1}(name)", bare(&t.category), t.category),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id SERIAL PRIMARY KEY,
                    name VARCHAR(255) NOT NULL,
                    price BIGINT NOT NULL DEFAULT 0 CHECK (price >= 0),
                    stock INTEGER NOT NULL DEFAULT 0 CHECK (stock >= 0),
                    category_id INTEGER REFERENCES {}(id)
                )",
                t.product, t.category
            ),
            format!("CREATE INDEX IF NOT EXISTS idx_{0}_name ON {1}(name)", bare(&t.product), t.product),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id SERIAL PRIMARY KEY,
                    total_amount BIGINT NOT NULL DEFAULT 0,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
                t.transaction
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id SERIAL PRIMARY KEY,
                    transaction_id INTEGER NOT NULL REFERENCES {}(id) ON DELETE CASCADE,
                    product_id INTEGER NOT NULL,
                    product_name VARCHAR(255) NOT NULL,
                    product_description TEXT NOT NULL DEFAULT '',
                    unit_price BIGINT NOT NULL DEFAULT 0,
                    quantity INTEGER NOT NULL,
                    subtotal BIGINT NOT NULL
                )",
                t.transaction_detail, t.transaction
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{0}_created_at ON {1}(created_at)",
                bare(&t.transaction),
                t.transaction
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{0}_created_at_id ON {1}(created_at, id)",
                bare(&t.transaction),
                t.transaction
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{0}_transaction_id ON {1}(transaction_id)",
                bare(&t.transaction_detail),
                t.transaction_detail
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{0}_transaction_product_name ON {1}(transaction_id, product_name)",
                bare(&t.transaction_detail),
                t.transaction_detail
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{0}_product_id ON {1}(product_id)",
                bare(&t.transaction_detail),
                t.transaction_detail
            ),
        ];

        for statement in &statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!(tables = ?t, "database migrations completed");
        Ok(())
    }

    /// Drops every table this store targets, children first.
    pub async fn drop_tables(&self) -> Result<()> {
        let t = &*self.tables;
        for table in [&t.transaction_detail, &t.transaction, &t.product, &t.category] {
            sqlx::query(&format!("DROP TABLE IF EXISTS {table}")).execute(&self.pool).await?;
        }
        info!(tables = ?t, "dropped tables");
        Ok(())
    }

    fn product_select(&self) -> String {
        format!(
            "SELECT p.id, p.name, p.price, p.stock, p.category_id, c.name AS category_name, c.description AS category_description \
             FROM {} p LEFT JOIN {} c ON p.category_id = c.id",
            self.tables.product, self.tables.category
        )
    }

    /// Runs a product-returning write and joins the category onto its row.
    fn product_write(&self, write: &str) -> String {
        format!(
            "WITH p AS ({write} RETURNING *) \
             SELECT p.id, p.name, p.price, p.stock, p.category_id, c.name AS category_name, c.description AS category_description \
             FROM p LEFT JOIN {} c ON p.category_id = c.id",
            self.tables.category
        )
    }
}

fn bare(table: &str) -> &str {
    table.trim_matches('"')
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn list_categories(&self) -> Result<Vec<Category>> {
        let query = format!("SELECT id, name, COALESCE(description, '') AS description FROM {} ORDER BY id", self.tables.category);
        Ok(sqlx::query_as::<_, Category>(&query).fetch_all(&self.pool).await?)
    }

    async fn get_category(&self, id: i32) -> Result<Option<Category>> {
        let query = format!("SELECT id, name, COALESCE(description, '') AS description FROM {} WHERE id = $1", self.tables.category);
        Ok(sqlx::query_as::<_, Category>(&query).bind(id).fetch_optional(&self.pool).await?)
    }

    async fn create_category(&self, category: &NewCategory) -> Result<Category> {
        let query = format!(
            "INSERT INTO {} (name, description) VALUES ($1, $2) RETURNING id, name, COALESCE(description, '') AS description",
            self.tables.category
        );
        Ok(sqlx::query_as::<_, Category>(&query)
            .bind(&category.name)
            .bind(&category.description)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn update_category(&self, id: i32, category: &NewCategory) -> Result<Option<Category>> {
        let query = format!(
            "UPDATE {} SET name = $1, description = $2 WHERE id = $3 RETURNING id, name, COALESCE(description, '') AS description",
            self.tables.category
        );
        Ok(sqlx::query_as::<_, Category>(&query)
            .bind(&category.name)
            .bind(&category.description)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn delete_category(&self, id: i32) -> Result<bool> {
        let query = format!("DELETE FROM {} WHERE id = $1", self.tables.category);
        let result = sqlx::query(&query).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        let query = format!("{} ORDER BY p.id", self.product_select());
        Ok(sqlx::query_as::<_, Product>(&query).fetch_all(&self.pool).await?)
    }

    async fn get_product(&self, id: i32) -> Result<Option<Product>> {
        let query = format!("{} WHERE p.id = $1", self.product_select());
        Ok(sqlx::query_as::<_, Product>(&query).bind(id).fetch_optional(&self.pool).await?)
    }

    async fn create_product(&self, product: &NewProduct) -> Result<Product> {
        let query = self.product_write(&format!(
            "INSERT INTO {} (name, price, stock, category_id) VALUES ($1, $2, $3, $4)",
            self.tables.product
        ));
        Ok(sqlx::query_as::<_, Product>(&query)
            .bind(&product.name)
            .bind(product.price)
            .bind(product.stock)
            .bind(product.category_id)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn update_product(&self, id: i32, product: &NewProduct) -> Result<Option<Product>> {
        let query = self.product_write(&format!(
            "UPDATE {} SET name = $1, price = $2, stock = $3, category_id = $4 WHERE id = $5",
            self.tables.product
        ));
        Ok(sqlx::query_as::<_, Product>(&query)
            .bind(&product.name)
            .bind(product.price)
            .bind(product.stock)
            .bind(product.category_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn delete_product(&self, id: i32) -> Result<bool> {
        let query = format!("DELETE FROM {} WHERE id = $1", self.tables.product);
        let result = sqlx::query(&query).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SalesStore for PgStore {
    async fn begin(&self, lock_timeout: Option<Duration>) -> Result<Box<dyn UnitOfWork>> {
        let mut tx = self.pool.begin().await?;
        if let Some(timeout) = lock_timeout {
            // SET does not take bind parameters; the value is a plain integer.
            let statement = format!("SET LOCAL lock_timeout = '{}ms'", timeout.as_millis().max(1));
            sqlx::query(&statement).execute(&mut *tx).await?;
        }
        Ok(Box::new(PgUnitOfWork { tx, tables: Arc::clone(&self.tables) }))
    }
}

/// A checkout running inside one PostgreSQL transaction.
pub struct PgUnitOfWork {
    tx: sqlx::Transaction<'static, Postgres>,
    tables: Arc<Tables>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn lock_product(&mut self, product_id: i32) -> Result<Option<LockedProduct>> {
        let query = format!(
            "SELECT p.id, p.name, p.price, p.stock, COALESCE(c.description, '') AS description \
             FROM {} p LEFT JOIN {} c ON p.category_id = c.id WHERE p.id = $1 FOR UPDATE OF p",
            self.tables.product, self.tables.category
        );
        debug!(product_id, "acquiring product row lock");
        sqlx::query_as::<_, LockedProduct>(&query)
            .bind(product_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| {
                let code = match &e {
                    sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
                    _ => None,
                };
                match code.as_deref() {
                    Some(LOCK_NOT_AVAILABLE) => StoreError::LockTimeout(product_id),
                    Some(DEADLOCK_DETECTED) => StoreError::Deadlock(product_id),
                    _ => StoreError::from(e),
                }
            })
    }

    async fn update_stock(&mut self, product_id: i32, stock: i32) -> Result<()> {
        let query = format!("UPDATE {} SET stock = $1 WHERE id = $2", self.tables.product);
        sqlx::query(&query).bind(stock).bind(product_id).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn insert_transaction(&mut self, total_amount: i64) -> Result<(i32, DateTime<Utc>)> {
        let query = format!(
            "INSERT INTO {} (total_amount) VALUES ($1) RETURNING id, created_at",
            self.tables.transaction
        );
        Ok(sqlx::query_as::<_, (i32, DateTime<Utc>)>(&query)
            .bind(total_amount)
            .fetch_one(&mut *self.tx)
            .await?)
    }

    async fn insert_detail(&mut self, detail: &TransactionDetail) -> Result<i32> {
        let query = format!(
            "INSERT INTO {} (transaction_id, product_id, product_name, product_description, unit_price, quantity, subtotal) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
            self.tables.transaction_detail
        );
        Ok(sqlx::query_scalar::<_, i32>(&query)
            .bind(detail.transaction_id)
            .bind(detail.product_id)
            .bind(&detail.product_name)
            .bind(&detail.product_description)
            .bind(detail.unit_price)
            .bind(detail.quantity)
            .bind(detail.subtotal)
            .fetch_one(&mut *self.tx)
            .await?)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn window_totals(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<WindowTotals> {
        let t = &*self.tables;
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;

        let totals = format!(
            "SELECT COALESCE(SUM(total_amount), 0)::BIGINT, COUNT(*) FROM {} WHERE created_at >= $1 AND created_at < $2",
            t.transaction
        );
        let (revenue, transaction_count) = sqlx::query_as::<_, (i64, i64)>(&totals)
            .bind(start)
            .bind(end)
            .fetch_one(&mut *tx)
            .await?;

        let quantities = format!(
            "SELECT d.product_name, COALESCE(SUM(d.quantity), 0)::BIGINT AS quantity \
             FROM {} d JOIN {} t ON d.transaction_id = t.id \
             WHERE t.created_at >= $1 AND t.created_at < $2 \
             GROUP BY d.product_name",
            t.transaction_detail, t.transaction
        );
        let quantities = sqlx::query_as::<_, ProductQuantity>(&quantities)
            .bind(start)
            .bind(end)
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(WindowTotals { revenue, transaction_count, quantities })
    }
}
