//! Retail Back-Office
//!
//! Catalog management plus the two parts with real correctness requirements:
//!
//! ## Features
//! - Category and product catalog
//! - Atomic checkout with per-product exclusive locks (no oversell)
//! - Sales reports over half-open UTC windows
//! - PostgreSQL and in-memory storage backends

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

pub mod api;
pub mod catalog;
pub mod checkout;
pub mod config;
pub mod domain;
pub mod report;
pub mod store;

// =============================================================================
// Core Types
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Category {
    pub id: i32,
    pub name: String,
    pub description: String,
}

#[derive(Clone, Debug, Default, Deserialize, Validate)]
pub struct NewCategory {
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A catalog product. Prices are in the smallest currency unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: i32,
    pub name: String,
    pub price: i64,
    pub stock: i32,
    pub category_id: Option<i32>,
    pub category_name: Option<String>,
    pub category_description: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Validate)]
pub struct NewProduct {
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
    #[validate(range(min = 0, message = "price must not be negative"))]
    pub price: i64,
    #[validate(range(min = 0, message = "stock must not be negative"))]
    #[serde(default)]
    pub stock: i32,
    #[serde(default)]
    pub category_id: Option<i32>,
}

/// One purchase line of a checkout request. Not persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutItem {
    pub product_id: i32,
    pub quantity: i32,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub items: Vec<CheckoutItem>,
}

/// A sold line. Name, description and price are snapshots taken at checkout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TransactionDetail {
    pub id: i32,
    pub transaction_id: i32,
    pub product_id: i32,
    pub product_name: String,
    pub product_description: String,
    pub unit_price: i64,
    pub quantity: i32,
    pub subtotal: i64,
}

/// A recorded sale. Immutable once committed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i32,
    pub total_amount: i64,
    pub created_at: DateTime<Utc>,
    pub details: Vec<TransactionDetail>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopProduct {
    pub name: String,
    pub quantity_sold: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_revenue: i64,
    pub total_transactions: i64,
    pub top_product: Option<TopProduct>,
}

/// Quantity sold per product name inside a report window.
#[derive(Clone, Debug, PartialEq, Eq, sqlx::FromRow)]
pub struct ProductQuantity {
    pub product_name: String,
    pub quantity: i64,
}

/// Raw aggregates of one report window, read from a single snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WindowTotals {
    pub revenue: i64,
    pub transaction_count: i64,
    pub quantities: Vec<ProductQuantity>,
}

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("timed out waiting for lock on product {0}")]
    LockTimeout(i32),

    #[error("deadlock detected waiting for lock on product {0}")]
    Deadlock(i32),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                StoreError::Constraint(db.message().to_string())
            }
            _ => StoreError::Database(err),
        }
    }
}

#[derive(Error, Debug)]
pub enum CheckoutError {
    #[error("checkout items required")]
    EmptyItems,

    #[error("invalid checkout item at position {index}: product_id={product_id}, quantity={quantity}")]
    InvalidItem {
        index: usize,
        product_id: i32,
        quantity: i32,
    },

    #[error("product {product_id} not found")]
    ProductNotFound { product_id: i32 },

    #[error("insufficient stock for {name} (product {product_id}): requested {requested}, available {available}")]
    InsufficientStock {
        product_id: i32,
        name: String,
        requested: i32,
        available: i32,
    },

    #[error("amount overflow for product {product_id}")]
    AmountOverflow { product_id: i32 },

    #[error("checkout failed: {0}")]
    Infrastructure(#[from] StoreError),
}

impl CheckoutError {
    /// Business errors are deterministic and caller-facing; everything else is
    /// an infrastructure fault the caller may retry.
    pub fn is_business(&self) -> bool {
        !matches!(self, CheckoutError::Infrastructure(_))
    }
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i32 },

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
