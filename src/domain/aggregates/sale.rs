//! Sale Aggregate
//!
//! Accumulates the lines of one checkout in request order. Each line copies
//! the product's name, description and price at the moment it was locked, so
//! later catalog edits never change a recorded sale.

use chrono::{DateTime, Utc};
use crate::domain::aggregates::product::LockedProduct;
use crate::domain::events::{DomainEvent, InventoryEvent, SaleEvent};
use crate::domain::value_objects::{Money, MoneyError, Quantity};
use crate::{Transaction, TransactionDetail};

#[derive(Clone, Debug, Default)]
pub struct Sale {
    lines: Vec<TransactionDetail>,
    total: Money,
    events: Vec<DomainEvent>,
}

impl Sale {
    pub fn new() -> Self { Self::default() }

    pub fn total(&self) -> Money { self.total }
    pub fn lines(&self) -> &[TransactionDetail] { &self.lines }

    /// Appends a line for `product`, whose stock has already been taken.
    pub fn add_line(&mut self, product: &LockedProduct, qty: Quantity) -> Result<Money, MoneyError> {
        let subtotal = product.unit_price().checked_multiply(qty)?;
        self.total = self.total.checked_add(subtotal)?;
        self.lines.push(TransactionDetail {
            id: 0,
            transaction_id: 0,
            product_id: product.id,
            product_name: product.name.clone(),
            product_description: product.description.clone(),
            unit_price: product.price,
            quantity: qty.value(),
            subtotal: subtotal.amount(),
        });
        self.raise_event(DomainEvent::Inventory(InventoryEvent::StockTaken {
            product_id: product.id,
            quantity: qty.value(),
            remaining: product.stock,
        }));
        Ok(subtotal)
    }

    /// Stamps every line with the persisted transaction id.
    pub fn assign_transaction(&mut self, transaction_id: i32) {
        for line in &mut self.lines { line.transaction_id = transaction_id; }
    }

    pub fn lines_mut(&mut self) -> &mut [TransactionDetail] { &mut self.lines }

    pub fn into_transaction(mut self, id: i32, created_at: DateTime<Utc>) -> (Transaction, Vec<DomainEvent>) {
        self.raise_event(DomainEvent::Sale(SaleEvent::Recorded {
            transaction_id: id,
            total_amount: self.total.amount(),
            lines: self.lines.len(),
        }));
        let transaction = Transaction { id, total_amount: self.total.amount(), created_at, details: self.lines };
        (transaction, self.events)
    }

    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
}
