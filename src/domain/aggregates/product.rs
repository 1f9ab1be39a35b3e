//! Product stock aggregate, as seen under an exclusive row lock

use crate::domain::value_objects::{Money, Quantity};

/// A product row held under the current unit of work's exclusive lock.
///
/// `description` is the category description the sale line snapshots.
#[derive(Clone, Debug, PartialEq, Eq, sqlx::FromRow)]
pub struct LockedProduct {
    pub id: i32,
    pub name: String,
    pub price: i64,
    pub stock: i32,
    pub description: String,
}

impl LockedProduct {
    pub fn unit_price(&self) -> Money { Money::new(self.price) }

    /// Removes `qty` from stock, leaving it untouched when not enough is left.
    pub fn take_stock(&mut self, qty: Quantity) -> Result<i32, ProductError> {
        if self.stock < qty.value() {
            return Err(ProductError::InsufficientStock { available: self.stock });
        }
        self.stock -= qty.value();
        Ok(self.stock)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum ProductError { InsufficientStock { available: i32 } }
impl std::error::Error for ProductError {}
impl std::fmt::Display for ProductError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self { Self::InsufficientStock { available } => write!(f, "Insufficient stock ({} available)", available) }
    }
}
