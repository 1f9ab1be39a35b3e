//! Aggregates module
pub mod product;
pub mod sale;

pub use product::{LockedProduct, ProductError};
pub use sale::Sale;
