//! Value Objects for sales

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Money value object, in the smallest currency unit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(i64);

impl Money {
    pub fn new(amount: i64) -> Self { Self(amount) }
    pub fn amount(&self) -> i64 { self.0 }
    pub fn checked_add(&self, other: Money) -> Result<Money, MoneyError> {
        self.0.checked_add(other.0).map(Money).ok_or(MoneyError::Overflow)
    }
    pub fn checked_multiply(&self, qty: Quantity) -> Result<Money, MoneyError> {
        self.0.checked_mul(i64::from(qty.value())).map(Money).ok_or(MoneyError::Overflow)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum MoneyError { Overflow }
impl std::error::Error for MoneyError {}
impl fmt::Display for MoneyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Amount overflow") }
}

/// Strictly positive purchase quantity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quantity(i32);

impl Quantity {
    pub fn new(value: i32) -> Option<Self> {
        if value > 0 { Some(Self(value)) } else { None }
    }
    pub fn value(&self) -> i32 { self.0 }
}

/// Half-open UTC interval `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReportWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl ReportWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self { Self { start, end } }

    /// Midnight of `day` up to, but excluding, the following midnight. On the
    /// last representable day the window runs to the latest instant.
    pub fn day(day: NaiveDate) -> Self {
        let start = midnight(day);
        Self { start, end: next_midnight(day).unwrap_or(DateTime::<Utc>::MAX_UTC) }
    }

    /// Both calendar dates inclusive. `None` when the midnight after `last`
    /// is not representable.
    pub fn dates(first: NaiveDate, last: NaiveDate) -> Option<Self> {
        Some(Self { start: midnight(first), end: next_midnight(last)? })
    }

    pub fn start(&self) -> DateTime<Utc> { self.start }
    pub fn end(&self) -> DateTime<Utc> { self.end }
}

fn midnight(day: NaiveDate) -> DateTime<Utc> { day.and_time(NaiveTime::MIN).and_utc() }

fn next_midnight(day: NaiveDate) -> Option<DateTime<Utc>> { midnight(day).checked_add_signed(Duration::days(1)) }
