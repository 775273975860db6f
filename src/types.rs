//! Core types and IDs for the exchange (outlets, donut catalogue, orders).
//!
//! All identifiers are newtype wrappers over the store's string keys.
//! [`Order`], [`Side`], and [`OrderStatus`] define the order message and
//! lifecycle.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;

/// Participant outlet identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct OutletId(pub String);

/// Donut product identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct DonutTypeId(pub String);

/// Exchange order identifier. Server-assigned, monotonic per submission.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct OrderId(pub String);

/// Fill / transaction identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TransactionId(pub String);

/// Retail customer sale identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SaleId(pub String);

impl std::fmt::Display for OutletId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for DonutTypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for OutletId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&str> for DonutTypeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Order side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The side a counterparty order must be on.
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Order lifecycle status. Filled and Cancelled are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OrderStatus {
    Active,
    PartiallyFilled,
    Filled,
    Cancelled,
}

impl OrderStatus {
    /// Terminal orders never return to the book.
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }
}

/// A participant on the exchange: cash balance, retail margin, open flag.
///
/// The sentinel supplier outlet trades like any other but is excluded from
/// retail listings and leaderboards.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Outlet {
    pub id: OutletId,
    pub name: String,
    pub location: String,
    pub balance: Decimal,
    pub margin_percent: Decimal,
    pub is_open: bool,
    pub created_at: NaiveDateTime,
}

/// A tradeable donut product from the static catalogue.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct DonutType {
    pub id: DonutTypeId,
    pub name: String,
    pub description: String,
}

/// Order message and book state.
///
/// `quantity` is the original submitted size and never changes; `remaining`
/// counts down as fills execute. `seq` is the monotonic submission counter
/// used as the authoritative time-priority tiebreaker; `created_at` is
/// wall-clock for display only.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub outlet_id: OutletId,
    pub donut_type_id: DonutTypeId,
    pub side: Side,
    pub quantity: u32,
    pub remaining: u32,
    pub price_per_unit: Decimal,
    pub status: OrderStatus,
    pub seq: u64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Order {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Quantity filled so far.
    pub fn filled(&self) -> u32 {
        self.quantity - self.remaining
    }
}

/// Client request to place an order. Ids and timestamps are server-assigned.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct OrderRequest {
    pub outlet_id: OutletId,
    pub donut_type_id: DonutTypeId,
    pub side: Side,
    pub quantity: u32,
    pub price_per_unit: Decimal,
}

/// Two-sided view of one product's book. Bids and asks are best-first.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct OrderBookSnapshot {
    pub donut_type_id: DonutTypeId,
    pub bids: Vec<Order>,
    pub asks: Vec<Order>,
}
