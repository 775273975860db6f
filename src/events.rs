//! Emitted facts: exchange fills, retail customer sales, and the event
//! enum fanned out to observers.
//!
//! [`Transaction`] is recorded for each match between a buy and a sell.
//! [`CustomerSale`] is recorded when a simulated customer buys from an
//! outlet's inventory.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;

use crate::types::{DonutTypeId, OrderId, OutletId, SaleId, TransactionId};

/// A single quantity match between two orders at the resting order's price.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub buyer_outlet_id: OutletId,
    pub seller_outlet_id: OutletId,
    pub donut_type_id: DonutTypeId,
    pub quantity: u32,
    pub price_per_unit: Decimal,
    pub total_amount: Decimal,
    pub executed_at: NaiveDateTime,
}

/// A retail sale out of an outlet's inventory, priced off the base donut
/// price plus the outlet's margin.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct CustomerSale {
    pub id: SaleId,
    pub outlet_id: OutletId,
    pub donut_type_id: DonutTypeId,
    pub quantity: u32,
    pub cost_basis: Decimal,
    pub revenue: Decimal,
    pub profit: Decimal,
    pub executed_at: NaiveDateTime,
}

/// Per-outlet sales counters, split by channel.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct SalesStats {
    pub customer_sales_revenue: Decimal,
    pub customer_sales_count: u64,
    pub exchange_sales_revenue: Decimal,
    pub exchange_sales_count: u64,
}

/// Stats view returned for one outlet, including net profit against the
/// configured initial balance.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct OutletStats {
    pub outlet_id: OutletId,
    pub name: String,
    pub balance: Decimal,
    pub net_profit: Decimal,
    pub sales: SalesStats,
}

/// Domain event fanned out to registered sinks.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExchangeEvent {
    TradeExecuted(Transaction),
    BookUpdated { donut_type_id: DonutTypeId },
    CustomerPurchased(CustomerSale),
    Error { message: String, source: String },
}
