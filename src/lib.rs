//! # Donut Exchange
//!
//! Simulated commodity exchange for donuts: a price-time priority
//! continuous double-auction matching core, the per-outlet cash and
//! inventory ledger it drives, and periodic agents (supplier production,
//! outlet purchasing, retail customer demand) that generate order flow and
//! consume inventory.
//!
//! ## Entry point
//!
//! Use [`Exchange`] as the single entry point: create with
//! [`Exchange::new`] (rehydrates from the [`Store`]), then
//! [`Exchange::submit_order`] and [`Exchange::sell_to_customer`]. Register
//! observers through [`Exchange::broadcaster`]; start the market with the
//! agents in [`agents`].
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use donut_exchange::{
//!     DonutType, Exchange, ExchangeConfig, JsonStore, OrderRequest, OrderStatus, Outlet, Side,
//!     Store,
//! };
//! use rust_decimal::Decimal;
//!
//! let store = Arc::new(JsonStore::in_memory());
//! let now = chrono::Local::now().naive_local();
//! for id in ["supplier-factory", "downtown"] {
//!     store
//!         .insert_outlet(&Outlet {
//!             id: id.into(),
//!             name: id.to_string(),
//!             location: "Springfield".to_string(),
//!             balance: Decimal::from(10_000),
//!             margin_percent: Decimal::from(25),
//!             is_open: true,
//!             created_at: now,
//!         })
//!         .unwrap();
//! }
//! let catalogue = vec![DonutType {
//!     id: "glazed".into(),
//!     name: "Glazed".to_string(),
//!     description: "The classic".to_string(),
//! }];
//! let exchange = Exchange::new(store, catalogue, ExchangeConfig::default()).unwrap();
//!
//! let ask = exchange
//!     .submit_order(OrderRequest {
//!         outlet_id: "supplier-factory".into(),
//!         donut_type_id: "glazed".into(),
//!         side: Side::Sell,
//!         quantity: 10,
//!         price_per_unit: Decimal::from(2),
//!     })
//!     .unwrap();
//! assert_eq!(ask.status, OrderStatus::Active);
//!
//! let bid = exchange
//!     .submit_order(OrderRequest {
//!         outlet_id: "downtown".into(),
//!         donut_type_id: "glazed".into(),
//!         side: Side::Buy,
//!         quantity: 4,
//!         price_per_unit: Decimal::from(2),
//!     })
//!     .unwrap();
//! assert_eq!(bid.status, OrderStatus::Filled);
//! assert_eq!(exchange.inventory(&"downtown".into(), &"glazed".into()), 4);
//! ```

pub mod agents;
pub mod broadcast;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod ledger;
pub mod matching;
pub mod order_book;
pub mod store;
pub mod types;

pub use broadcast::{Broadcaster, CollectingSink, EventSink, LoggingSink};
pub use config::ExchangeConfig;
pub use engine::Exchange;
pub use error::ExchangeError;
pub use events::{CustomerSale, ExchangeEvent, OutletStats, SalesStats, Transaction};
pub use store::{JsonStore, Store};
pub use types::{
    DonutType, DonutTypeId, Order, OrderBookSnapshot, OrderId, OrderRequest, OrderStatus, Outlet,
    OutletId, SaleId, Side, TransactionId,
};
