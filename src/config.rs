//! Runtime configuration, read from environment variables with defaults.
//!
//! Every knob has a default that produces a sensible simulation out of the
//! box; set the corresponding env var to override.

use std::env;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::types::OutletId;

/// All configuration for the exchange and its agents.
#[derive(Clone, Debug)]
pub struct ExchangeConfig {
    /// Cost basis per donut for retail customer sales (`BASE_DONUT_PRICE`).
    pub base_donut_price: Decimal,
    /// Baseline for net-profit calculation (`INITIAL_OUTLET_BALANCE`).
    pub initial_outlet_balance: Decimal,
    /// Sentinel outlet excluded from leaderboards (`SUPPLIER_OUTLET_ID`).
    pub supplier_outlet_id: OutletId,
    /// Margin applied to new outlets (`DEFAULT_MARGIN_PERCENT`).
    pub default_margin_percent: Decimal,

    /// Agent periods (`SUPPLIER_TICK_MS`, `PURCHASER_TICK_MS`, `CUSTOMER_TICK_MS`).
    pub supplier_tick: Duration,
    pub purchaser_tick: Duration,
    pub customer_tick: Duration,

    /// Supplier sell size range per product per tick.
    pub supplier_qty_min: u32,
    pub supplier_qty_max: u32,
    /// Supplier quote variance around the base price, in whole percent.
    pub supplier_price_variance_pct: u32,

    /// Purchasing agent bid size cap and aggression.
    pub purchaser_qty_max: u32,
    /// Added on top of the best ask when bidding.
    pub purchaser_price_step: Decimal,
    /// Probability an outlet bids for a given product on a tick.
    pub purchaser_buy_probability: f64,

    /// Customer basket: number of distinct products and units per product.
    pub customer_basket_max: u32,
    pub customer_qty_max: u32,

    /// Event fan-out buffer per sink subscription (`EVENT_BUFFER`).
    pub event_buffer: usize,

    /// Durable store location (`STORE_PATH`).
    pub store_path: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_donut_price: Decimal::from(2),
            initial_outlet_balance: Decimal::from(10_000),
            supplier_outlet_id: OutletId("supplier-factory".to_string()),
            default_margin_percent: Decimal::from(25),
            supplier_tick: Duration::from_millis(5000),
            purchaser_tick: Duration::from_millis(4000),
            customer_tick: Duration::from_millis(2000),
            supplier_qty_min: 5,
            supplier_qty_max: 20,
            supplier_price_variance_pct: 10,
            purchaser_qty_max: 10,
            purchaser_price_step: Decimal::new(5, 2),
            purchaser_buy_probability: 0.4,
            customer_basket_max: 3,
            customer_qty_max: 3,
            event_buffer: 256,
            store_path: "donut-exchange.json".to_string(),
        }
    }
}

fn var_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn var_millis(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

impl ExchangeConfig {
    /// Loads configuration from the environment, falling back to defaults.
    pub fn load() -> Self {
        let d = Self::default();
        Self {
            base_donut_price: var_parsed("BASE_DONUT_PRICE", d.base_donut_price),
            initial_outlet_balance: var_parsed("INITIAL_OUTLET_BALANCE", d.initial_outlet_balance),
            supplier_outlet_id: env::var("SUPPLIER_OUTLET_ID")
                .map(OutletId)
                .unwrap_or(d.supplier_outlet_id),
            default_margin_percent: var_parsed("DEFAULT_MARGIN_PERCENT", d.default_margin_percent),
            supplier_tick: var_millis("SUPPLIER_TICK_MS", d.supplier_tick),
            purchaser_tick: var_millis("PURCHASER_TICK_MS", d.purchaser_tick),
            customer_tick: var_millis("CUSTOMER_TICK_MS", d.customer_tick),
            supplier_qty_min: var_parsed("SUPPLIER_QTY_MIN", d.supplier_qty_min),
            supplier_qty_max: var_parsed("SUPPLIER_QTY_MAX", d.supplier_qty_max),
            supplier_price_variance_pct: var_parsed(
                "SUPPLIER_PRICE_VARIANCE_PCT",
                d.supplier_price_variance_pct,
            ),
            purchaser_qty_max: var_parsed("PURCHASER_QTY_MAX", d.purchaser_qty_max),
            purchaser_price_step: var_parsed("PURCHASER_PRICE_STEP", d.purchaser_price_step),
            purchaser_buy_probability: var_parsed(
                "PURCHASER_BUY_PROBABILITY",
                d.purchaser_buy_probability,
            ),
            customer_basket_max: var_parsed("CUSTOMER_BASKET_MAX", d.customer_basket_max),
            customer_qty_max: var_parsed("CUSTOMER_QTY_MAX", d.customer_qty_max),
            event_buffer: var_parsed("EVENT_BUFFER", d.event_buffer),
            store_path: env::var("STORE_PATH").unwrap_or(d.store_path),
        }
    }
}
