//! Autonomous market participants: supplier production, outlet purchasing,
//! and simulated retail customers.
//!
//! Each agent is a periodic tokio task driven by an interval tick and a
//! watch-channel stop signal. Agents are individually start/stop-able and
//! idempotent to double-start; stopping waits for any in-flight tick to
//! finish. Tick bodies are plain functions over the exchange handle so the
//! decision logic is testable with a seeded RNG.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::engine::Exchange;
use crate::types::{DonutTypeId, OrderRequest, Outlet, OutletId, Side};

type TickFn = Box<dyn FnMut() + Send>;

/// A periodic agent. [`Agent::start`] spawns the ticker; calling it again
/// while running is a no-op. [`Agent::stop`] signals shutdown and waits for
/// the in-flight tick to complete.
pub struct Agent {
    name: &'static str,
    period: Duration,
    make_tick: Box<dyn Fn() -> TickFn + Send + Sync>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Agent {
    fn new(
        name: &'static str,
        period: Duration,
        make_tick: Box<dyn Fn() -> TickFn + Send + Sync>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            name,
            period,
            make_tick,
            shutdown,
            task: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .expect("agent task")
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    /// Starts the ticker. No-op if already running.
    pub fn start(&self) {
        let mut slot = self.task.lock().expect("agent task");
        if slot.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            tracing::debug!(target: "agents", agent = self.name, "already running");
            return;
        }
        self.shutdown.send_replace(false);
        let mut stop_rx = self.shutdown.subscribe();
        let mut tick = (self.make_tick)();
        let name = self.name;
        let period = self.period;
        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(target: "agents", agent = name, "started");
            loop {
                tokio::select! {
                    _ = interval.tick() => tick(),
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!(target: "agents", agent = name, "stopped");
        }));
    }

    /// Stops the ticker and waits for it to wind down. No-op if not running.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let task = self.task.lock().expect("agent task").take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

/// Factory supply: each tick submits one sell order per product from the
/// sentinel outlet, quoting around the base price. Pauses while the
/// sentinel outlet is closed.
pub fn supplier(exchange: Arc<Exchange>) -> Agent {
    let period = exchange.config().supplier_tick;
    Agent::new(
        "supplier",
        period,
        Box::new(move || {
            let exchange = exchange.clone();
            let mut rng = StdRng::from_entropy();
            Box::new(move || supplier_tick(&exchange, &mut rng))
        }),
    )
}

/// Outlet restocking: each open retail outlet considers bidding at or just
/// above the best ask for each product, sized by what its cash can cover.
pub fn purchasing_agent(exchange: Arc<Exchange>) -> Agent {
    let period = exchange.config().purchaser_tick;
    Agent::new(
        "purchaser",
        period,
        Box::new(move || {
            let exchange = exchange.clone();
            let mut rng = StdRng::from_entropy();
            Box::new(move || purchaser_tick(&exchange, &mut rng))
        }),
    )
}

/// Retail demand: one simulated customer per tick walks a small shopping
/// list and buys out of outlet inventory.
pub fn customer_simulator(exchange: Arc<Exchange>) -> Agent {
    let period = exchange.config().customer_tick;
    Agent::new(
        "customer",
        period,
        Box::new(move || {
            let exchange = exchange.clone();
            let mut rng = StdRng::from_entropy();
            Box::new(move || customer_tick(&exchange, &mut rng))
        }),
    )
}

pub(crate) fn supplier_tick(exchange: &Exchange, rng: &mut impl Rng) {
    let cfg = exchange.config();
    let supplier_id = cfg.supplier_outlet_id.clone();
    match exchange.outlet(&supplier_id) {
        Some(o) if o.is_open => {}
        _ => return,
    }
    for donut in exchange.catalogue() {
        let quantity = rng.gen_range(cfg.supplier_qty_min..=cfg.supplier_qty_max.max(cfg.supplier_qty_min));
        let variance = cfg.supplier_price_variance_pct as i64;
        let pct = rng.gen_range(-variance..=variance);
        let price = (cfg.base_donut_price * Decimal::from(100 + pct) / Decimal::from(100)).round_dp(2);
        if price <= Decimal::ZERO {
            continue;
        }
        let request = OrderRequest {
            outlet_id: supplier_id.clone(),
            donut_type_id: donut.id.clone(),
            side: Side::Sell,
            quantity,
            price_per_unit: price,
        };
        if let Err(e) = exchange.submit_order(request) {
            tracing::warn!(target: "agents", agent = "supplier", product = %donut.id, "sell failed: {e}");
        }
    }
}

pub(crate) fn purchaser_tick(exchange: &Exchange, rng: &mut impl Rng) {
    let cfg = exchange.config();
    for outlet in exchange.retail_outlets() {
        if !outlet.is_open {
            continue;
        }
        for donut in exchange.catalogue() {
            if !rng.gen_bool(cfg.purchaser_buy_probability.clamp(0.0, 1.0)) {
                continue;
            }
            let Some(ask) = exchange.best_ask(&donut.id) else {
                continue;
            };
            let price = (ask + cfg.purchaser_price_step).round_dp(2);
            // Balance moves as earlier bids fill, so re-read it per order.
            let Some(current) = exchange.outlet(&outlet.id) else {
                continue;
            };
            let affordable = (current.balance / price)
                .floor()
                .to_u32()
                .unwrap_or(u32::MAX);
            if affordable == 0 {
                tracing::debug!(
                    target: "agents",
                    agent = "purchaser",
                    outlet = %outlet.id,
                    "insufficient balance, skipping"
                );
                continue;
            }
            let quantity = rng.gen_range(1..=cfg.purchaser_qty_max.max(1)).min(affordable);
            let request = OrderRequest {
                outlet_id: outlet.id.clone(),
                donut_type_id: donut.id.clone(),
                side: Side::Buy,
                quantity,
                price_per_unit: price,
            };
            if let Err(e) = exchange.submit_order(request) {
                tracing::warn!(target: "agents", agent = "purchaser", outlet = %outlet.id, "bid failed: {e}");
            }
        }
    }
}

/// How one simulated customer shops.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CustomerKind {
    /// Walk outlets in random order, buy from the first open one with stock.
    FirstFind,
    /// Buy wherever the margin-inclusive retail price is lowest.
    PriceHunter,
}

pub(crate) fn customer_tick(exchange: &Exchange, rng: &mut impl Rng) {
    let cfg = exchange.config();
    let mut products: Vec<DonutTypeId> =
        exchange.catalogue().into_iter().map(|d| d.id).collect();
    if products.is_empty() {
        return;
    }
    products.shuffle(rng);
    let basket = rng.gen_range(1..=cfg.customer_basket_max.max(1)) as usize;
    let basket = basket.min(products.len());
    let kind = if rng.gen_bool(0.5) {
        CustomerKind::FirstFind
    } else {
        CustomerKind::PriceHunter
    };

    for donut_type_id in &products[..basket] {
        let open_outlets: Vec<Outlet> = exchange
            .retail_outlets()
            .into_iter()
            .filter(|o| o.is_open)
            .collect();
        let picked: Option<(OutletId, u32)> = match kind {
            CustomerKind::FirstFind => {
                let mut shuffled = open_outlets;
                shuffled.shuffle(rng);
                shuffled.into_iter().find_map(|o| {
                    let stock = exchange.inventory(&o.id, donut_type_id);
                    (stock > 0).then(|| (o.id, stock))
                })
            }
            CustomerKind::PriceHunter => open_outlets
                .into_iter()
                .filter_map(|o| {
                    let stock = exchange.inventory(&o.id, donut_type_id);
                    (stock > 0).then(|| (o, stock))
                })
                .min_by_key(|(o, _)| {
                    cfg.base_donut_price
                        * (Decimal::ONE + o.margin_percent / Decimal::from(100))
                })
                .map(|(o, stock)| (o.id, stock)),
        };
        let Some((outlet_id, stock)) = picked else {
            continue;
        };
        let quantity = rng.gen_range(1..=cfg.customer_qty_max.max(1)).min(stock);
        if let Err(e) = exchange.sell_to_customer(&outlet_id, donut_type_id, quantity) {
            tracing::warn!(target: "agents", agent = "customer", outlet = %outlet_id, "purchase failed: {e}");
        }
    }
}
