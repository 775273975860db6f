//! Single-entry exchange facade.
//!
//! [`Exchange`] owns the books, the ledger, and the order history behind one
//! mutex: all matching and settlement for a submission happens inside that
//! critical section, with store writes mirrored write-through. Events are
//! pushed onto the broadcast ring inside the section (a non-blocking copy,
//! which keeps per-product event order equal to fill order); delivery to
//! sinks happens in their own forwarding tasks, so a slow observer can
//! never stall matching.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::broadcast::Broadcaster;
use crate::config::ExchangeConfig;
use crate::error::ExchangeError;
use crate::events::{CustomerSale, ExchangeEvent, OutletStats, Transaction};
use crate::ledger::Ledger;
use crate::matching::match_order;
use crate::order_book::OrderBook;
use crate::store::Store;
use crate::types::{
    DonutType, DonutTypeId, Order, OrderBookSnapshot, OrderId, OrderRequest, OrderStatus, Outlet,
    OutletId, SaleId, Side,
};

/// Delay before the single retry of a failed store write.
const STORE_RETRY_DELAY: Duration = Duration::from_millis(50);

fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

fn id_suffix(id: &str) -> Option<u64> {
    id.rsplit_once('-').and_then(|(_, n)| n.parse().ok())
}

/// Mutable exchange state guarded by the engine mutex.
struct Core {
    ledger: Ledger,
    books: HashMap<DonutTypeId, OrderBook>,
    /// Every order ever submitted; orders are never deleted.
    orders: HashMap<OrderId, Order>,
    catalogue: BTreeMap<DonutTypeId, DonutType>,
    next_order: u64,
    next_transaction: u64,
    next_sale: u64,
    next_seq: u64,
}

/// The exchange engine. Create with [`Exchange::new`], which rehydrates
/// state from the store; a rehydration failure aborts boot.
pub struct Exchange {
    core: Mutex<Core>,
    store: Arc<dyn Store>,
    broadcaster: Broadcaster,
    config: ExchangeConfig,
}

impl Exchange {
    pub fn new(
        store: Arc<dyn Store>,
        catalogue: Vec<DonutType>,
        config: ExchangeConfig,
    ) -> Result<Self, ExchangeError> {
        let mut ledger = Ledger::new(
            config.supplier_outlet_id.clone(),
            config.base_donut_price,
            config.initial_outlet_balance,
        );

        for outlet in store.find_all_outlets()? {
            ledger.insert_outlet(outlet);
        }
        for (outlet_id, donut_type_id, qty) in store.load_all_inventory()? {
            if ledger.contains_outlet(&outlet_id) {
                ledger.set_inventory(&outlet_id, &donut_type_id, qty)?;
            } else {
                tracing::warn!(outlet = %outlet_id, "dropping inventory row for unknown outlet");
            }
        }
        let mut next_sale = 1;
        for (outlet_id, revenue, count) in store.aggregate_customer_sales_by_outlet()? {
            ledger.restore_customer_stats(&outlet_id, revenue, count);
            next_sale += count;
        }
        let mut next_transaction = 1;
        for txn in store.find_recent_transactions(usize::MAX)? {
            ledger.restore_exchange_sale(&txn.seller_outlet_id, txn.total_amount);
            if let Some(n) = id_suffix(&txn.id.0) {
                next_transaction = next_transaction.max(n + 1);
            }
        }

        let catalogue: BTreeMap<DonutTypeId, DonutType> =
            catalogue.into_iter().map(|d| (d.id.clone(), d)).collect();
        let mut books = HashMap::new();
        let mut orders = HashMap::new();
        let mut next_order = 1;
        let mut next_seq = 1;
        for donut_type_id in catalogue.keys() {
            let book = books
                .entry(donut_type_id.clone())
                .or_insert_with(|| OrderBook::new(donut_type_id.clone()));
            // Ascending by seq, so book insertion preserves time priority.
            for order in store.order_book(donut_type_id, true)? {
                if !order.is_terminal() {
                    book.insert(&order);
                }
                if let Some(n) = id_suffix(&order.id.0) {
                    next_order = next_order.max(n + 1);
                }
                next_seq = next_seq.max(order.seq + 1);
                orders.insert(order.id.clone(), order);
            }
        }

        Ok(Self {
            core: Mutex::new(Core {
                ledger,
                books,
                orders,
                catalogue,
                next_order,
                next_transaction,
                next_sale,
                next_seq,
            }),
            store,
            broadcaster: Broadcaster::new(config.event_buffer),
            config,
        })
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    /// Places an order, runs matching, settles fills, and persists the
    /// outcome. Returns the order in its final status; the caller must not
    /// retry a successful submission.
    pub fn submit_order(&self, request: OrderRequest) -> Result<Order, ExchangeError> {
        let order = {
            let mut guard = self.core.lock().expect("engine lock");
            let core = &mut *guard;
            let mut events: Vec<ExchangeEvent> = Vec::new();

            let outlet = core
                .ledger
                .outlet(&request.outlet_id)
                .ok_or_else(|| ExchangeError::UnknownOutlet(request.outlet_id.clone()))?;
            if !outlet.is_open {
                return Err(ExchangeError::OutletClosed(request.outlet_id));
            }
            if !core.catalogue.contains_key(&request.donut_type_id) {
                return Err(ExchangeError::UnknownDonutType(request.donut_type_id));
            }
            if request.quantity == 0 {
                return Err(ExchangeError::InvalidQuantity);
            }
            if request.price_per_unit <= Decimal::ZERO {
                return Err(ExchangeError::InvalidPrice);
            }

            let timestamp = now();
            let seq = core.next_seq;
            core.next_seq += 1;
            let id = OrderId(format!("order-{}", core.next_order));
            core.next_order += 1;
            let mut order = Order {
                id,
                outlet_id: request.outlet_id,
                donut_type_id: request.donut_type_id.clone(),
                side: request.side,
                quantity: request.quantity,
                remaining: request.quantity,
                price_per_unit: request.price_per_unit,
                status: OrderStatus::Active,
                seq,
                created_at: timestamp,
                updated_at: timestamp,
            };
            self.persist(&mut events, "insert order", || {
                self.store.insert_order(&order)
            });

            let book = core
                .books
                .entry(request.donut_type_id.clone())
                .or_insert_with(|| OrderBook::new(request.donut_type_id.clone()));
            let outcome = match_order(
                book,
                &mut core.ledger,
                &mut core.orders,
                &mut order,
                &mut core.next_transaction,
                timestamp,
            );
            if !order.is_terminal() && order.remaining > 0 {
                book.insert(&order);
            }
            core.orders.insert(order.id.clone(), order.clone());

            for txn in &outcome.transactions {
                self.persist(&mut events, "insert transaction", || {
                    self.store.insert_transaction(txn)
                });
                for outlet_id in [&txn.buyer_outlet_id, &txn.seller_outlet_id] {
                    if let Some(o) = core.ledger.outlet(outlet_id) {
                        let balance = o.balance;
                        self.persist(&mut events, "update balance", || {
                            self.store.update_balance(outlet_id, balance)
                        });
                    }
                }
                let buyer_inventory = core
                    .ledger
                    .inventory(&txn.buyer_outlet_id, &txn.donut_type_id);
                self.persist(&mut events, "update inventory", || {
                    self.store.set_inventory(
                        &txn.buyer_outlet_id,
                        &txn.donut_type_id,
                        buyer_inventory,
                    )
                });
            }
            for order_id in outcome.touched.iter().chain(std::iter::once(&order.id)) {
                if let Some(o) = core.orders.get(order_id) {
                    let (remaining, status, updated_at) = (o.remaining, o.status, o.updated_at);
                    self.persist(&mut events, "update order", || {
                        self.store
                            .update_order_quantity(order_id, remaining, updated_at)?;
                        self.store.update_order_status(order_id, status, updated_at)
                    });
                }
            }

            for txn in outcome.transactions {
                events.push(ExchangeEvent::TradeExecuted(txn));
                events.push(ExchangeEvent::BookUpdated {
                    donut_type_id: request.donut_type_id.clone(),
                });
            }
            if events
                .iter()
                .all(|e| !matches!(e, ExchangeEvent::BookUpdated { .. }))
            {
                events.push(ExchangeEvent::BookUpdated {
                    donut_type_id: request.donut_type_id.clone(),
                });
            }
            for message in outcome.errors {
                events.push(ExchangeEvent::Error {
                    message,
                    source: "matcher".to_string(),
                });
            }
            self.emit_all(events);
            order
        };
        Ok(order)
    }

    /// Cancels a resting order outright (whole order, no amendment).
    pub fn cancel_order(&self, order_id: &OrderId) -> Result<Order, ExchangeError> {
        let order = {
            let mut guard = self.core.lock().expect("engine lock");
            let core = &mut *guard;
            let mut events = Vec::new();
            let order = core
                .orders
                .get_mut(order_id)
                .ok_or_else(|| ExchangeError::OrderNotFound(order_id.clone()))?;
            if order.is_terminal() {
                return Err(ExchangeError::OrderNotActive(order_id.clone()));
            }
            order.status = OrderStatus::Cancelled;
            order.updated_at = now();
            let order = order.clone();
            if let Some(book) = core.books.get_mut(&order.donut_type_id) {
                book.remove(order_id);
            }
            self.persist(&mut events, "update order", || {
                self.store
                    .update_order_status(order_id, OrderStatus::Cancelled, order.updated_at)
            });
            events.push(ExchangeEvent::BookUpdated {
                donut_type_id: order.donut_type_id.clone(),
            });
            self.emit_all(events);
            order
        };
        Ok(order)
    }

    /// Sells from an outlet's inventory to a retail customer at the
    /// outlet's margin over the base donut price. The sale stands in cash
    /// and inventory regardless of persistence outcome.
    pub fn sell_to_customer(
        &self,
        outlet_id: &OutletId,
        donut_type_id: &DonutTypeId,
        qty: u32,
    ) -> Result<CustomerSale, ExchangeError> {
        let sale = {
            let mut guard = self.core.lock().expect("engine lock");
            let core = &mut *guard;
            let mut events = Vec::new();
            if !core.catalogue.contains_key(donut_type_id) {
                return Err(ExchangeError::UnknownDonutType(donut_type_id.clone()));
            }
            let sale_id = SaleId(format!("sale-{}", core.next_sale));
            let sale =
                core.ledger
                    .sell_to_customer(sale_id, outlet_id, donut_type_id, qty, now())?;
            core.next_sale += 1;

            self.persist(&mut events, "insert customer sale", || {
                self.store.insert_customer_sale(&sale)
            });
            if let Some(o) = core.ledger.outlet(outlet_id) {
                let balance = o.balance;
                self.persist(&mut events, "update balance", || {
                    self.store.update_balance(outlet_id, balance)
                });
            }
            let left = core.ledger.inventory(outlet_id, donut_type_id);
            self.persist(&mut events, "update inventory", || {
                self.store.set_inventory(outlet_id, donut_type_id, left)
            });
            events.push(ExchangeEvent::CustomerPurchased(sale.clone()));
            self.emit_all(events);
            sale
        };
        Ok(sale)
    }

    pub fn add_inventory(
        &self,
        outlet_id: &OutletId,
        donut_type_id: &DonutTypeId,
        qty: u32,
    ) -> Result<u32, ExchangeError> {
        self.inventory_op(outlet_id, donut_type_id, |ledger| {
            ledger.add_inventory(outlet_id, donut_type_id, qty)
        })
    }

    pub fn remove_inventory(
        &self,
        outlet_id: &OutletId,
        donut_type_id: &DonutTypeId,
        qty: u32,
    ) -> Result<u32, ExchangeError> {
        self.inventory_op(outlet_id, donut_type_id, |ledger| {
            ledger.remove_inventory(outlet_id, donut_type_id, qty)
        })
    }

    pub fn set_inventory(
        &self,
        outlet_id: &OutletId,
        donut_type_id: &DonutTypeId,
        qty: u32,
    ) -> Result<u32, ExchangeError> {
        self.inventory_op(outlet_id, donut_type_id, |ledger| {
            ledger.set_inventory(outlet_id, donut_type_id, qty).map(|_| qty)
        })
    }

    fn inventory_op(
        &self,
        outlet_id: &OutletId,
        donut_type_id: &DonutTypeId,
        op: impl FnOnce(&mut Ledger) -> Result<u32, ExchangeError>,
    ) -> Result<u32, ExchangeError> {
        let mut guard = self.core.lock().expect("engine lock");
        let core = &mut *guard;
        if !core.catalogue.contains_key(donut_type_id) {
            return Err(ExchangeError::UnknownDonutType(donut_type_id.clone()));
        }
        let level = op(&mut core.ledger)?;
        let mut events = Vec::new();
        self.persist(&mut events, "update inventory", || {
            self.store.set_inventory(outlet_id, donut_type_id, level)
        });
        self.emit_all(events);
        Ok(level)
    }

    pub fn set_margin(
        &self,
        outlet_id: &OutletId,
        margin_percent: Decimal,
    ) -> Result<(), ExchangeError> {
        let mut guard = self.core.lock().expect("engine lock");
        guard.ledger.set_margin(outlet_id, margin_percent)?;
        let mut events = Vec::new();
        self.persist(&mut events, "update margin", || {
            self.store.update_margin(outlet_id, margin_percent)
        });
        self.emit_all(events);
        Ok(())
    }

    pub fn set_open(&self, outlet_id: &OutletId, open: bool) -> Result<(), ExchangeError> {
        let mut guard = self.core.lock().expect("engine lock");
        guard.ledger.set_open(outlet_id, open)?;
        let mut events = Vec::new();
        self.persist(&mut events, "set open", || {
            self.store.set_open(outlet_id, open)
        });
        self.emit_all(events);
        Ok(())
    }

    pub fn set_all_open(&self, open: bool) {
        let mut guard = self.core.lock().expect("engine lock");
        guard.ledger.set_all_open(open);
        let mut events = Vec::new();
        self.persist(&mut events, "set all open", || self.store.set_all_open(open));
        self.emit_all(events);
    }

    pub fn catalogue(&self) -> Vec<DonutType> {
        let guard = self.core.lock().expect("engine lock");
        guard.catalogue.values().cloned().collect()
    }

    pub fn outlet(&self, id: &OutletId) -> Option<Outlet> {
        let guard = self.core.lock().expect("engine lock");
        guard.ledger.outlet(id).cloned()
    }

    /// Retail outlets: everything except the sentinel supplier.
    pub fn retail_outlets(&self) -> Vec<Outlet> {
        let guard = self.core.lock().expect("engine lock");
        guard.ledger.retail_outlets()
    }

    pub fn inventory(&self, outlet_id: &OutletId, donut_type_id: &DonutTypeId) -> u32 {
        let guard = self.core.lock().expect("engine lock");
        guard.ledger.inventory(outlet_id, donut_type_id)
    }

    pub fn best_bid(&self, donut_type_id: &DonutTypeId) -> Option<Decimal> {
        let guard = self.core.lock().expect("engine lock");
        guard.books.get(donut_type_id).and_then(|b| b.best_bid())
    }

    pub fn best_ask(&self, donut_type_id: &DonutTypeId) -> Option<Decimal> {
        let guard = self.core.lock().expect("engine lock");
        guard.books.get(donut_type_id).and_then(|b| b.best_ask())
    }

    pub fn find_order(&self, id: &OrderId) -> Option<Order> {
        let guard = self.core.lock().expect("engine lock");
        guard.orders.get(id).cloned()
    }

    pub fn stats(&self, outlet_id: &OutletId) -> Result<OutletStats, ExchangeError> {
        let guard = self.core.lock().expect("engine lock");
        guard.ledger.stats(outlet_id)
    }

    pub fn leaderboard(&self) -> Vec<OutletStats> {
        let guard = self.core.lock().expect("engine lock");
        guard.ledger.leaderboard()
    }

    pub fn recent_transactions(&self, limit: usize) -> Result<Vec<Transaction>, ExchangeError> {
        self.store.find_recent_transactions(limit)
    }

    /// Both sides of a product's book, best price first, time priority
    /// within a level. With `include_terminal`, filled and cancelled orders
    /// are appended after the resident ones in submission order.
    pub fn order_book_snapshot(
        &self,
        donut_type_id: &DonutTypeId,
        include_terminal: bool,
    ) -> Result<OrderBookSnapshot, ExchangeError> {
        let guard = self.core.lock().expect("engine lock");
        if !guard.catalogue.contains_key(donut_type_id) {
            return Err(ExchangeError::UnknownDonutType(donut_type_id.clone()));
        }
        let mut bids = Vec::new();
        let mut asks = Vec::new();
        if let Some(book) = guard.books.get(donut_type_id) {
            for (side, out) in [(Side::Buy, &mut bids), (Side::Sell, &mut asks)] {
                for id in book.side_order_ids(side) {
                    if let Some(order) = guard.orders.get(&id) {
                        out.push(order.clone());
                    }
                }
            }
        }
        if include_terminal {
            let mut terminal: Vec<&Order> = guard
                .orders
                .values()
                .filter(|o| &o.donut_type_id == donut_type_id && o.is_terminal())
                .collect();
            terminal.sort_by_key(|o| o.seq);
            for order in terminal {
                match order.side {
                    Side::Buy => bids.push(order.clone()),
                    Side::Sell => asks.push(order.clone()),
                }
            }
        }
        Ok(OrderBookSnapshot {
            donut_type_id: donut_type_id.clone(),
            bids,
            asks,
        })
    }

    /// Pushes events onto the broadcast ring. Safe inside the critical
    /// section: the push never blocks, sinks drain from their own tasks.
    fn emit_all(&self, events: Vec<ExchangeEvent>) {
        for event in events {
            self.broadcaster.emit(event);
        }
    }

    /// Runs a store write, retrying once after a short delay. A second
    /// failure is reported as an Error event and logged; the in-memory
    /// state is not rolled back.
    fn persist(
        &self,
        events: &mut Vec<ExchangeEvent>,
        what: &str,
        op: impl Fn() -> Result<(), ExchangeError>,
    ) {
        if op().is_ok() {
            return;
        }
        std::thread::sleep(STORE_RETRY_DELAY);
        if let Err(e) = op() {
            tracing::error!(target: "store", "{what} failed after retry: {e}");
            events.push(ExchangeEvent::Error {
                message: format!("{what} failed after retry: {e}"),
                source: "store".to_string(),
            });
        }
    }
}
