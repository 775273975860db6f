//! Single-product order book: bids and asks, price-time priority.
//!
//! Each price level is FIFO by submission sequence; best bid is highest
//! price, best ask is lowest. Only Active / PartiallyFilled orders are
//! resident; the matcher peeks the best counterparty and commands
//! reductions and removals as fills settle.

use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};

use crate::types::{DonutTypeId, Order, OrderId, OutletId, Side};

/// One order at a price level, in time priority by submission sequence.
type LevelEntry = (OrderId, u64);
/// Price level -> FIFO queue of orders.
type PriceLevels = BTreeMap<Decimal, Vec<LevelEntry>>;

/// Resident-order bookkeeping for O(1) lookup on reduce/remove.
#[derive(Clone, Debug)]
struct Resident {
    side: Side,
    price: Decimal,
    remaining: u32,
    outlet_id: OutletId,
}

/// Best visible counterparty for an incoming order, as returned by
/// [`OrderBook::peek_best`]. Its price sets the execution price.
#[derive(Clone, Debug)]
pub struct BestQuote {
    pub order_id: OrderId,
    pub outlet_id: OutletId,
    pub price: Decimal,
    pub remaining: u32,
}

/// Single-product order book.
#[derive(Debug)]
pub struct OrderBook {
    donut_type_id: DonutTypeId,
    bids: PriceLevels,
    asks: PriceLevels,
    resident: HashMap<OrderId, Resident>,
}

impl OrderBook {
    pub fn new(donut_type_id: DonutTypeId) -> Self {
        Self {
            donut_type_id,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            resident: HashMap::new(),
        }
    }

    pub fn donut_type_id(&self) -> &DonutTypeId {
        &self.donut_type_id
    }

    /// Adds a non-terminal order to the book. Time priority within a price
    /// level follows the order's submission sequence, so callers must insert
    /// in ascending `seq` order (rehydration sorts by `seq` first).
    pub fn insert(&mut self, order: &Order) {
        let levels = match order.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        levels
            .entry(order.price_per_unit)
            .or_default()
            .push((order.id.clone(), order.seq));
        self.resident.insert(
            order.id.clone(),
            Resident {
                side: order.side,
                price: order.price_per_unit,
                remaining: order.remaining,
                outlet_id: order.outlet_id.clone(),
            },
        );
    }

    /// Best resting order on `side`, skipping orders owned by `exclude`
    /// (self-trade prevention). Skipped orders keep their place in the
    /// queue; they are only passed over for this lookup.
    pub fn peek_best(&self, side: Side, exclude: &OutletId) -> Option<BestQuote> {
        let scan = |queue: &Vec<LevelEntry>, price: Decimal| -> Option<BestQuote> {
            for (order_id, _) in queue {
                let r = &self.resident[order_id];
                if &r.outlet_id != exclude {
                    return Some(BestQuote {
                        order_id: order_id.clone(),
                        outlet_id: r.outlet_id.clone(),
                        price,
                        remaining: r.remaining,
                    });
                }
            }
            None
        };
        match side {
            Side::Sell => self
                .asks
                .iter()
                .find_map(|(price, queue)| scan(queue, *price)),
            Side::Buy => self
                .bids
                .iter()
                .rev()
                .find_map(|(price, queue)| scan(queue, *price)),
        }
    }

    /// Lowers a resting order's remaining quantity after a partial fill.
    pub fn reduce_qty(&mut self, order_id: &OrderId, new_remaining: u32) {
        if let Some(r) = self.resident.get_mut(order_id) {
            r.remaining = new_remaining;
        }
    }

    /// Removes an order (filled or cancelled). Returns true if it was resident.
    pub fn remove(&mut self, order_id: &OrderId) -> bool {
        let Some(r) = self.resident.remove(order_id) else {
            return false;
        };
        let levels = match r.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        if let Some(queue) = levels.get_mut(&r.price) {
            queue.retain(|(id, _)| id != order_id);
            if queue.is_empty() {
                levels.remove(&r.price);
            }
        }
        true
    }

    /// Best bid price (None if empty).
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().copied()
    }

    /// Best ask price (None if empty).
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().copied()
    }

    pub fn is_resident(&self, order_id: &OrderId) -> bool {
        self.resident.contains_key(order_id)
    }

    /// Resident order ids on `side` in book order: best price first, then
    /// submission sequence within each level.
    pub fn side_order_ids(&self, side: Side) -> Vec<OrderId> {
        let collect = |levels: Vec<&Vec<LevelEntry>>| -> Vec<OrderId> {
            levels
                .into_iter()
                .flat_map(|queue| queue.iter().map(|(id, _)| id.clone()))
                .collect()
        };
        match side {
            Side::Buy => collect(self.bids.values().rev().collect()),
            Side::Sell => collect(self.asks.values().collect()),
        }
    }
}
