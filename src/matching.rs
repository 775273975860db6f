//! Price-time priority matching.
//!
//! [`match_order`] runs one order against its product's book: walks the best
//! counterparties, settles each fill through the ledger, and rests the
//! remainder. The resting order's price always sets the execution price, so
//! takers who over-quote get price improvement and resting quotes honour
//! their posted price.

use chrono::NaiveDateTime;
use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::events::Transaction;
use crate::ledger::Ledger;
use crate::order_book::OrderBook;
use crate::types::{Order, OrderId, OrderStatus, Side, TransactionId};

/// Result of one matching run.
#[derive(Debug, Default)]
pub struct MatchOutcome {
    /// Fills in execution order.
    pub transactions: Vec<Transaction>,
    /// Resting orders whose remaining quantity or status changed.
    pub touched: Vec<OrderId>,
    /// Settlement aborts, reported through the event stream with source
    /// "matcher". Not surfaced to the submitting caller.
    pub errors: Vec<String>,
}

/// A buy at `p_b` crosses an ask at `p_a` iff `p_b >= p_a`; symmetric for sells.
fn crosses(incoming_side: Side, incoming_price: Decimal, resting_price: Decimal) -> bool {
    match incoming_side {
        Side::Buy => incoming_price >= resting_price,
        Side::Sell => incoming_price <= resting_price,
    }
}

/// Runs matching for `incoming` against `book`. Settlement is delegated to
/// the ledger per computed slice: settle or abort the whole slice, never a
/// partial unit.
///
/// A buyer that cannot cover a slice is cancelled: if that buyer is the
/// incoming order matching stops; if it is an aged resting bid, the bid is
/// removed and matching continues against the next counterparty. Either
/// way no transaction is recorded for the aborted slice.
///
/// The caller inserts `incoming` into the book afterwards if it remains
/// non-terminal with quantity left.
pub fn match_order(
    book: &mut OrderBook,
    ledger: &mut Ledger,
    orders: &mut HashMap<OrderId, Order>,
    incoming: &mut Order,
    next_transaction_id: &mut u64,
    now: NaiveDateTime,
) -> MatchOutcome {
    let mut outcome = MatchOutcome::default();

    while incoming.remaining > 0 {
        let Some(best) = book.peek_best(incoming.side.opposite(), &incoming.outlet_id) else {
            break;
        };
        if !crosses(incoming.side, incoming.price_per_unit, best.price) {
            break;
        }

        let fill_qty = incoming.remaining.min(best.remaining);
        let fill_price = best.price;
        let (buyer_outlet, seller_outlet, buy_order_id, sell_order_id) = match incoming.side {
            Side::Buy => (
                incoming.outlet_id.clone(),
                best.outlet_id.clone(),
                incoming.id.clone(),
                best.order_id.clone(),
            ),
            Side::Sell => (
                best.outlet_id.clone(),
                incoming.outlet_id.clone(),
                best.order_id.clone(),
                incoming.id.clone(),
            ),
        };

        match ledger.settle_fill(
            &buyer_outlet,
            &seller_outlet,
            &incoming.donut_type_id,
            fill_qty,
            fill_price,
        ) {
            Ok(total_amount) => {
                incoming.remaining -= fill_qty;
                incoming.status = if incoming.remaining == 0 {
                    OrderStatus::Filled
                } else {
                    OrderStatus::PartiallyFilled
                };
                incoming.updated_at = now;

                let resting_remaining = best.remaining - fill_qty;
                if resting_remaining == 0 {
                    book.remove(&best.order_id);
                } else {
                    book.reduce_qty(&best.order_id, resting_remaining);
                }
                if let Some(resting) = orders.get_mut(&best.order_id) {
                    resting.remaining = resting_remaining;
                    resting.status = if resting_remaining == 0 {
                        OrderStatus::Filled
                    } else {
                        OrderStatus::PartiallyFilled
                    };
                    resting.updated_at = now;
                }
                outcome.touched.push(best.order_id.clone());

                let id = TransactionId(format!("txn-{}", *next_transaction_id));
                *next_transaction_id += 1;
                outcome.transactions.push(Transaction {
                    id,
                    buy_order_id,
                    sell_order_id,
                    buyer_outlet_id: buyer_outlet,
                    seller_outlet_id: seller_outlet,
                    donut_type_id: incoming.donut_type_id.clone(),
                    quantity: fill_qty,
                    price_per_unit: fill_price,
                    total_amount,
                    executed_at: now,
                });
            }
            Err(e) => match incoming.side {
                // Incoming buyer cannot cover the slice: cancel it and stop.
                Side::Buy => {
                    incoming.status = OrderStatus::Cancelled;
                    incoming.updated_at = now;
                    tracing::warn!(order = %incoming.id, "fill aborted, buy order cancelled: {e}");
                    outcome
                        .errors
                        .push(format!("fill aborted, buy order {} cancelled: {e}", incoming.id));
                    break;
                }
                // Aged resting bid cannot cover: cancel it, try the next one.
                Side::Sell => {
                    book.remove(&best.order_id);
                    if let Some(resting) = orders.get_mut(&best.order_id) {
                        resting.status = OrderStatus::Cancelled;
                        resting.updated_at = now;
                    }
                    outcome.touched.push(best.order_id.clone());
                    tracing::warn!(order = %best.order_id, "fill aborted, resting bid cancelled: {e}");
                    outcome
                        .errors
                        .push(format!("fill aborted, buy order {} cancelled: {e}", best.order_id));
                }
            },
        }
    }

    outcome
}
