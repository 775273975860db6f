//! Buffered fan-out of domain events to registered sinks.
//!
//! Events go onto a broadcast ring; each registered [`EventSink`] gets its
//! own forwarding task and subscription, so a slow sink lags and drops its
//! oldest events without stalling the engine or the other sinks. A lagging
//! sink is told how much it missed via its error callback.

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::events::{CustomerSale, ExchangeEvent, Transaction};
use crate::types::DonutTypeId;

/// Observer callbacks, one per event kind. All default to no-ops so sinks
/// implement only what they care about.
pub trait EventSink: Send + Sync + 'static {
    fn on_trade(&self, _transaction: &Transaction) {}
    fn on_book_update(&self, _donut_type_id: &DonutTypeId) {}
    fn on_customer_purchase(&self, _sale: &CustomerSale) {}
    fn on_error(&self, _message: &str, _source: &str) {}
}

fn dispatch(sink: &dyn EventSink, event: &ExchangeEvent) {
    match event {
        ExchangeEvent::TradeExecuted(t) => sink.on_trade(t),
        ExchangeEvent::BookUpdated { donut_type_id } => sink.on_book_update(donut_type_id),
        ExchangeEvent::CustomerPurchased(s) => sink.on_customer_purchase(s),
        ExchangeEvent::Error { message, source } => sink.on_error(message, source),
    }
}

/// Best-effort event fan-out. Emission never blocks; delivery order is
/// preserved per subscription.
#[derive(Clone, Debug)]
pub struct Broadcaster {
    tx: broadcast::Sender<ExchangeEvent>,
}

impl Broadcaster {
    /// `buffer` is the per-subscription ring capacity; a sink further behind
    /// than this starts losing its oldest events.
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self { tx }
    }

    /// Emits an event to all current subscriptions. A send with no
    /// listeners is not an error.
    pub fn emit(&self, event: ExchangeEvent) {
        let _ = self.tx.send(event);
    }

    /// Raw subscription, for callers that want to drain events themselves.
    pub fn subscribe(&self) -> broadcast::Receiver<ExchangeEvent> {
        self.tx.subscribe()
    }

    /// Registers a sink: spawns a forwarding task that delivers every event
    /// to the sink's callbacks. Returns the task handle; the task ends when
    /// the broadcaster is dropped.
    pub fn register(&self, sink: std::sync::Arc<dyn EventSink>) -> JoinHandle<()> {
        let mut rx = self.tx.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => dispatch(sink.as_ref(), &event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        sink.on_error(
                            &format!("sink too slow, dropped {missed} oldest events"),
                            "broadcast",
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

/// Stores every delivered event for assertions in tests. Clone shares the
/// same backing buffer.
#[derive(Clone, Default)]
pub struct CollectingSink {
    events: std::sync::Arc<std::sync::Mutex<Vec<ExchangeEvent>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ExchangeEvent> {
        self.events.lock().expect("lock").clone()
    }

    pub fn clear(&self) {
        self.events.lock().expect("lock").clear();
    }

    fn push(&self, event: ExchangeEvent) {
        self.events.lock().expect("lock").push(event);
    }
}

impl EventSink for CollectingSink {
    fn on_trade(&self, transaction: &Transaction) {
        self.push(ExchangeEvent::TradeExecuted(transaction.clone()));
    }

    fn on_book_update(&self, donut_type_id: &DonutTypeId) {
        self.push(ExchangeEvent::BookUpdated {
            donut_type_id: donut_type_id.clone(),
        });
    }

    fn on_customer_purchase(&self, sale: &CustomerSale) {
        self.push(ExchangeEvent::CustomerPurchased(sale.clone()));
    }

    fn on_error(&self, message: &str, source: &str) {
        self.push(ExchangeEvent::Error {
            message: message.to_string(),
            source: source.to_string(),
        });
    }
}

/// Logs every event through `tracing` (the default local observer).
pub struct LoggingSink;

impl EventSink for LoggingSink {
    fn on_trade(&self, t: &Transaction) {
        tracing::info!(
            target: "events",
            txn = %t.id.0,
            product = %t.donut_type_id,
            qty = t.quantity,
            price = %t.price_per_unit,
            buyer = %t.buyer_outlet_id,
            seller = %t.seller_outlet_id,
            "trade executed"
        );
    }

    fn on_customer_purchase(&self, s: &CustomerSale) {
        tracing::info!(
            target: "events",
            sale = %s.id.0,
            outlet = %s.outlet_id,
            product = %s.donut_type_id,
            qty = s.quantity,
            revenue = %s.revenue,
            "customer purchase"
        );
    }

    fn on_error(&self, message: &str, source: &str) {
        tracing::warn!(target: "events", source, "{message}");
    }
}
