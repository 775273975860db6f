//! End-to-end exchange scenarios: matching, settlement, retail sales, and
//! event emission through the public facade.

use std::sync::Arc;

use rust_decimal::Decimal;

use donut_exchange::{
    CollectingSink, DonutType, Exchange, ExchangeConfig, ExchangeEvent, JsonStore, Order,
    OrderRequest, OrderStatus, Outlet, Side, Store,
};

fn catalogue() -> Vec<DonutType> {
    ["glazed", "chocolate"]
        .into_iter()
        .map(|id| DonutType {
            id: id.into(),
            name: id.to_string(),
            description: String::new(),
        })
        .collect()
}

fn outlet(id: &str, balance: i64, margin: i64) -> Outlet {
    Outlet {
        id: id.into(),
        name: id.to_string(),
        location: "test".to_string(),
        balance: Decimal::from(balance),
        margin_percent: Decimal::from(margin),
        is_open: true,
        created_at: chrono::Local::now().naive_local(),
    }
}

fn build_exchange(extra: &[(&str, i64, i64)]) -> (Arc<JsonStore>, Exchange) {
    let store = Arc::new(JsonStore::in_memory());
    store.insert_outlet(&outlet("supplier-factory", 10_000, 0)).unwrap();
    store.insert_outlet(&outlet("downtown", 10_000, 25)).unwrap();
    store.insert_outlet(&outlet("harbor", 10_000, 25)).unwrap();
    for (id, balance, margin) in extra {
        store.insert_outlet(&outlet(id, *balance, *margin)).unwrap();
    }
    let exchange = Exchange::new(store.clone(), catalogue(), ExchangeConfig::default()).unwrap();
    (store, exchange)
}

fn submit(ex: &Exchange, outlet: &str, side: Side, qty: u32, price: &str) -> Order {
    ex.submit_order(OrderRequest {
        outlet_id: outlet.into(),
        donut_type_id: "glazed".into(),
        side,
        quantity: qty,
        price_per_unit: price.parse().unwrap(),
    })
    .unwrap()
}

#[test]
fn simple_cross() {
    let (_, ex) = build_exchange(&[]);
    let mut rx = ex.broadcaster().subscribe();
    let ask = submit(&ex, "supplier-factory", Side::Sell, 10, "3.00");
    let _ = rx.try_recv(); // book update from the resting ask
    let bid = submit(&ex, "downtown", Side::Buy, 4, "3.00");

    assert_eq!(bid.status, OrderStatus::Filled);
    let ask = ex.find_order(&ask.id).unwrap();
    assert_eq!(ask.remaining, 6);
    assert_eq!(ask.status, OrderStatus::PartiallyFilled);

    let trade = rx.try_recv().unwrap();
    let ExchangeEvent::TradeExecuted(t) = trade else {
        panic!("expected trade first, got {trade:?}");
    };
    assert_eq!(t.quantity, 4);
    assert_eq!(t.price_per_unit, Decimal::from(3));
    assert!(matches!(
        rx.try_recv().unwrap(),
        ExchangeEvent::BookUpdated { .. }
    ));
    assert!(rx.try_recv().is_err(), "exactly one trade and one book update");
}

#[test]
fn price_improvement_resting_price_wins() {
    let (_, ex) = build_exchange(&[]);
    let ask = submit(&ex, "harbor", Side::Sell, 5, "2.50");
    let bid = submit(&ex, "downtown", Side::Buy, 5, "3.00");

    assert_eq!(bid.status, OrderStatus::Filled);
    assert_eq!(ex.find_order(&ask.id).unwrap().status, OrderStatus::Filled);
    let txns = ex.recent_transactions(10).unwrap();
    assert_eq!(txns.len(), 1);
    assert_eq!(txns[0].price_per_unit, "2.50".parse::<Decimal>().unwrap());
    // Buyer paid the resting price, not their own quote.
    assert_eq!(
        ex.outlet(&"downtown".into()).unwrap().balance,
        Decimal::from(10_000) - "12.50".parse::<Decimal>().unwrap()
    );
}

#[test]
fn time_priority_at_equal_price() {
    let (_, ex) = build_exchange(&[]);
    let ask1 = submit(&ex, "supplier-factory", Side::Sell, 5, "2.00");
    let ask2 = submit(&ex, "harbor", Side::Sell, 5, "2.00");
    let bid = submit(&ex, "downtown", Side::Buy, 7, "2.00");

    assert_eq!(bid.status, OrderStatus::Filled);
    let ask1 = ex.find_order(&ask1.id).unwrap();
    let ask2 = ex.find_order(&ask2.id).unwrap();
    assert_eq!(ask1.status, OrderStatus::Filled, "earlier ask fully filled");
    assert_eq!(ask2.status, OrderStatus::PartiallyFilled);
    assert_eq!(ask2.remaining, 3);
}

#[test]
fn self_trade_skipped_bid_rests() {
    let (_, ex) = build_exchange(&[]);
    let ask = submit(&ex, "downtown", Side::Sell, 5, "2.00");
    let bid = submit(&ex, "downtown", Side::Buy, 5, "2.50");

    assert_eq!(bid.status, OrderStatus::Active, "no fill against self");
    assert_eq!(ex.find_order(&ask.id).unwrap().status, OrderStatus::Active);
    assert_eq!(
        ex.best_bid(&"glazed".into()),
        Some("2.50".parse::<Decimal>().unwrap())
    );
    assert_eq!(ex.best_ask(&"glazed".into()), Some(Decimal::from(2)));
    assert!(ex.recent_transactions(10).unwrap().is_empty());
}

#[test]
fn overdraw_aborts_and_cancels_bid() {
    let (_, ex) = build_exchange(&[("broke", 5, 25)]);
    let ask = submit(&ex, "harbor", Side::Sell, 1, "10.00");
    let mut rx = ex.broadcaster().subscribe();
    let bid = submit(&ex, "broke", Side::Buy, 1, "10.00");

    assert_eq!(bid.status, OrderStatus::Cancelled);
    let ask = ex.find_order(&ask.id).unwrap();
    assert_eq!(ask.status, OrderStatus::Active, "ask unchanged");
    assert_eq!(ask.remaining, 1);

    let mut saw_trade = false;
    let mut saw_error = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            ExchangeEvent::TradeExecuted(_) => saw_trade = true,
            ExchangeEvent::Error { source, .. } => saw_error |= source == "matcher",
            _ => {}
        }
    }
    assert!(!saw_trade, "no trade for the aborted slice");
    assert!(saw_error, "matcher error emitted");
    assert_eq!(ex.outlet(&"broke".into()).unwrap().balance, Decimal::from(5));
}

#[test]
fn customer_sale_margin_math() {
    let (_, ex) = build_exchange(&[]);
    ex.set_inventory(&"downtown".into(), &"glazed".into(), 10).unwrap();
    let sale = ex
        .sell_to_customer(&"downtown".into(), &"glazed".into(), 4)
        .unwrap();

    assert_eq!(sale.cost_basis, Decimal::from(8));
    assert_eq!(sale.revenue, Decimal::from(10));
    assert_eq!(sale.profit, Decimal::from(2));
    assert_eq!(ex.inventory(&"downtown".into(), &"glazed".into()), 6);
    assert_eq!(
        ex.outlet(&"downtown".into()).unwrap().balance,
        Decimal::from(10_010)
    );
}

#[test]
fn filled_order_leaves_the_book() {
    let (_, ex) = build_exchange(&[]);
    submit(&ex, "supplier-factory", Side::Sell, 4, "2.00");
    submit(&ex, "downtown", Side::Buy, 4, "2.00");
    assert!(ex.best_ask(&"glazed".into()).is_none());
    assert!(ex.best_bid(&"glazed".into()).is_none());
    let live = ex.order_book_snapshot(&"glazed".into(), false).unwrap();
    assert!(live.bids.is_empty() && live.asks.is_empty());
    let full = ex.order_book_snapshot(&"glazed".into(), true).unwrap();
    assert_eq!(full.bids.len() + full.asks.len(), 2);
}

#[test]
fn closed_outlet_cannot_submit_and_book_is_untouched() {
    let (_, ex) = build_exchange(&[]);
    ex.set_open(&"downtown".into(), false).unwrap();
    let err = ex.submit_order(OrderRequest {
        outlet_id: "downtown".into(),
        donut_type_id: "glazed".into(),
        side: Side::Buy,
        quantity: 1,
        price_per_unit: Decimal::from(2),
    });
    assert!(err.is_err());
    let full = ex.order_book_snapshot(&"glazed".into(), true).unwrap();
    assert!(full.bids.is_empty() && full.asks.is_empty());
}

#[test]
fn exchange_fills_conserve_cash() {
    let (_, ex) = build_exchange(&[]);
    let total_before: Decimal = ["supplier-factory", "downtown", "harbor"]
        .iter()
        .map(|id| ex.outlet(&(*id).into()).unwrap().balance)
        .sum();

    submit(&ex, "supplier-factory", Side::Sell, 10, "2.10");
    submit(&ex, "downtown", Side::Buy, 6, "2.10");
    submit(&ex, "harbor", Side::Buy, 4, "2.20");
    submit(&ex, "downtown", Side::Sell, 3, "2.00");

    let total_after: Decimal = ["supplier-factory", "downtown", "harbor"]
        .iter()
        .map(|id| ex.outlet(&(*id).into()).unwrap().balance)
        .sum();
    assert_eq!(total_before, total_after);
}

#[test]
fn inventory_equals_fills_minus_customer_sales() {
    let (store, ex) = build_exchange(&[]);
    submit(&ex, "supplier-factory", Side::Sell, 20, "2.00");
    submit(&ex, "downtown", Side::Buy, 12, "2.00");
    submit(&ex, "harbor", Side::Buy, 5, "2.00");
    ex.sell_to_customer(&"downtown".into(), &"glazed".into(), 3).unwrap();

    let filled: u32 = store
        .find_recent_transactions(100)
        .unwrap()
        .iter()
        .map(|t| t.quantity)
        .sum();
    let held: u32 = store
        .load_all_inventory()
        .unwrap()
        .iter()
        .map(|(_, _, q)| *q)
        .sum();
    assert_eq!(held, filled - 3);
}

#[tokio::test]
async fn registered_sink_sees_the_whole_flow() {
    let (_, ex) = build_exchange(&[]);
    let sink = CollectingSink::new();
    let _task = ex.broadcaster().register(Arc::new(sink.clone()));
    tokio::task::yield_now().await;

    submit(&ex, "supplier-factory", Side::Sell, 10, "2.00");
    submit(&ex, "downtown", Side::Buy, 4, "2.00");
    ex.set_inventory(&"harbor".into(), &"glazed".into(), 5).unwrap();
    ex.sell_to_customer(&"harbor".into(), &"glazed".into(), 2).unwrap();

    let mut trades = 0;
    let mut purchases = 0;
    for _ in 0..100 {
        trades = sink
            .events()
            .iter()
            .filter(|e| matches!(e, ExchangeEvent::TradeExecuted(_)))
            .count();
        purchases = sink
            .events()
            .iter()
            .filter(|e| matches!(e, ExchangeEvent::CustomerPurchased(_)))
            .count();
        if trades >= 1 && purchases >= 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(trades, 1);
    assert_eq!(purchases, 1);
}

#[test]
fn leaderboard_orders_by_net_profit_without_sentinel() {
    let (_, ex) = build_exchange(&[]);
    ex.set_inventory(&"harbor".into(), &"glazed".into(), 20).unwrap();
    ex.sell_to_customer(&"harbor".into(), &"glazed".into(), 10).unwrap();
    // Supplier sells to downtown; downtown spends cash, supplier gains.
    submit(&ex, "supplier-factory", Side::Sell, 10, "2.00");
    submit(&ex, "downtown", Side::Buy, 10, "2.00");

    let board = ex.leaderboard();
    assert_eq!(board.len(), 2);
    assert_eq!(board[0].outlet_id.0, "harbor");
    assert!(board[0].net_profit > Decimal::ZERO);
    assert!(board[1].net_profit < Decimal::ZERO);
}
