//! Runs the simulated donut exchange: loads config, opens the store,
//! seeds the default roster and catalogue on first run, starts the agents,
//! and shuts down cleanly on ctrl-c.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;

use donut_exchange::agents;
use donut_exchange::{
    DonutType, Exchange, ExchangeConfig, JsonStore, LoggingSink, Outlet, Store,
};

fn default_catalogue() -> Vec<DonutType> {
    [
        ("glazed", "Glazed", "The classic glazed ring"),
        ("chocolate-frosted", "Chocolate Frosted", "Chocolate icing, no filling"),
        ("boston-cream", "Boston Cream", "Custard filled, chocolate topped"),
        ("jelly", "Jelly", "Raspberry filled, sugar dusted"),
        ("old-fashioned", "Old Fashioned", "Cake donut with cracked edges"),
    ]
    .into_iter()
    .map(|(id, name, description)| DonutType {
        id: id.into(),
        name: name.to_string(),
        description: description.to_string(),
    })
    .collect()
}

/// Seeds the outlet roster on an empty store. Existing data wins.
fn bootstrap_outlets(store: &dyn Store, config: &ExchangeConfig) {
    let existing = store.find_all_outlets().expect("load outlets");
    if !existing.is_empty() {
        return;
    }
    let now = chrono::Local::now().naive_local();
    let roster = [
        (config.supplier_outlet_id.0.as_str(), "Donut Factory", "Industrial Park"),
        ("downtown", "Downtown Donuts", "Main & 3rd"),
        ("harbor-view", "Harbor View Pastries", "Pier 9"),
        ("airport-kiosk", "Gate 12 Donuts", "Terminal B"),
        ("university", "Campus Crullers", "Student Union"),
    ];
    for (id, name, location) in roster {
        let margin = if id == config.supplier_outlet_id.0 {
            Decimal::ZERO
        } else {
            config.default_margin_percent
        };
        store
            .insert_outlet(&Outlet {
                id: id.into(),
                name: name.to_string(),
                location: location.to_string(),
                balance: config.initial_outlet_balance,
                margin_percent: margin,
                is_open: true,
                created_at: now,
            })
            .expect("seed outlet");
    }
    tracing::info!(outlets = roster.len(), "seeded outlet roster");
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ExchangeConfig::load();
    tracing::info!(
        store = %config.store_path,
        base_price = %config.base_donut_price,
        "starting donut exchange"
    );

    let store: Arc<dyn Store> =
        Arc::new(JsonStore::open(&config.store_path).expect("open store"));
    bootstrap_outlets(store.as_ref(), &config);

    let exchange = Arc::new(
        Exchange::new(store, default_catalogue(), config).expect("rehydrate exchange"),
    );
    exchange.broadcaster().register(Arc::new(LoggingSink));

    let agents = [
        agents::supplier(exchange.clone()),
        agents::purchasing_agent(exchange.clone()),
        agents::customer_simulator(exchange.clone()),
    ];
    for agent in &agents {
        agent.start();
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(std::time::Duration::from_secs(30)) => {
                if let Some(leader) = exchange.leaderboard().first() {
                    tracing::info!(
                        outlet = %leader.outlet_id,
                        net_profit = %leader.net_profit,
                        "leaderboard front-runner"
                    );
                }
            }
        }
    }

    tracing::info!("shutting down");
    for agent in &agents {
        agent.stop().await;
    }
    for stats in exchange.leaderboard() {
        tracing::info!(
            outlet = %stats.outlet_id,
            balance = %stats.balance,
            net_profit = %stats.net_profit,
            customer_sales = stats.sales.customer_sales_count,
            exchange_sales = stats.sales.exchange_sales_count,
            "final standing"
        );
    }
}
