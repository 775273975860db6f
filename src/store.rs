//! Durable storage behind the engine's write-through cache.
//!
//! [`Store`] is the narrow persistence seam the engine consumes.
//! [`JsonStore`] keeps the whole dataset as one JSON document, saved after
//! every mutation; opened without a path it is memory-only (tests, demos).
//! All methods are safe under concurrent use: a single internal lock
//! serialises access.

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDateTime;

use crate::error::ExchangeError;
use crate::events::{CustomerSale, Transaction};
use crate::types::{DonutTypeId, Order, OrderId, OrderStatus, Outlet, OutletId};

/// Persistence operations the engine depends on.
pub trait Store: Send + Sync {
    fn load_all_inventory(&self) -> Result<Vec<(OutletId, DonutTypeId, u32)>, ExchangeError>;
    fn set_inventory(
        &self,
        outlet_id: &OutletId,
        donut_type_id: &DonutTypeId,
        qty: u32,
    ) -> Result<(), ExchangeError>;

    fn insert_outlet(&self, outlet: &Outlet) -> Result<(), ExchangeError>;
    fn find_outlet(&self, id: &OutletId) -> Result<Option<Outlet>, ExchangeError>;
    fn find_all_outlets(&self) -> Result<Vec<Outlet>, ExchangeError>;
    fn update_balance(&self, id: &OutletId, balance: Decimal) -> Result<(), ExchangeError>;
    fn update_margin(&self, id: &OutletId, margin_percent: Decimal) -> Result<(), ExchangeError>;
    fn set_open(&self, id: &OutletId, open: bool) -> Result<(), ExchangeError>;
    fn set_all_open(&self, open: bool) -> Result<(), ExchangeError>;

    fn insert_order(&self, order: &Order) -> Result<(), ExchangeError>;
    fn find_order_by_id(&self, id: &OrderId) -> Result<Option<Order>, ExchangeError>;
    fn update_order_status(
        &self,
        id: &OrderId,
        status: OrderStatus,
        updated_at: NaiveDateTime,
    ) -> Result<(), ExchangeError>;
    fn update_order_quantity(
        &self,
        id: &OrderId,
        remaining: u32,
        updated_at: NaiveDateTime,
    ) -> Result<(), ExchangeError>;
    /// All orders for a product, ascending by submission sequence.
    /// Terminal orders are excluded unless `include_terminal`.
    fn order_book(
        &self,
        donut_type_id: &DonutTypeId,
        include_terminal: bool,
    ) -> Result<Vec<Order>, ExchangeError>;

    fn insert_transaction(&self, transaction: &Transaction) -> Result<(), ExchangeError>;
    fn find_transactions_by_product(
        &self,
        donut_type_id: &DonutTypeId,
        limit: usize,
    ) -> Result<Vec<Transaction>, ExchangeError>;
    fn find_recent_transactions(&self, limit: usize) -> Result<Vec<Transaction>, ExchangeError>;

    fn insert_customer_sale(&self, sale: &CustomerSale) -> Result<(), ExchangeError>;
    /// (outlet, total revenue, sale count) per outlet with at least one sale.
    fn aggregate_customer_sales_by_outlet(
        &self,
    ) -> Result<Vec<(OutletId, Decimal, u64)>, ExchangeError>;
}

/// The whole persisted dataset. Transactions and sales are append-only.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct StoreData {
    outlets: BTreeMap<String, Outlet>,
    orders: BTreeMap<String, Order>,
    /// Keyed `outlet_id|donut_type_id`.
    inventory: BTreeMap<String, u32>,
    transactions: Vec<Transaction>,
    customer_sales: Vec<CustomerSale>,
}

fn inventory_key(outlet_id: &OutletId, donut_type_id: &DonutTypeId) -> String {
    format!("{}|{}", outlet_id.0, donut_type_id.0)
}

fn split_inventory_key(key: &str) -> Option<(OutletId, DonutTypeId)> {
    let (outlet, donut) = key.split_once('|')?;
    Some((OutletId(outlet.to_string()), DonutTypeId(donut.to_string())))
}

/// Single-document JSON store (optionally memory-only).
#[derive(Debug)]
pub struct JsonStore {
    path: Option<PathBuf>,
    data: Mutex<StoreData>,
}

impl JsonStore {
    /// Opens (or creates) the store at `path`, loading any existing data.
    /// A load failure at startup is fatal: rehydration must not run against
    /// a half-readable dataset.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ExchangeError> {
        let path = path.as_ref().to_path_buf();
        let data = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| ExchangeError::Store(format!("parse {}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreData::default(),
            Err(e) => {
                return Err(ExchangeError::Store(format!("read {}: {e}", path.display())))
            }
        };
        Ok(Self {
            path: Some(path),
            data: Mutex::new(data),
        })
    }

    /// Memory-only store, nothing touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: Mutex::new(StoreData::default()),
        }
    }

    fn save(&self, data: &StoreData) -> Result<(), ExchangeError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(data)
            .map_err(|e| ExchangeError::Store(format!("serialize: {e}")))?;
        std::fs::write(path, json)
            .map_err(|e| ExchangeError::Store(format!("write {}: {e}", path.display())))
    }

    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut StoreData) -> Result<T, ExchangeError>,
    ) -> Result<T, ExchangeError> {
        let mut data = self.data.lock().expect("store lock");
        let out = f(&mut data)?;
        self.save(&data)?;
        Ok(out)
    }

    fn read<T>(&self, f: impl FnOnce(&StoreData) -> T) -> T {
        let data = self.data.lock().expect("store lock");
        f(&data)
    }
}

impl Store for JsonStore {
    fn load_all_inventory(&self) -> Result<Vec<(OutletId, DonutTypeId, u32)>, ExchangeError> {
        Ok(self.read(|d| {
            d.inventory
                .iter()
                .filter_map(|(k, q)| split_inventory_key(k).map(|(o, p)| (o, p, *q)))
                .collect()
        }))
    }

    fn set_inventory(
        &self,
        outlet_id: &OutletId,
        donut_type_id: &DonutTypeId,
        qty: u32,
    ) -> Result<(), ExchangeError> {
        self.mutate(|d| {
            d.inventory.insert(inventory_key(outlet_id, donut_type_id), qty);
            Ok(())
        })
    }

    fn insert_outlet(&self, outlet: &Outlet) -> Result<(), ExchangeError> {
        self.mutate(|d| {
            d.outlets.insert(outlet.id.0.clone(), outlet.clone());
            Ok(())
        })
    }

    fn find_outlet(&self, id: &OutletId) -> Result<Option<Outlet>, ExchangeError> {
        Ok(self.read(|d| d.outlets.get(&id.0).cloned()))
    }

    fn find_all_outlets(&self) -> Result<Vec<Outlet>, ExchangeError> {
        Ok(self.read(|d| d.outlets.values().cloned().collect()))
    }

    fn update_balance(&self, id: &OutletId, balance: Decimal) -> Result<(), ExchangeError> {
        self.mutate(|d| {
            let outlet = d
                .outlets
                .get_mut(&id.0)
                .ok_or_else(|| ExchangeError::UnknownOutlet(id.clone()))?;
            outlet.balance = balance;
            Ok(())
        })
    }

    fn update_margin(&self, id: &OutletId, margin_percent: Decimal) -> Result<(), ExchangeError> {
        self.mutate(|d| {
            let outlet = d
                .outlets
                .get_mut(&id.0)
                .ok_or_else(|| ExchangeError::UnknownOutlet(id.clone()))?;
            outlet.margin_percent = margin_percent;
            Ok(())
        })
    }

    fn set_open(&self, id: &OutletId, open: bool) -> Result<(), ExchangeError> {
        self.mutate(|d| {
            let outlet = d
                .outlets
                .get_mut(&id.0)
                .ok_or_else(|| ExchangeError::UnknownOutlet(id.clone()))?;
            outlet.is_open = open;
            Ok(())
        })
    }

    fn set_all_open(&self, open: bool) -> Result<(), ExchangeError> {
        self.mutate(|d| {
            for outlet in d.outlets.values_mut() {
                outlet.is_open = open;
            }
            Ok(())
        })
    }

    fn insert_order(&self, order: &Order) -> Result<(), ExchangeError> {
        self.mutate(|d| {
            d.orders.insert(order.id.0.clone(), order.clone());
            Ok(())
        })
    }

    fn find_order_by_id(&self, id: &OrderId) -> Result<Option<Order>, ExchangeError> {
        Ok(self.read(|d| d.orders.get(&id.0).cloned()))
    }

    fn update_order_status(
        &self,
        id: &OrderId,
        status: OrderStatus,
        updated_at: NaiveDateTime,
    ) -> Result<(), ExchangeError> {
        self.mutate(|d| {
            let order = d
                .orders
                .get_mut(&id.0)
                .ok_or_else(|| ExchangeError::OrderNotFound(id.clone()))?;
            order.status = status;
            order.updated_at = updated_at;
            Ok(())
        })
    }

    fn update_order_quantity(
        &self,
        id: &OrderId,
        remaining: u32,
        updated_at: NaiveDateTime,
    ) -> Result<(), ExchangeError> {
        self.mutate(|d| {
            let order = d
                .orders
                .get_mut(&id.0)
                .ok_or_else(|| ExchangeError::OrderNotFound(id.clone()))?;
            order.remaining = remaining;
            order.updated_at = updated_at;
            Ok(())
        })
    }

    fn order_book(
        &self,
        donut_type_id: &DonutTypeId,
        include_terminal: bool,
    ) -> Result<Vec<Order>, ExchangeError> {
        Ok(self.read(|d| {
            let mut orders: Vec<Order> = d
                .orders
                .values()
                .filter(|o| &o.donut_type_id == donut_type_id)
                .filter(|o| include_terminal || !o.is_terminal())
                .cloned()
                .collect();
            orders.sort_by_key(|o| o.seq);
            orders
        }))
    }

    fn insert_transaction(&self, transaction: &Transaction) -> Result<(), ExchangeError> {
        self.mutate(|d| {
            d.transactions.push(transaction.clone());
            Ok(())
        })
    }

    fn find_transactions_by_product(
        &self,
        donut_type_id: &DonutTypeId,
        limit: usize,
    ) -> Result<Vec<Transaction>, ExchangeError> {
        Ok(self.read(|d| {
            d.transactions
                .iter()
                .rev()
                .filter(|t| &t.donut_type_id == donut_type_id)
                .take(limit)
                .cloned()
                .collect()
        }))
    }

    fn find_recent_transactions(&self, limit: usize) -> Result<Vec<Transaction>, ExchangeError> {
        Ok(self.read(|d| d.transactions.iter().rev().take(limit).cloned().collect()))
    }

    fn insert_customer_sale(&self, sale: &CustomerSale) -> Result<(), ExchangeError> {
        self.mutate(|d| {
            d.customer_sales.push(sale.clone());
            Ok(())
        })
    }

    fn aggregate_customer_sales_by_outlet(
        &self,
    ) -> Result<Vec<(OutletId, Decimal, u64)>, ExchangeError> {
        Ok(self.read(|d| {
            let mut agg: BTreeMap<String, (Decimal, u64)> = BTreeMap::new();
            for sale in &d.customer_sales {
                let entry = agg.entry(sale.outlet_id.0.clone()).or_default();
                entry.0 += sale.revenue;
                entry.1 += 1;
            }
            agg.into_iter()
                .map(|(id, (revenue, count))| (OutletId(id), revenue, count))
                .collect()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;

    fn ts() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2025-01-01T00:00:00", "%Y-%m-%dT%H:%M:%S").unwrap()
    }

    fn outlet(id: &str) -> Outlet {
        Outlet {
            id: OutletId(id.to_string()),
            name: id.to_string(),
            location: "test".to_string(),
            balance: Decimal::from(10_000),
            margin_percent: Decimal::from(25),
            is_open: true,
            created_at: ts(),
        }
    }

    fn order(id: u64, donut: &str, status: OrderStatus) -> Order {
        Order {
            id: OrderId(format!("order-{id}")),
            outlet_id: OutletId("downtown".into()),
            donut_type_id: DonutTypeId(donut.to_string()),
            side: Side::Buy,
            quantity: 5,
            remaining: 5,
            price_per_unit: Decimal::from(2),
            status,
            seq: id,
            created_at: ts(),
            updated_at: ts(),
        }
    }

    #[test]
    fn outlet_roundtrip_and_updates() {
        let store = JsonStore::in_memory();
        store.insert_outlet(&outlet("downtown")).unwrap();
        store
            .update_balance(&"downtown".into(), Decimal::from(42))
            .unwrap();
        store.update_margin(&"downtown".into(), Decimal::from(30)).unwrap();
        store.set_open(&"downtown".into(), false).unwrap();
        let loaded = store.find_outlet(&"downtown".into()).unwrap().unwrap();
        assert_eq!(loaded.balance, Decimal::from(42));
        assert_eq!(loaded.margin_percent, Decimal::from(30));
        assert!(!loaded.is_open);
    }

    #[test]
    fn update_balance_unknown_outlet_errors() {
        let store = JsonStore::in_memory();
        assert!(store.update_balance(&"ghost".into(), Decimal::ONE).is_err());
    }

    #[test]
    fn order_book_filters_terminal_and_sorts_by_seq() {
        let store = JsonStore::in_memory();
        store.insert_order(&order(2, "glazed", OrderStatus::Active)).unwrap();
        store.insert_order(&order(1, "glazed", OrderStatus::Filled)).unwrap();
        store.insert_order(&order(3, "chocolate", OrderStatus::Active)).unwrap();

        let live = store.order_book(&"glazed".into(), false).unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, OrderId("order-2".into()));

        let all = store.order_book(&"glazed".into(), true).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].seq, 1);
        assert_eq!(all[1].seq, 2);
    }

    #[test]
    fn inventory_key_roundtrip() {
        let store = JsonStore::in_memory();
        store
            .set_inventory(&"downtown".into(), &"glazed".into(), 7)
            .unwrap();
        let all = store.load_all_inventory().unwrap();
        assert_eq!(
            all,
            vec![(OutletId("downtown".into()), DonutTypeId("glazed".into()), 7)]
        );
    }

    #[test]
    fn customer_sales_aggregate() {
        let store = JsonStore::in_memory();
        for (outlet, revenue) in [("downtown", 10), ("downtown", 5), ("harbor", 3)] {
            store
                .insert_customer_sale(&CustomerSale {
                    id: crate::types::SaleId(format!("sale-{outlet}-{revenue}")),
                    outlet_id: OutletId(outlet.to_string()),
                    donut_type_id: DonutTypeId("glazed".into()),
                    quantity: 1,
                    cost_basis: Decimal::from(2),
                    revenue: Decimal::from(revenue),
                    profit: Decimal::from(revenue - 2),
                    executed_at: ts(),
                })
                .unwrap();
        }
        let agg = store.aggregate_customer_sales_by_outlet().unwrap();
        assert_eq!(agg.len(), 2);
        assert!(agg.contains(&(OutletId("downtown".into()), Decimal::from(15), 2)));
        assert!(agg.contains(&(OutletId("harbor".into()), Decimal::from(3), 1)));
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exchange.json");
        {
            let store = JsonStore::open(&path).unwrap();
            store.insert_outlet(&outlet("downtown")).unwrap();
            store.insert_order(&order(1, "glazed", OrderStatus::Active)).unwrap();
        }
        let store = JsonStore::open(&path).unwrap();
        assert!(store.find_outlet(&"downtown".into()).unwrap().is_some());
        assert!(store
            .find_order_by_id(&OrderId("order-1".into()))
            .unwrap()
            .is_some());
    }

    #[test]
    fn open_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path().join("fresh.json")).unwrap();
        assert!(store.find_all_outlets().unwrap().is_empty());
    }

    #[test]
    fn recent_transactions_newest_first_with_limit() {
        let store = JsonStore::in_memory();
        for i in 1..=3u64 {
            store
                .insert_transaction(&Transaction {
                    id: crate::types::TransactionId(format!("txn-{i}")),
                    buy_order_id: OrderId("order-1".into()),
                    sell_order_id: OrderId("order-2".into()),
                    buyer_outlet_id: OutletId("downtown".into()),
                    seller_outlet_id: OutletId("supplier-factory".into()),
                    donut_type_id: DonutTypeId("glazed".into()),
                    quantity: 1,
                    price_per_unit: Decimal::from(2),
                    total_amount: Decimal::from(2),
                    executed_at: ts(),
                })
                .unwrap();
        }
        let recent = store.find_recent_transactions(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id.0, "txn-3");
    }

    #[test]
    fn transactions_by_product_filters() {
        let store = JsonStore::in_memory();
        for (i, donut) in [(1, "glazed"), (2, "chocolate"), (3, "glazed")] {
            store
                .insert_transaction(&Transaction {
                    id: crate::types::TransactionId(format!("txn-{i}")),
                    buy_order_id: OrderId("order-1".into()),
                    sell_order_id: OrderId("order-2".into()),
                    buyer_outlet_id: OutletId("downtown".into()),
                    seller_outlet_id: OutletId("supplier-factory".into()),
                    donut_type_id: DonutTypeId(donut.to_string()),
                    quantity: 1,
                    price_per_unit: Decimal::from(2),
                    total_amount: Decimal::from(2),
                    executed_at: ts(),
                })
                .unwrap();
        }
        let glazed = store.find_transactions_by_product(&"glazed".into(), 10).unwrap();
        assert_eq!(glazed.len(), 2);
        assert!(glazed.iter().all(|t| t.donut_type_id.0 == "glazed"));
        assert_eq!(glazed[0].id.0, "txn-3", "newest first");
    }
}
