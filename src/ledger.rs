//! Balance and inventory ledger: the single authority for all monetary
//! and quantity mutations.
//!
//! Exchange fills move cash between outlets and credit the buyer's
//! inventory; sellers are deliberately not debited (sell orders are
//! forward commitments, factory supply is unlimited). Customer sales
//! consume inventory and credit cash using the outlet's retail margin over
//! the base donut price.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::error::ExchangeError;
use crate::events::{CustomerSale, OutletStats, SalesStats};
use crate::types::{DonutTypeId, Outlet, OutletId, SaleId};

/// In-memory ledger state. The owning engine serialises access and mirrors
/// every mutation to the durable store.
#[derive(Debug)]
pub struct Ledger {
    outlets: HashMap<OutletId, Outlet>,
    inventory: HashMap<(OutletId, DonutTypeId), u32>,
    stats: HashMap<OutletId, SalesStats>,
    sentinel: OutletId,
    base_donut_price: Decimal,
    initial_balance: Decimal,
}

impl Ledger {
    pub fn new(sentinel: OutletId, base_donut_price: Decimal, initial_balance: Decimal) -> Self {
        Self {
            outlets: HashMap::new(),
            inventory: HashMap::new(),
            stats: HashMap::new(),
            sentinel,
            base_donut_price,
            initial_balance,
        }
    }

    pub fn insert_outlet(&mut self, outlet: Outlet) {
        self.stats.entry(outlet.id.clone()).or_default();
        self.outlets.insert(outlet.id.clone(), outlet);
    }

    pub fn outlet(&self, id: &OutletId) -> Option<&Outlet> {
        self.outlets.get(id)
    }

    pub fn contains_outlet(&self, id: &OutletId) -> bool {
        self.outlets.contains_key(id)
    }

    /// All outlets, sentinel included.
    pub fn all_outlets(&self) -> Vec<Outlet> {
        self.outlets.values().cloned().collect()
    }

    /// Retail outlets only. This is the one place the sentinel supplier
    /// outlet is filtered out; listings and leaderboards go through here.
    pub fn retail_outlets(&self) -> Vec<Outlet> {
        self.outlets
            .values()
            .filter(|o| o.id != self.sentinel)
            .cloned()
            .collect()
    }

    pub fn is_sentinel(&self, id: &OutletId) -> bool {
        *id == self.sentinel
    }

    /// Settles one fill: buyer pays `qty * price`, seller is credited, the
    /// buyer's inventory cell is incremented. Fails without any state
    /// change if the buyer cannot cover the amount.
    pub fn settle_fill(
        &mut self,
        buyer: &OutletId,
        seller: &OutletId,
        donut_type: &DonutTypeId,
        qty: u32,
        price: Decimal,
    ) -> Result<Decimal, ExchangeError> {
        let total = price * Decimal::from(qty);
        let buyer_balance = self
            .outlets
            .get(buyer)
            .ok_or_else(|| ExchangeError::UnknownOutlet(buyer.clone()))?
            .balance;
        if buyer_balance < total {
            return Err(ExchangeError::InsufficientFunds {
                outlet: buyer.clone(),
                needed: total,
                available: buyer_balance,
            });
        }
        if !self.outlets.contains_key(seller) {
            return Err(ExchangeError::UnknownOutlet(seller.clone()));
        }

        if let Some(b) = self.outlets.get_mut(buyer) {
            b.balance -= total;
        }
        if let Some(s) = self.outlets.get_mut(seller) {
            s.balance += total;
        }
        *self
            .inventory
            .entry((buyer.clone(), donut_type.clone()))
            .or_insert(0) += qty;

        let stats = self.stats.entry(seller.clone()).or_default();
        stats.exchange_sales_revenue += total;
        stats.exchange_sales_count += 1;
        Ok(total)
    }

    /// Sells `qty` units to a retail customer: inventory debited, balance
    /// credited at the outlet's margin over the base donut price.
    pub fn sell_to_customer(
        &mut self,
        sale_id: SaleId,
        outlet_id: &OutletId,
        donut_type: &DonutTypeId,
        qty: u32,
        executed_at: NaiveDateTime,
    ) -> Result<CustomerSale, ExchangeError> {
        if qty == 0 {
            return Err(ExchangeError::InvalidQuantity);
        }
        let margin = self
            .outlets
            .get(outlet_id)
            .ok_or_else(|| ExchangeError::UnknownOutlet(outlet_id.clone()))?
            .margin_percent;
        let cell = (outlet_id.clone(), donut_type.clone());
        let available = self.inventory.get(&cell).copied().unwrap_or(0);
        if available < qty {
            return Err(ExchangeError::InsufficientInventory {
                outlet: outlet_id.clone(),
                donut_type: donut_type.clone(),
                available,
                requested: qty,
            });
        }

        let cost_basis = self.base_donut_price * Decimal::from(qty);
        let revenue = (cost_basis * (Decimal::ONE + margin / Decimal::from(100))).round_dp(2);
        let profit = revenue - cost_basis;

        self.inventory.insert(cell, available - qty);
        if let Some(o) = self.outlets.get_mut(outlet_id) {
            o.balance += revenue;
        }
        let stats = self.stats.entry(outlet_id.clone()).or_default();
        stats.customer_sales_revenue += revenue;
        stats.customer_sales_count += 1;

        Ok(CustomerSale {
            id: sale_id,
            outlet_id: outlet_id.clone(),
            donut_type_id: donut_type.clone(),
            quantity: qty,
            cost_basis,
            revenue,
            profit,
            executed_at,
        })
    }

    pub fn inventory(&self, outlet_id: &OutletId, donut_type: &DonutTypeId) -> u32 {
        self.inventory
            .get(&(outlet_id.clone(), donut_type.clone()))
            .copied()
            .unwrap_or(0)
    }

    pub fn all_inventory(&self) -> Vec<(OutletId, DonutTypeId, u32)> {
        self.inventory
            .iter()
            .map(|((o, d), q)| (o.clone(), d.clone(), *q))
            .collect()
    }

    pub fn add_inventory(
        &mut self,
        outlet_id: &OutletId,
        donut_type: &DonutTypeId,
        qty: u32,
    ) -> Result<u32, ExchangeError> {
        self.require_outlet(outlet_id)?;
        let cell = self
            .inventory
            .entry((outlet_id.clone(), donut_type.clone()))
            .or_insert(0);
        *cell += qty;
        Ok(*cell)
    }

    pub fn remove_inventory(
        &mut self,
        outlet_id: &OutletId,
        donut_type: &DonutTypeId,
        qty: u32,
    ) -> Result<u32, ExchangeError> {
        self.require_outlet(outlet_id)?;
        let key = (outlet_id.clone(), donut_type.clone());
        let available = self.inventory.get(&key).copied().unwrap_or(0);
        if available < qty {
            return Err(ExchangeError::InsufficientInventory {
                outlet: outlet_id.clone(),
                donut_type: donut_type.clone(),
                available,
                requested: qty,
            });
        }
        let left = available - qty;
        self.inventory.insert(key, left);
        Ok(left)
    }

    pub fn set_inventory(
        &mut self,
        outlet_id: &OutletId,
        donut_type: &DonutTypeId,
        qty: u32,
    ) -> Result<(), ExchangeError> {
        self.require_outlet(outlet_id)?;
        self.inventory
            .insert((outlet_id.clone(), donut_type.clone()), qty);
        Ok(())
    }

    pub fn set_margin(
        &mut self,
        outlet_id: &OutletId,
        margin_percent: Decimal,
    ) -> Result<(), ExchangeError> {
        let outlet = self
            .outlets
            .get_mut(outlet_id)
            .ok_or_else(|| ExchangeError::UnknownOutlet(outlet_id.clone()))?;
        outlet.margin_percent = margin_percent;
        Ok(())
    }

    pub fn set_open(&mut self, outlet_id: &OutletId, open: bool) -> Result<(), ExchangeError> {
        let outlet = self
            .outlets
            .get_mut(outlet_id)
            .ok_or_else(|| ExchangeError::UnknownOutlet(outlet_id.clone()))?;
        outlet.is_open = open;
        Ok(())
    }

    pub fn set_all_open(&mut self, open: bool) {
        for outlet in self.outlets.values_mut() {
            outlet.is_open = open;
        }
    }

    /// Sales stats for one outlet, with net profit against the configured
    /// initial balance.
    pub fn stats(&self, outlet_id: &OutletId) -> Result<OutletStats, ExchangeError> {
        let outlet = self
            .outlets
            .get(outlet_id)
            .ok_or_else(|| ExchangeError::UnknownOutlet(outlet_id.clone()))?;
        Ok(OutletStats {
            outlet_id: outlet.id.clone(),
            name: outlet.name.clone(),
            balance: outlet.balance,
            net_profit: outlet.balance - self.initial_balance,
            sales: self.stats.get(outlet_id).cloned().unwrap_or_default(),
        })
    }

    /// Retail outlets ranked by net profit, best first.
    pub fn leaderboard(&self) -> Vec<OutletStats> {
        let mut board: Vec<OutletStats> = self
            .retail_outlets()
            .iter()
            .filter_map(|o| self.stats(&o.id).ok())
            .collect();
        board.sort_by(|a, b| b.net_profit.cmp(&a.net_profit));
        board
    }

    /// Replaces the customer-sales counters for an outlet (rehydration).
    pub fn restore_customer_stats(&mut self, outlet_id: &OutletId, revenue: Decimal, count: u64) {
        let stats = self.stats.entry(outlet_id.clone()).or_default();
        stats.customer_sales_revenue = revenue;
        stats.customer_sales_count = count;
    }

    /// Re-applies one persisted transaction to the seller's exchange-sales
    /// counters (rehydration).
    pub fn restore_exchange_sale(&mut self, seller: &OutletId, total: Decimal) {
        let stats = self.stats.entry(seller.clone()).or_default();
        stats.exchange_sales_revenue += total;
        stats.exchange_sales_count += 1;
    }

    fn require_outlet(&self, id: &OutletId) -> Result<(), ExchangeError> {
        if self.outlets.contains_key(id) {
            Ok(())
        } else {
            Err(ExchangeError::UnknownOutlet(id.clone()))
        }
    }
}
