//! Exchange error kinds. Validation errors surface synchronously to the
//! caller with no state change; settlement aborts and persistence failures
//! are reported through the event stream instead.

use crate::types::{DonutTypeId, OrderId, OutletId};

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("unknown outlet: {0}")]
    UnknownOutlet(OutletId),
    #[error("unknown donut type: {0}")]
    UnknownDonutType(DonutTypeId),
    #[error("outlet {0} is closed")]
    OutletClosed(OutletId),
    #[error("quantity must be positive")]
    InvalidQuantity,
    #[error("price must be positive")]
    InvalidPrice,
    #[error("outlet {outlet} has {available} of {donut_type}, needs {requested}")]
    InsufficientInventory {
        outlet: OutletId,
        donut_type: DonutTypeId,
        available: u32,
        requested: u32,
    },
    #[error("outlet {outlet} needs {needed} but has {available}")]
    InsufficientFunds {
        outlet: OutletId,
        needed: rust_decimal::Decimal,
        available: rust_decimal::Decimal,
    },
    #[error("order not found: {0}")]
    OrderNotFound(OrderId),
    #[error("order {0} is not active")]
    OrderNotActive(OrderId),
    #[error("store: {0}")]
    Store(String),
}
