//! Order snapshot and status state machine.

mod aggregate;
mod policy;
mod state;

pub use aggregate::{Order, OrderLine, OrderParts, StatusChange};
pub use policy::StatusPolicy;
pub use state::OrderStatus;

use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderError {
    /// An order needs at least one line.
    #[error("Order has no items")]
    NoItems,

    /// Invalid line quantity.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// The computed total is not positive.
    #[error("Invalid order amount: {amount}")]
    InvalidAmount { amount: i64 },

    /// The computed total does not fit the money type.
    #[error("Order amount overflows")]
    AmountOverflow,

    /// The order belongs to another user.
    #[error("Order does not belong to the requesting user")]
    NotOwner,

    /// Paid orders cannot be cancelled by the buyer.
    #[error("Cannot cancel an order that has already been paid")]
    CannotCancelPaidOrder,

    /// The requested transition is not allowed from the current state.
    #[error("Invalid state transition: cannot {action} from {current} state")]
    InvalidTransition {
        current: OrderStatus,
        action: &'static str,
    },
}
