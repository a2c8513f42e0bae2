//! Checkout error types.

use common::{OrderId, ProductId};
use domain::{CartError, Money, OrderError, OrderStatus};
use store::StoreError;
use thiserror::Error;

use crate::gateway::GatewayError;

/// Errors that can occur during checkout operations.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Quantities must be positive.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// Summing cart quantities would overflow.
    #[error("Quantity for product {product_id} is too large")]
    QuantityOverflow { product_id: ProductId },

    /// The product does not exist or is not sold.
    #[error("Product unavailable: {0}")]
    ProductUnavailable(ProductId),

    /// The user has no cart.
    #[error("Cart not found")]
    CartNotFound,

    /// Order creation needs a cart with items.
    #[error("Cart is empty")]
    EmptyCart,

    /// The order total is not positive.
    #[error("Invalid order amount: {0}")]
    InvalidAmount(Money),

    /// The order total does not fit the money type.
    #[error("Order amount overflows")]
    AmountOverflow,

    /// Not enough stock for one line.
    #[error("Insufficient stock for {product_name}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        product_name: String,
        requested: u32,
        available: u32,
    },

    /// The order does not exist or belongs to someone else.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Paid orders cannot be cancelled by the buyer.
    #[error("Cannot cancel an order that has already been paid")]
    CannotCancelPaidOrder,

    /// The requested transition is not allowed from the current state.
    #[error("Invalid state transition: cannot {action} from {current} state")]
    InvalidTransition {
        current: OrderStatus,
        action: &'static str,
    },

    /// The caller lacks the role for this operation.
    #[error("Forbidden: {0}")]
    Forbidden(&'static str),

    /// Another request changed the record first.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A record the workflow depends on is missing.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Payment gateway error.
    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Persistence error.
    #[error("Store error: {0}")]
    Store(StoreError),
}

/// Error classes exposed at the HTTP boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Forbidden,
    Signature,
    Internal,
}

impl CheckoutError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CheckoutError::InvalidQuantity { .. }
            | CheckoutError::QuantityOverflow { .. }
            | CheckoutError::EmptyCart
            | CheckoutError::InvalidAmount(_)
            | CheckoutError::AmountOverflow => ErrorKind::Validation,
            CheckoutError::ProductUnavailable(_)
            | CheckoutError::CartNotFound
            | CheckoutError::OrderNotFound(_)
            | CheckoutError::NotFound { .. } => ErrorKind::NotFound,
            CheckoutError::InsufficientStock { .. }
            | CheckoutError::CannotCancelPaidOrder
            | CheckoutError::InvalidTransition { .. }
            | CheckoutError::Conflict(_) => ErrorKind::Conflict,
            CheckoutError::Forbidden(_) => ErrorKind::Forbidden,
            CheckoutError::Gateway(err) if err.is_rejection() => ErrorKind::Signature,
            CheckoutError::Gateway(_) | CheckoutError::Store(_) => ErrorKind::Internal,
        }
    }

    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            CheckoutError::InvalidQuantity { .. } => "invalid_quantity",
            CheckoutError::QuantityOverflow { .. } => "quantity_overflow",
            CheckoutError::ProductUnavailable(_) => "product_unavailable",
            CheckoutError::CartNotFound => "cart_not_found",
            CheckoutError::EmptyCart => "empty_cart",
            CheckoutError::InvalidAmount(_) | CheckoutError::AmountOverflow => "invalid_amount",
            CheckoutError::InsufficientStock { .. } => "insufficient_stock",
            CheckoutError::OrderNotFound(_) => "order_not_found",
            CheckoutError::CannotCancelPaidOrder => "order_paid",
            CheckoutError::InvalidTransition { .. } => "invalid_transition",
            CheckoutError::Forbidden(_) => "forbidden",
            CheckoutError::Conflict(_) => "conflict",
            CheckoutError::NotFound { .. } => "not_found",
            CheckoutError::Gateway(_) => "gateway",
            CheckoutError::Store(_) => "store",
        }
    }
}

impl From<StoreError> for CheckoutError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => CheckoutError::NotFound { entity, id },
            StoreError::InsufficientStock {
                product_id,
                requested,
                available,
            } => CheckoutError::InsufficientStock {
                product_id,
                product_name: product_id.to_string(),
                requested,
                available,
            },
            StoreError::Conflict(msg) => CheckoutError::Conflict(msg),
            StoreError::Cart(err) => err.into(),
            other => CheckoutError::Store(other),
        }
    }
}

impl From<CartError> for CheckoutError {
    fn from(err: CartError) -> Self {
        match err {
            CartError::InvalidQuantity { quantity } => CheckoutError::InvalidQuantity { quantity },
            CartError::QuantityOverflow { product_id } => {
                CheckoutError::QuantityOverflow { product_id }
            }
        }
    }
}

impl From<OrderError> for CheckoutError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::NoItems => CheckoutError::EmptyCart,
            OrderError::InvalidQuantity { quantity } => CheckoutError::InvalidQuantity { quantity },
            OrderError::InvalidAmount { amount } => CheckoutError::InvalidAmount(Money::new(amount)),
            OrderError::AmountOverflow => CheckoutError::AmountOverflow,
            OrderError::NotOwner => CheckoutError::Forbidden("order belongs to another user"),
            OrderError::CannotCancelPaidOrder => CheckoutError::CannotCancelPaidOrder,
            OrderError::InvalidTransition { current, action } => {
                CheckoutError::InvalidTransition { current, action }
            }
        }
    }
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;
