//! Shared types for the storefront checkout workspace.

mod types;

pub use types::{OrderId, ParseIdError, PaymentId, ProductId, UserId};
