//! Domain layer for the storefront checkout.
//!
//! Pure business types and rules with no I/O:
//! - `Cart` aggregate with line merging
//! - `Order` snapshot with its status state machine and admin policy
//! - `Payment` records for gateway orders
//! - `RequestContext` carrying the caller's identity

pub mod cart;
pub mod context;
pub mod money;
pub mod order;
pub mod payment;
pub mod product;

pub use cart::{Cart, CartError, CartItem};
pub use common::{OrderId, PaymentId, ProductId, UserId};
pub use context::{RequestContext, Role};
pub use money::Money;
pub use order::{
    Order, OrderError, OrderLine, OrderParts, OrderStatus, StatusChange, StatusPolicy,
};
pub use payment::{Payment, PaymentMethod, PaymentStatus};
pub use product::{Product, ProductStatus};
