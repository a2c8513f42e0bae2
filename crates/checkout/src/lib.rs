//! Checkout workflow for the storefront.
//!
//! Orchestrates the cart, stock reservation, order creation, the payment
//! gateway round trip and order status changes on top of a [`store::Store`].
//!
//! Creating an order runs these steps:
//! 1. Claim the user's cart
//! 2. Resolve prices and check stock
//! 3. Reserve stock
//! 4. Persist the order (and its payment for gateway orders)
//!
//! If a step fails, earlier steps are compensated in reverse order.

pub mod callback;
pub mod cart;
pub mod error;
pub mod factory;
pub mod gateway;
pub mod inventory;
pub mod status;
pub mod sweeper;

pub use callback::{PaymentCallbackHandler, PaymentResultRedirect, ResultStatus};
pub use cart::{CartLineView, CartService, CartView, RemoveOutcome};
pub use error::{CheckoutError, ErrorKind, Result};
pub use factory::{OrderFactory, PlacedOrder};
pub use gateway::{
    CallbackOutcome, CallbackParams, GatewayError, PaymentGateway, RedirectRequest, RedirectUrl,
    VnPayConfig, VnPayGateway,
};
pub use inventory::InventoryLedger;
pub use status::OrderStatusService;
pub use sweeper::ExpirySweeper;
