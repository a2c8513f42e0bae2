use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, ProductId, UserId};
use domain::{Cart, Order, Payment, PaymentStatus, Product, StatusChange};

use crate::{OrderQuery, Page, Result};

/// A quantity of one product to reserve or release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl StockLine {
    pub fn new(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// Merges lines for the same product and orders them by product id.
///
/// Backends lock rows in this order, so concurrent reservations over
/// overlapping products cannot deadlock. Returns `None` if a merged quantity
/// overflows.
pub fn merge_stock_lines(lines: &[StockLine]) -> Option<Vec<StockLine>> {
    let mut merged: BTreeMap<ProductId, u32> = BTreeMap::new();
    for line in lines {
        let entry = merged.entry(line.product_id).or_insert(0);
        *entry = entry.checked_add(line.quantity)?;
    }
    Some(
        merged
            .into_iter()
            .map(|(product_id, quantity)| StockLine::new(product_id, quantity))
            .collect(),
    )
}

/// The outcome of a gateway callback to record atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSettlement {
    pub order_id: OrderId,
    /// Completed or Failed.
    pub status: PaymentStatus,
    pub gateway_transaction_no: Option<String>,
    /// Order transition applied together with the payment update.
    pub order_change: Option<StatusChange>,
}

/// Product reads and stock mutation.
#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>>;

    /// Returns the products that exist among `ids`, in no particular order.
    async fn get_products(&self, ids: &[ProductId]) -> Result<Vec<Product>>;

    /// Inserts or replaces a product. Used for catalog seeding.
    async fn upsert_product(&self, product: Product) -> Result<()>;

    /// Decrements stock for every line, all or nothing.
    ///
    /// Each line is a conditional decrement (`stock >= quantity`). If any line
    /// cannot be satisfied nothing is changed and
    /// [`StoreError::InsufficientStock`](crate::StoreError::InsufficientStock)
    /// names the first failing product.
    async fn reserve_stock(&self, lines: &[StockLine]) -> Result<()>;

    /// Returns previously reserved stock.
    async fn release_stock(&self, lines: &[StockLine]) -> Result<()>;
}

/// Per-user carts.
#[async_trait]
pub trait CartStore: Send + Sync {
    async fn get_cart(&self, user_id: UserId) -> Result<Option<Cart>>;

    /// Adds to a cart line, creating the cart and the line as needed.
    ///
    /// The quantity increment is a single atomic update.
    async fn add_cart_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Cart>;

    /// Removes a line. Deletes the cart when it becomes empty.
    ///
    /// Returns the remaining cart, or `None` if there is no cart left.
    async fn remove_cart_item(&self, user_id: UserId, product_id: ProductId)
    -> Result<Option<Cart>>;

    /// Atomically deletes and returns the user's cart.
    ///
    /// Of two concurrent callers at most one receives the cart.
    async fn take_cart(&self, user_id: UserId) -> Result<Option<Cart>>;

    /// Puts a previously taken cart back, merging into any cart the user has
    /// created since.
    async fn restore_cart(&self, cart: Cart) -> Result<()>;
}

/// Order snapshots and their status transitions.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts an order and, for gateway orders, its payment, atomically.
    async fn insert_order(&self, order: &Order, payment: Option<&Payment>) -> Result<()>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Lists orders newest first.
    async fn query_orders(&self, query: &OrderQuery) -> Result<Page<Order>>;

    /// Applies a status change if the order is still in `change.from`.
    ///
    /// When the change enters Cancelled, the order's stock is released and a
    /// still-pending payment is marked Failed in the same atomic step.
    async fn apply_status_change(&self, change: &StatusChange) -> Result<Order>;

    /// Pending, unpaid gateway orders with a pending payment created before
    /// `created_before`, oldest first.
    async fn find_expired_orders(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>>;
}

/// Payment records.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn get_payment_for_order(&self, order_id: OrderId) -> Result<Option<Payment>>;

    /// Records a gateway result on a pending payment, together with the
    /// optional order change. Fails with a conflict if the payment has already
    /// been settled or the order moved on.
    async fn settle_payment(&self, settlement: &PaymentSettlement) -> Result<Payment>;
}

/// Everything checkout needs from persistence.
pub trait Store: ProductStore + CartStore + OrderStore + PaymentStore + Clone + 'static {}

impl<T> Store for T where T: ProductStore + CartStore + OrderStore + PaymentStore + Clone + 'static {}
