//! Order status changes and order listings.

use common::OrderId;
use domain::{Order, OrderStatus, RequestContext, StatusChange, StatusPolicy};
use store::{OrderQuery, Page, Store};

use crate::error::{CheckoutError, Result};

/// Buyer cancellation, admin status changes and order queries.
#[derive(Debug, Clone)]
pub struct OrderStatusService<S> {
    store: S,
    policy: StatusPolicy,
}

impl<S> OrderStatusService<S>
where
    S: Store,
{
    pub fn new(store: S, policy: StatusPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> StatusPolicy {
        self.policy
    }

    /// Cancels one of the caller's own Pending, unpaid orders and returns its
    /// stock.
    #[tracing::instrument(skip(self, ctx), fields(user_id = %ctx.user_id))]
    pub async fn cancel(&self, ctx: &RequestContext, order_id: OrderId) -> Result<Order> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .filter(|order| order.belongs_to(ctx.user_id))
            .ok_or(CheckoutError::OrderNotFound(order_id))?;

        let change = order.cancel_by(ctx)?;
        self.apply(&change).await
    }

    /// Sets an order's status. Admin only; the allowed moves come from the
    /// configured [`StatusPolicy`].
    ///
    /// Moving an order out of Cancelled reserves its lines again and fails
    /// with [`CheckoutError::InsufficientStock`] when the stock is gone.
    #[tracing::instrument(skip(self, ctx), fields(user_id = %ctx.user_id))]
    pub async fn change_status(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Order> {
        if !ctx.is_admin() {
            return Err(CheckoutError::Forbidden("admin role required"));
        }

        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(CheckoutError::OrderNotFound(order_id))?;

        let change = order.change_status(status, self.policy)?;
        self.apply(&change)
            .await
            .map_err(|err| with_line_name(err, &order))
    }

    /// All of the caller's orders, newest first.
    #[tracing::instrument(skip(self, ctx), fields(user_id = %ctx.user_id))]
    pub async fn list_for_user(&self, ctx: &RequestContext) -> Result<Vec<Order>> {
        let mut query = OrderQuery::for_user(ctx.user_id);
        let mut orders = Vec::new();
        loop {
            let page = self.store.query_orders(&query).await?;
            let last = page.page >= page.total_pages() || page.items.is_empty();
            orders.extend(page.items);
            if last {
                return Ok(orders);
            }
            let next = query.page + 1;
            query = query.page(next);
        }
    }

    /// One page of all orders. Admin only.
    #[tracing::instrument(skip(self, ctx), fields(user_id = %ctx.user_id))]
    pub async fn list_all(&self, ctx: &RequestContext, query: &OrderQuery) -> Result<Page<Order>> {
        if !ctx.is_admin() {
            return Err(CheckoutError::Forbidden("admin role required"));
        }
        Ok(self.store.query_orders(query).await?)
    }

    async fn apply(&self, change: &StatusChange) -> Result<Order> {
        let order = self.store.apply_status_change(change).await?;
        metrics::counter!("order_status_changes_total", "status" => change.to.as_str())
            .increment(1);
        tracing::info!(
            order_id = %change.order_id,
            from = %change.from,
            to = %change.to,
            released_stock = change.releases_stock(),
            reserved_stock = change.reserves_stock(),
            "order status changed"
        );
        Ok(order)
    }
}

/// Names the order line a stock error refers to.
fn with_line_name(err: CheckoutError, order: &Order) -> CheckoutError {
    match err {
        CheckoutError::InsufficientStock {
            product_id,
            product_name,
            requested,
            available,
        } => CheckoutError::InsufficientStock {
            product_id,
            product_name: order
                .lines()
                .iter()
                .find(|line| line.product_id == product_id)
                .map_or(product_name, |line| line.product_name.clone()),
            requested,
            available,
        },
        other => other,
    }
}
