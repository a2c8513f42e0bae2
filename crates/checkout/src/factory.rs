//! Order creation from the user's cart.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use common::ProductId;
use domain::{Cart, Order, OrderLine, Payment, PaymentMethod, Product, RequestContext};
use serde::Serialize;
use store::{StockLine, Store};
use uuid::Uuid;

use crate::error::{CheckoutError, Result};
use crate::gateway::{PaymentGateway, RedirectRequest, RedirectUrl};
use crate::inventory::InventoryLedger;

/// A successfully created order.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PlacedOrder {
    /// Cash on delivery: nothing further to do.
    CashOnDelivery { order: Order },
    /// The buyer must be sent to `payment_url` to pay.
    Gateway {
        order: Order,
        #[serde(skip)]
        payment: Payment,
        payment_url: RedirectUrl,
    },
}

impl PlacedOrder {
    pub fn order(&self) -> &Order {
        match self {
            PlacedOrder::CashOnDelivery { order } | PlacedOrder::Gateway { order, .. } => order,
        }
    }

    pub fn payment(&self) -> Option<&Payment> {
        match self {
            PlacedOrder::CashOnDelivery { .. } => None,
            PlacedOrder::Gateway { payment, .. } => Some(payment),
        }
    }

    pub fn payment_url(&self) -> Option<&RedirectUrl> {
        match self {
            PlacedOrder::CashOnDelivery { .. } => None,
            PlacedOrder::Gateway { payment_url, .. } => Some(payment_url),
        }
    }
}

/// Turns a cart into an order.
///
/// The cart is claimed first, so of two concurrent attempts for one user only
/// one sees it. A failure after the claim puts the cart back, and a failure
/// after the stock reservation also releases the stock.
pub struct OrderFactory<S, G> {
    store: S,
    ledger: InventoryLedger<S>,
    gateway: Arc<G>,
}

impl<S, G> Clone for OrderFactory<S, G>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            ledger: self.ledger.clone(),
            gateway: Arc::clone(&self.gateway),
        }
    }
}

impl<S, G> OrderFactory<S, G>
where
    S: Store,
    G: PaymentGateway,
{
    pub fn new(store: S, gateway: Arc<G>) -> Self {
        let ledger = InventoryLedger::new(store.clone());
        Self {
            store,
            ledger,
            gateway,
        }
    }

    #[tracing::instrument(skip(self, ctx), fields(user_id = %ctx.user_id, method = method.as_str()))]
    pub async fn create_order(
        &self,
        ctx: &RequestContext,
        method: PaymentMethod,
        client_ip: &str,
    ) -> Result<PlacedOrder> {
        let started = Instant::now();
        let result = self.claim_and_place(ctx, method, client_ip).await;
        metrics::histogram!("order_creation_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(placed) => {
                metrics::counter!("orders_created_total", "method" => method.as_str())
                    .increment(1);
                tracing::info!(
                    order_id = %placed.order().id(),
                    total = %placed.order().total_amount(),
                    "order created"
                );
            }
            Err(err) => {
                metrics::counter!("order_creation_failures_total", "reason" => err.reason())
                    .increment(1);
                tracing::warn!(error = %err, "order creation failed");
            }
        }

        result
    }

    async fn claim_and_place(
        &self,
        ctx: &RequestContext,
        method: PaymentMethod,
        client_ip: &str,
    ) -> Result<PlacedOrder> {
        let cart = self
            .store
            .take_cart(ctx.user_id)
            .await?
            .filter(|cart| !cart.is_empty())
            .ok_or(CheckoutError::EmptyCart)?;

        match self.place(ctx, &cart, method, client_ip).await {
            Ok(placed) => Ok(placed),
            Err(err) => {
                self.restore_cart(cart).await;
                Err(err)
            }
        }
    }

    async fn place(
        &self,
        ctx: &RequestContext,
        cart: &Cart,
        method: PaymentMethod,
        client_ip: &str,
    ) -> Result<PlacedOrder> {
        let ids: Vec<ProductId> = cart.items().iter().map(|item| item.product_id).collect();
        let products: HashMap<ProductId, Product> = self
            .store
            .get_products(&ids)
            .await?
            .into_iter()
            .map(|product| (product.id, product))
            .collect();

        let mut lines = Vec::with_capacity(cart.items().len());
        for item in cart.items() {
            let product = products
                .get(&item.product_id)
                .filter(|product| product.is_available())
                .ok_or(CheckoutError::ProductUnavailable(item.product_id))?;
            lines.push(OrderLine::new(
                product.id,
                product.name.clone(),
                product.price,
                item.quantity,
            ));
        }

        let now = Utc::now();
        let order = Order::place(ctx.user_id, lines, method, now)?;

        // Check every line before touching stock.
        for line in order.lines() {
            if let Some(product) = products.get(&line.product_id)
                && !product.has_stock(line.quantity)
            {
                return Err(CheckoutError::InsufficientStock {
                    product_id: product.id,
                    product_name: product.name.clone(),
                    requested: line.quantity,
                    available: product.stock,
                });
            }
        }

        let stock_lines: Vec<StockLine> = order
            .lines()
            .iter()
            .map(|line| StockLine::new(line.product_id, line.quantity))
            .collect();
        self.ledger
            .reserve(&stock_lines)
            .await
            .map_err(|err| with_product_name(err, &products))?;

        match self.persist(order, method, client_ip).await {
            Ok(placed) => Ok(placed),
            Err(err) => {
                if let Err(release_err) = self.ledger.release(&stock_lines).await {
                    tracing::error!(error = %release_err, "failed to release stock after order failure");
                }
                Err(err)
            }
        }
    }

    async fn persist(
        &self,
        order: Order,
        method: PaymentMethod,
        client_ip: &str,
    ) -> Result<PlacedOrder> {
        if !method.uses_gateway() {
            self.store.insert_order(&order, None).await?;
            return Ok(PlacedOrder::CashOnDelivery { order });
        }

        let payment = Payment::pending(
            order.id(),
            method,
            Uuid::new_v4().simple().to_string(),
            order.created_at(),
        );
        let payment_url = self.gateway.build_redirect(&RedirectRequest {
            order_id: order.id(),
            transaction_ref: payment.transaction_id.clone(),
            amount: order.total_amount(),
            client_ip: client_ip.to_string(),
            created_at: order.created_at(),
        })?;

        self.store.insert_order(&order, Some(&payment)).await?;
        tracing::debug!(gateway = self.gateway.name(), "payment redirect built");

        Ok(PlacedOrder::Gateway {
            order,
            payment,
            payment_url,
        })
    }

    async fn restore_cart(&self, cart: Cart) {
        let user_id = cart.user_id();
        if let Err(err) = self.store.restore_cart(cart).await {
            tracing::error!(%user_id, error = %err, "failed to restore cart after order failure");
        }
    }
}

/// Replaces the product id in a stock error with the product's name.
fn with_product_name(err: CheckoutError, products: &HashMap<ProductId, Product>) -> CheckoutError {
    match err {
        CheckoutError::InsufficientStock {
            product_id,
            requested,
            available,
            ..
        } => CheckoutError::InsufficientStock {
            product_id,
            product_name: products
                .get(&product_id)
                .map(|product| product.name.clone())
                .unwrap_or_else(|| product_id.to_string()),
            requested,
            available,
        },
        other => other,
    }
}
