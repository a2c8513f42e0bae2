//! Cart operations for the requesting user.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{ProductId, UserId};
use domain::{Cart, Money, Product, RequestContext};
use serde::Serialize;
use store::{CartStore, ProductStore};

use crate::error::{CheckoutError, Result};

/// A cart line with its product resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartLineView {
    pub product_id: ProductId,
    pub name: String,
    pub unit_price: Money,
    pub image_url: Option<String>,
    pub quantity: u32,
    pub line_total: Money,
    /// False once the product has been deactivated.
    pub available: bool,
}

/// A cart as shown to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartView {
    pub user_id: UserId,
    pub items: Vec<CartLineView>,
    pub total: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of removing a cart line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// Lines remain in the cart.
    Remaining(Cart),
    /// The user has no cart any more.
    Empty,
}

#[derive(Debug, Clone)]
pub struct CartService<S> {
    store: S,
}

impl<S> CartService<S>
where
    S: CartStore + ProductStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Adds `quantity` of a product, creating the cart or summing into an
    /// existing line.
    #[tracing::instrument(skip(self, ctx), fields(user_id = %ctx.user_id))]
    pub async fn add_item(
        &self,
        ctx: &RequestContext,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Cart> {
        if quantity == 0 {
            return Err(CheckoutError::InvalidQuantity { quantity });
        }

        let product = self
            .store
            .get_product(product_id)
            .await?
            .filter(Product::is_available)
            .ok_or(CheckoutError::ProductUnavailable(product_id))?;

        let cart = self
            .store
            .add_cart_item(ctx.user_id, product.id, quantity)
            .await?;
        tracing::debug!(items = cart.items().len(), "cart updated");
        Ok(cart)
    }

    #[tracing::instrument(skip(self, ctx), fields(user_id = %ctx.user_id))]
    pub async fn view(&self, ctx: &RequestContext) -> Result<CartView> {
        let cart = self
            .store
            .get_cart(ctx.user_id)
            .await?
            .ok_or(CheckoutError::CartNotFound)?;

        let ids: Vec<ProductId> = cart.items().iter().map(|item| item.product_id).collect();
        let products: HashMap<ProductId, Product> = self
            .store
            .get_products(&ids)
            .await?
            .into_iter()
            .map(|product| (product.id, product))
            .collect();

        let mut items = Vec::with_capacity(cart.items().len());
        let mut total = Money::zero();
        for item in cart.items() {
            let Some(product) = products.get(&item.product_id) else {
                tracing::warn!(product_id = %item.product_id, "cart references a missing product");
                continue;
            };
            let line_total = product
                .price
                .checked_mul(item.quantity)
                .ok_or(CheckoutError::AmountOverflow)?;
            total = total
                .checked_add(line_total)
                .ok_or(CheckoutError::AmountOverflow)?;

            items.push(CartLineView {
                product_id: product.id,
                name: product.name.clone(),
                unit_price: product.price,
                image_url: product.image_url.clone(),
                quantity: item.quantity,
                line_total,
                available: product.is_available(),
            });
        }

        Ok(CartView {
            user_id: cart.user_id(),
            items,
            total,
            created_at: cart.created_at(),
            updated_at: cart.updated_at(),
        })
    }

    /// Removes a line. Succeeds whether or not the line was there.
    #[tracing::instrument(skip(self, ctx), fields(user_id = %ctx.user_id))]
    pub async fn remove_item(
        &self,
        ctx: &RequestContext,
        product_id: ProductId,
    ) -> Result<RemoveOutcome> {
        Ok(
            match self.store.remove_cart_item(ctx.user_id, product_id).await? {
                Some(cart) => RemoveOutcome::Remaining(cart),
                None => RemoveOutcome::Empty,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use domain::ProductStatus;
    use store::InMemoryStore;

    use super::*;

    fn product(name: &str, price: i64, status: ProductStatus) -> Product {
        Product {
            id: ProductId::new(),
            name: name.to_string(),
            price: Money::new(price),
            stock: 10,
            status,
            image_url: Some(format!("https://cdn.example.com/{name}.png")),
        }
    }

    async fn setup() -> (CartService<InMemoryStore>, Product, Product, RequestContext) {
        let serum = product("serum", 100_000, ProductStatus::Active);
        let retired = product("retired", 50_000, ProductStatus::Inactive);
        let store = InMemoryStore::with_products([serum.clone(), retired.clone()]).await;
        (
            CartService::new(store),
            serum,
            retired,
            RequestContext::customer(UserId::new()),
        )
    }

    #[tokio::test]
    async fn test_add_same_product_twice_sums_quantity() {
        let (service, serum, _, ctx) = setup().await;

        service.add_item(&ctx, serum.id, 1).await.unwrap();
        let cart = service.add_item(&ctx, serum.id, 2).await.unwrap();

        assert_eq!(cart.items().len(), 1);
        assert_eq!(cart.items()[0].quantity, 3);
    }

    #[tokio::test]
    async fn test_add_rejects_zero_and_unavailable_products() {
        let (service, serum, retired, ctx) = setup().await;

        assert!(matches!(
            service.add_item(&ctx, serum.id, 0).await,
            Err(CheckoutError::InvalidQuantity { quantity: 0 })
        ));
        assert!(matches!(
            service.add_item(&ctx, retired.id, 1).await,
            Err(CheckoutError::ProductUnavailable(id)) if id == retired.id
        ));
        assert!(matches!(
            service.add_item(&ctx, ProductId::new(), 1).await,
            Err(CheckoutError::ProductUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_view_resolves_products() {
        let (service, serum, _, ctx) = setup().await;
        service.add_item(&ctx, serum.id, 2).await.unwrap();

        let view = service.view(&ctx).await.unwrap();
        assert_eq!(view.items.len(), 1);
        assert_eq!(view.items[0].name, "serum");
        assert_eq!(view.items[0].unit_price, Money::new(100_000));
        assert_eq!(view.items[0].line_total, Money::new(200_000));
        assert!(view.items[0].image_url.is_some());
        assert_eq!(view.total, Money::new(200_000));
    }

    #[tokio::test]
    async fn test_view_without_cart_is_not_found() {
        let (service, _, _, ctx) = setup().await;
        assert!(matches!(
            service.view(&ctx).await,
            Err(CheckoutError::CartNotFound)
        ));
    }

    #[tokio::test]
    async fn test_removing_last_item_deletes_cart() {
        let (service, serum, _, ctx) = setup().await;
        service.add_item(&ctx, serum.id, 1).await.unwrap();

        let outcome = service.remove_item(&ctx, serum.id).await.unwrap();
        assert_eq!(outcome, RemoveOutcome::Empty);
        assert!(matches!(
            service.view(&ctx).await,
            Err(CheckoutError::CartNotFound)
        ));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (service, serum, _, ctx) = setup().await;

        assert_eq!(
            service.remove_item(&ctx, serum.id).await.unwrap(),
            RemoveOutcome::Empty
        );

        service.add_item(&ctx, serum.id, 1).await.unwrap();
        let outcome = service.remove_item(&ctx, ProductId::new()).await.unwrap();
        assert!(matches!(outcome, RemoveOutcome::Remaining(cart) if cart.items().len() == 1));
    }
}
