//! Cart endpoints for the authenticated caller.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use checkout::{CartView, PaymentGateway, RemoveOutcome};
use common::ProductId;
use domain::Cart;
use serde::{Deserialize, Serialize};
use store::Store;

use crate::AppState;
use crate::auth::Caller;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct AddItemRequest {
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Serialize)]
pub struct RemoveItemResponse {
    pub cart: Option<Cart>,
    pub message: &'static str,
}

/// POST /cart/items: add a product to the caller's cart.
#[tracing::instrument(skip_all, fields(user_id = %ctx.user_id))]
pub async fn add_item<S: Store, G: PaymentGateway>(
    State(state): State<Arc<AppState<S, G>>>,
    Caller(ctx): Caller,
    Json(req): Json<AddItemRequest>,
) -> Result<Json<Cart>, ApiError> {
    let product_id = parse_product_id(&req.product_id)?;
    let cart = state.carts.add_item(&ctx, product_id, req.quantity).await?;
    Ok(Json(cart))
}

/// GET /cart: the caller's cart with current prices.
pub async fn view<S: Store, G: PaymentGateway>(
    State(state): State<Arc<AppState<S, G>>>,
    Caller(ctx): Caller,
) -> Result<Json<CartView>, ApiError> {
    Ok(Json(state.carts.view(&ctx).await?))
}

/// DELETE /cart/items/{product_id}: remove one line from the cart.
#[tracing::instrument(skip_all, fields(user_id = %ctx.user_id))]
pub async fn remove_item<S: Store, G: PaymentGateway>(
    State(state): State<Arc<AppState<S, G>>>,
    Caller(ctx): Caller,
    Path(product_id): Path<String>,
) -> Result<Json<RemoveItemResponse>, ApiError> {
    let product_id = parse_product_id(&product_id)?;
    let response = match state.carts.remove_item(&ctx, product_id).await? {
        RemoveOutcome::Remaining(cart) => RemoveItemResponse {
            cart: Some(cart),
            message: "Item removed",
        },
        RemoveOutcome::Empty => RemoveItemResponse {
            cart: None,
            message: "Cart deleted",
        },
    };
    Ok(Json(response))
}

fn parse_product_id(raw: &str) -> Result<ProductId, ApiError> {
    raw.parse()
        .map_err(|e: common::ParseIdError| ApiError::BadRequest(e.to_string()))
}
