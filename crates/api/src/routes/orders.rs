//! Order placement, cancellation, status and listing endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use checkout::{PaymentGateway, PlacedOrder};
use common::OrderId;
use domain::{Order, OrderStatus, PaymentMethod};
use serde::{Deserialize, Serialize};
use store::{OrderQuery, Page, Store};

use crate::AppState;
use crate::auth::{Caller, client_ip};
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    #[serde(alias = "payment_method")]
    pub method: PaymentMethod,
}

#[derive(Deserialize)]
pub struct ChangeStatusRequest {
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListOrdersParams {
    pub status: Option<String>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

impl ListOrdersParams {
    fn into_query(self) -> Result<OrderQuery, ApiError> {
        let mut query = OrderQuery::new();
        if let Some(status) = self.status.filter(|s| !s.trim().is_empty()) {
            query = query.status(parse_status(&status)?);
        }
        if let Some(page) = self.page {
            query = query.page(page);
        }
        if let Some(limit) = self.limit {
            query = query.limit(limit);
        }
        Ok(query)
    }
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderPageResponse {
    pub items: Vec<Order>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub total_pages: usize,
}

impl From<Page<Order>> for OrderPageResponse {
    fn from(page: Page<Order>) -> Self {
        let total_pages = page.total_pages();
        Self {
            items: page.items,
            total: page.total,
            page: page.page,
            limit: page.limit,
            total_pages,
        }
    }
}

// -- Handlers --

/// POST /orders: place an order from the caller's cart.
#[tracing::instrument(skip_all, fields(user_id = %ctx.user_id))]
pub async fn create<S: Store, G: PaymentGateway>(
    State(state): State<Arc<AppState<S, G>>>,
    Caller(ctx): Caller,
    headers: HeaderMap,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<PlacedOrder>), ApiError> {
    let placed = state
        .orders
        .create_order(&ctx, req.method, &client_ip(&headers))
        .await?;
    Ok((StatusCode::CREATED, Json(placed)))
}

/// GET /orders: the caller's own orders, newest first.
pub async fn list<S: Store, G: PaymentGateway>(
    State(state): State<Arc<AppState<S, G>>>,
    Caller(ctx): Caller,
) -> Result<Json<Vec<Order>>, ApiError> {
    Ok(Json(state.statuses.list_for_user(&ctx).await?))
}

/// PUT /orders/{id}/cancel: cancel one of the caller's unpaid orders.
#[tracing::instrument(skip_all, fields(user_id = %ctx.user_id, order_id = %id))]
pub async fn cancel<S: Store, G: PaymentGateway>(
    State(state): State<Arc<AppState<S, G>>>,
    Caller(ctx): Caller,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    Ok(Json(state.statuses.cancel(&ctx, order_id).await?))
}

/// PUT /orders/{id}/status: admin status override.
#[tracing::instrument(skip_all, fields(user_id = %ctx.user_id, order_id = %id))]
pub async fn change_status<S: Store, G: PaymentGateway>(
    State(state): State<Arc<AppState<S, G>>>,
    Caller(ctx): Caller,
    Path(id): Path<String>,
    Json(req): Json<ChangeStatusRequest>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let status = parse_status(&req.status)?;
    Ok(Json(
        state.statuses.change_status(&ctx, order_id, status).await?,
    ))
}

/// GET /admin/orders: every order, filtered and paged.
pub async fn list_all<S: Store, G: PaymentGateway>(
    State(state): State<Arc<AppState<S, G>>>,
    Caller(ctx): Caller,
    Query(params): Query<ListOrdersParams>,
) -> Result<Json<OrderPageResponse>, ApiError> {
    let query = params.into_query()?;
    let page = state.statuses.list_all(&ctx, &query).await?;
    Ok(Json(page.into()))
}

fn parse_order_id(raw: &str) -> Result<OrderId, ApiError> {
    raw.parse()
        .map_err(|e: common::ParseIdError| ApiError::BadRequest(e.to_string()))
}

fn parse_status(raw: &str) -> Result<OrderStatus, ApiError> {
    raw.parse().map_err(ApiError::BadRequest)
}
