//! HTTP API server for the storefront checkout.
//!
//! Exposes the cart, order and payment-return endpoints over the checkout
//! services, with structured logging (tracing) and Prometheus metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod seed;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post, put};
use checkout::{
    CartService, OrderFactory, OrderStatusService, PaymentCallbackHandler, PaymentGateway,
};
use domain::StatusPolicy;
use metrics_exporter_prometheus::PrometheusHandle;
use store::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<S, G> {
    pub carts: CartService<S>,
    pub orders: OrderFactory<S, G>,
    pub statuses: OrderStatusService<S>,
    pub callbacks: PaymentCallbackHandler<S, G>,
}

impl<S: Store, G: PaymentGateway> AppState<S, G> {
    /// Wires every checkout service to one store and gateway.
    pub fn new(
        store: S,
        gateway: Arc<G>,
        policy: StatusPolicy,
        result_page: impl Into<String>,
    ) -> Self {
        Self {
            carts: CartService::new(store.clone()),
            orders: OrderFactory::new(store.clone(), Arc::clone(&gateway)),
            statuses: OrderStatusService::new(store.clone(), policy),
            callbacks: PaymentCallbackHandler::new(store, gateway, result_page),
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store, G: PaymentGateway>(
    state: Arc<AppState<S, G>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/cart", get(routes::cart::view::<S, G>))
        .route("/cart/items", post(routes::cart::add_item::<S, G>))
        .route(
            "/cart/items/{product_id}",
            delete(routes::cart::remove_item::<S, G>),
        )
        .route(
            "/orders",
            post(routes::orders::create::<S, G>).get(routes::orders::list::<S, G>),
        )
        .route("/orders/{id}/cancel", put(routes::orders::cancel::<S, G>))
        .route(
            "/orders/{id}/status",
            put(routes::orders::change_status::<S, G>),
        )
        .route("/admin/orders", get(routes::orders::list_all::<S, G>))
        .route(
            "/payments/vnpay/return",
            get(routes::payments::vnpay_return::<S, G>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
