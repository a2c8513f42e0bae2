//! Payment gateway return endpoint.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::Redirect;
use checkout::{CallbackParams, PaymentGateway};
use store::Store;

use crate::AppState;

/// GET /payments/vnpay/return: the buyer's browser lands here after paying.
///
/// Always answers with a 303 to the client result page; the outcome travels
/// in the query string.
#[tracing::instrument(skip_all, fields(txn_ref = params.get("vnp_TxnRef").unwrap_or_default()))]
pub async fn vnpay_return<S: Store, G: PaymentGateway>(
    State(state): State<Arc<AppState<S, G>>>,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    let redirect = state.callbacks.handle(&params).await;
    Redirect::to(redirect.location())
}
