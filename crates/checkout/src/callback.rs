//! Gateway return handling.

use std::sync::Arc;

use common::OrderId;
use domain::{Order, Payment, PaymentStatus, StatusChange};
use store::{PaymentSettlement, Store, StoreError};

use crate::error::{CheckoutError, ErrorKind, Result};
use crate::gateway::{CallbackOutcome, CallbackParams, PaymentGateway};

/// Status shown on the client's payment result page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    Success,
    Failed,
    Error,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Success => "success",
            ResultStatus::Failed => "failed",
            ResultStatus::Error => "error",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            ResultStatus::Success => "Payment Successful",
            ResultStatus::Failed => "Payment Failed",
            ResultStatus::Error => "Payment could not be verified",
        }
    }
}

/// Where to send the buyer after a gateway callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentResultRedirect {
    pub status: ResultStatus,
    pub order_id: Option<OrderId>,
    pub message: String,
    location: String,
}

impl PaymentResultRedirect {
    fn new(result_page: &str, status: ResultStatus, order_id: Option<OrderId>, message: String) -> Self {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.append_pair("status", status.as_str());
        if let Some(order_id) = order_id {
            query.append_pair("orderId", &order_id.to_string());
        }
        query.append_pair("message", &message);

        let separator = if result_page.contains('?') { '&' } else { '?' };
        let location = format!("{result_page}{separator}{}", query.finish());

        Self {
            status,
            order_id,
            message,
            location,
        }
    }

    /// Full URL of the result page, including the query.
    pub fn location(&self) -> &str {
        &self.location
    }
}

/// Applies verified gateway callbacks to payments and orders.
pub struct PaymentCallbackHandler<S, G> {
    store: S,
    gateway: Arc<G>,
    result_page: String,
}

impl<S, G> Clone for PaymentCallbackHandler<S, G>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            gateway: Arc::clone(&self.gateway),
            result_page: self.result_page.clone(),
        }
    }
}

impl<S, G> PaymentCallbackHandler<S, G>
where
    S: Store,
    G: PaymentGateway,
{
    pub fn new(store: S, gateway: Arc<G>, result_page: impl Into<String>) -> Self {
        Self {
            store,
            gateway,
            result_page: result_page.into(),
        }
    }

    /// Verifies and applies a callback. Never fails: rejected or broken
    /// callbacks produce an error redirect and change nothing.
    #[tracing::instrument(skip_all, fields(gateway = self.gateway.name()))]
    pub async fn handle(&self, params: &CallbackParams) -> PaymentResultRedirect {
        let order_id = params
            .get("vnp_OrderInfo")
            .and_then(|raw| raw.parse::<OrderId>().ok());

        match self.process(params).await {
            Ok((status, order_id, outcome)) => {
                metrics::counter!("payment_callbacks_total", "outcome" => outcome).increment(1);
                tracing::info!(%order_id, status = status.as_str(), outcome, "payment callback applied");
                PaymentResultRedirect::new(
                    &self.result_page,
                    status,
                    Some(order_id),
                    status.message().to_string(),
                )
            }
            Err(err) => {
                metrics::counter!("payment_callbacks_total", "outcome" => "error").increment(1);
                let message = match err.kind() {
                    ErrorKind::Internal => {
                        tracing::error!(error = %err, "payment callback failed");
                        ResultStatus::Error.message().to_string()
                    }
                    _ => {
                        tracing::warn!(error = %err, "payment callback rejected");
                        err.to_string()
                    }
                };
                PaymentResultRedirect::new(&self.result_page, ResultStatus::Error, order_id, message)
            }
        }
    }

    async fn process(
        &self,
        params: &CallbackParams,
    ) -> Result<(ResultStatus, OrderId, &'static str)> {
        let outcome = self.gateway.verify_callback(params)?;

        let order = self
            .store
            .get_order(outcome.order_id)
            .await?
            .ok_or(CheckoutError::OrderNotFound(outcome.order_id))?;
        let payment = self
            .store
            .get_payment_for_order(order.id())
            .await?
            .ok_or_else(|| CheckoutError::NotFound {
                entity: "Payment",
                id: order.id().to_string(),
            })?;

        check_matches(&order, &payment, &outcome)?;

        if payment.status.is_settled() {
            return Ok((recorded_status(&payment), order.id(), "duplicate"));
        }

        let settlement = if outcome.is_success() {
            PaymentSettlement {
                order_id: order.id(),
                status: PaymentStatus::Completed,
                gateway_transaction_no: outcome.gateway_transaction_no.clone(),
                order_change: Some(paid_change(&order, &outcome)?),
            }
        } else {
            PaymentSettlement {
                order_id: order.id(),
                status: PaymentStatus::Failed,
                gateway_transaction_no: outcome.gateway_transaction_no.clone(),
                order_change: None,
            }
        };

        match self.store.settle_payment(&settlement).await {
            Ok(settled) => {
                let status = recorded_status(&settled);
                Ok((status, order.id(), status.as_str()))
            }
            Err(StoreError::Conflict(reason)) => {
                // A concurrent callback or the sweeper got there first.
                let current = self
                    .store
                    .get_payment_for_order(order.id())
                    .await?
                    .filter(|payment| payment.status.is_settled())
                    .ok_or(CheckoutError::Conflict(reason))?;
                Ok((recorded_status(&current), order.id(), "duplicate"))
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn check_matches(order: &Order, payment: &Payment, outcome: &CallbackOutcome) -> Result<()> {
    if payment.transaction_id != outcome.transaction_ref {
        return Err(CheckoutError::Conflict(format!(
            "transaction reference {} does not belong to order {}",
            outcome.transaction_ref,
            order.id()
        )));
    }
    if outcome.amount != order.total_amount() {
        return Err(CheckoutError::InvalidAmount(outcome.amount));
    }
    Ok(())
}

/// The order update for a captured payment. An order an admin already moved
/// past Pending keeps its status and only becomes paid.
fn paid_change(order: &Order, outcome: &CallbackOutcome) -> Result<StatusChange> {
    if order.status().can_accept_payment() {
        return Ok(order.confirm_payment()?);
    }

    tracing::warn!(
        order_id = %order.id(),
        status = %order.status(),
        "payment captured after the order left Pending"
    );
    order.mark_paid().map_err(|err| {
        tracing::error!(
            order_id = %order.id(),
            status = %order.status(),
            gateway_transaction_no = ?outcome.gateway_transaction_no,
            "captured payment cannot be recorded against the order"
        );
        err.into()
    })
}

fn recorded_status(payment: &Payment) -> ResultStatus {
    match payment.status {
        PaymentStatus::Completed => ResultStatus::Success,
        PaymentStatus::Failed => ResultStatus::Failed,
        PaymentStatus::Pending => ResultStatus::Error,
    }
}
