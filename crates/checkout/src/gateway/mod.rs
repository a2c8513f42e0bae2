//! Payment gateway seam and the VNPAY adapter.

mod signature;
mod vnpay;

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use common::OrderId;
use domain::Money;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use signature::{SECURE_HASH, SECURE_HASH_TYPE, Signer, canonicalize};
pub use vnpay::{VnPayConfig, VnPayGateway};

/// Errors raised while building or verifying gateway messages.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The callback signature does not match its parameters.
    #[error("Invalid signature")]
    InvalidSignature,

    /// A required callback field is missing or unparsable.
    #[error("Malformed callback: {0}")]
    MalformedCallback(String),

    /// The amount cannot be sent to the gateway.
    #[error("Invalid payment amount: {0}")]
    InvalidAmount(Money),

    /// The adapter is misconfigured.
    #[error("Gateway configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// Returns true for errors caused by an untrusted callback.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            GatewayError::InvalidSignature | GatewayError::MalformedCallback(_)
        )
    }
}

/// What the gateway needs to start a payment.
#[derive(Debug, Clone)]
pub struct RedirectRequest {
    pub order_id: OrderId,
    /// Unique per payment attempt. Echoed back in the callback.
    pub transaction_ref: String,
    pub amount: Money,
    pub client_ip: String,
    pub created_at: DateTime<Utc>,
}

/// A signed URL that sends the buyer to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RedirectUrl(String);

impl RedirectUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for RedirectUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw query parameters of a gateway callback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct CallbackParams(BTreeMap<String, String>);

impl CallbackParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub(crate) fn require(&self, key: &str) -> Result<&str, GatewayError> {
        self.get(key)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| GatewayError::MalformedCallback(format!("missing {key}")))
    }
}

impl<K, V> FromIterator<(K, V)> for CallbackParams
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<HashMap<String, String>> for CallbackParams {
    fn from(map: HashMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

/// A verified callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackOutcome {
    pub order_id: OrderId,
    pub transaction_ref: String,
    pub response_code: String,
    pub gateway_transaction_no: Option<String>,
    pub amount: Money,
}

impl CallbackOutcome {
    pub const SUCCESS_CODE: &'static str = "00";

    pub fn is_success(&self) -> bool {
        self.response_code == Self::SUCCESS_CODE
    }
}

/// A redirect-based payment provider.
pub trait PaymentGateway: Send + Sync + 'static {
    /// Provider name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Builds the signed redirect URL for one payment attempt.
    fn build_redirect(&self, request: &RedirectRequest) -> Result<RedirectUrl, GatewayError>;

    /// Checks the signature of a callback and extracts its outcome.
    ///
    /// Fails closed: any signature mismatch is
    /// [`GatewayError::InvalidSignature`].
    fn verify_callback(&self, params: &CallbackParams) -> Result<CallbackOutcome, GatewayError>;
}
