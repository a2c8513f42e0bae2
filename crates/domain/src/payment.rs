//! Payment records for gateway orders.

use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId};
use serde::{Deserialize, Serialize};

/// How the buyer pays for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    /// Cash on delivery; no gateway step.
    #[serde(rename = "cod", alias = "COD")]
    CashOnDelivery,

    /// Prepaid through the external payment gateway.
    #[serde(rename = "gateway", alias = "vnpay", alias = "VNPAY")]
    Gateway,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::CashOnDelivery => "cod",
            PaymentMethod::Gateway => "gateway",
        }
    }

    /// Returns true if the order needs a gateway redirect and payment record.
    pub fn uses_gateway(&self) -> bool {
        matches!(self, PaymentMethod::Gateway)
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cod" | "COD" => Ok(PaymentMethod::CashOnDelivery),
            "gateway" | "vnpay" | "VNPAY" => Ok(PaymentMethod::Gateway),
            other => Err(format!("unknown payment method: {other}")),
        }
    }
}

/// Settlement state of a payment.
///
/// ```text
/// Pending ──┬──► Completed
///           └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Completed => "Completed",
            PaymentStatus::Failed => "Failed",
        }
    }

    /// Returns true once the gateway result has been recorded.
    pub fn is_settled(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(PaymentStatus::Pending),
            "Completed" => Ok(PaymentStatus::Completed),
            "Failed" => Ok(PaymentStatus::Failed),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

/// A payment attempt, one per gateway order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    /// Our transaction reference, sent to the gateway as `vnp_TxnRef`.
    pub transaction_id: String,
    /// Transaction number assigned by the gateway, known after the callback.
    pub gateway_transaction_no: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Creates a pending payment for an order.
    pub fn pending(
        order_id: OrderId,
        method: PaymentMethod,
        transaction_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PaymentId::new(),
            order_id,
            method,
            status: PaymentStatus::Pending,
            transaction_id: transaction_id.into(),
            gateway_transaction_no: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_serde_accepts_aliases() {
        let cod: PaymentMethod = serde_json::from_str("\"COD\"").unwrap();
        let gateway: PaymentMethod = serde_json::from_str("\"vnpay\"").unwrap();
        assert_eq!(cod, PaymentMethod::CashOnDelivery);
        assert_eq!(gateway, PaymentMethod::Gateway);
        assert_eq!(serde_json::to_string(&cod).unwrap(), "\"cod\"");
    }

    #[test]
    fn test_pending_payment() {
        let payment = Payment::pending(OrderId::new(), PaymentMethod::Gateway, "TX1", Utc::now());
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert!(!payment.status.is_settled());
        assert!(payment.gateway_transaction_no.is_none());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Completed,
            PaymentStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<PaymentStatus>().unwrap(), status);
        }
    }
}
