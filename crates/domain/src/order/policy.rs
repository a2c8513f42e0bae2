//! Admin status-change policy.

use serde::{Deserialize, Serialize};

use super::OrderStatus;

/// Which admin-initiated status changes are accepted.
///
/// Every admin transition goes through [`StatusPolicy::allows`], so
/// tightening the rules is a configuration change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusPolicy {
    /// Any status may be set from any status.
    #[default]
    Permissive,

    /// Follow the lifecycle graph: no exit from terminal states and no
    /// skipping from Pending straight to Shipped or Completed.
    Strict,
}

impl StatusPolicy {
    /// Returns true if an admin may move an order from `from` to `to`.
    pub fn allows(&self, from: OrderStatus, to: OrderStatus) -> bool {
        match self {
            StatusPolicy::Permissive => true,
            StatusPolicy::Strict => matches!(
                (from, to),
                (OrderStatus::Pending, OrderStatus::Processing | OrderStatus::Cancelled)
                    | (OrderStatus::Processing, OrderStatus::Shipped | OrderStatus::Cancelled)
                    | (OrderStatus::Shipped, OrderStatus::Completed)
            ),
        }
    }
}

impl std::str::FromStr for StatusPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "permissive" => Ok(StatusPolicy::Permissive),
            "strict" => Ok(StatusPolicy::Strict),
            other => Err(format!("unknown status policy: {other}")),
        }
    }
}
