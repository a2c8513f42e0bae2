//! Order aggregate.

use chrono::{DateTime, Utc};
use common::{OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::{Money, PaymentMethod, RequestContext};

use super::{OrderError, OrderStatus, StatusPolicy};

/// A line of an order, snapshotted at creation time.
///
/// The unit price is copied from the product so later catalog price changes
/// never alter historical orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub product_name: String,
    pub unit_price: Money,
    pub quantity: u32,
}

impl OrderLine {
    pub fn new(
        product_id: ProductId,
        product_name: impl Into<String>,
        unit_price: Money,
        quantity: u32,
    ) -> Self {
        Self {
            product_id,
            product_name: product_name.into(),
            unit_price,
            quantity,
        }
    }

    /// Returns `unit_price × quantity`, or `None` on overflow.
    pub fn line_total(&self) -> Option<Money> {
        self.unit_price.checked_mul(self.quantity)
    }
}

/// A status transition computed from an observed order state.
///
/// Stores apply it as a compare-and-set: the write only happens if the order
/// is still in `from` with paid flag `was_paid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub order_id: OrderId,
    pub from: OrderStatus,
    pub was_paid: bool,
    pub to: OrderStatus,
    pub is_paid: bool,
}

impl StatusChange {
    /// Returns true if applying this change must return reserved stock.
    ///
    /// An order holds its stock in every status except Cancelled, so stock is
    /// released on entry into Cancelled.
    pub fn releases_stock(&self) -> bool {
        self.to == OrderStatus::Cancelled && self.from != OrderStatus::Cancelled
    }

    /// Returns true if applying this change must take the order's stock again.
    ///
    /// Reopening a cancelled order reserves its lines; the change fails if the
    /// stock is gone.
    pub fn reserves_stock(&self) -> bool {
        self.from == OrderStatus::Cancelled && self.to != OrderStatus::Cancelled
    }
}

/// Stored representation of an order, for storage backends.
#[derive(Debug, Clone)]
pub struct OrderParts {
    pub id: OrderId,
    pub user_id: UserId,
    pub lines: Vec<OrderLine>,
    pub total_amount: Money,
    pub status: OrderStatus,
    pub is_paid: bool,
    pub payment_method: PaymentMethod,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An immutable order snapshot. Only status and paid flag change after
/// creation, and only through [`StatusChange`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    user_id: UserId,
    lines: Vec<OrderLine>,
    total_amount: Money,
    status: OrderStatus,
    is_paid: bool,
    payment_method: PaymentMethod,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Order {
    /// Places a new order from snapshotted lines.
    ///
    /// The total is computed here, once, and never recomputed.
    pub fn place(
        user_id: UserId,
        lines: Vec<OrderLine>,
        payment_method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        if lines.is_empty() {
            return Err(OrderError::NoItems);
        }

        if let Some(line) = lines.iter().find(|line| line.quantity == 0) {
            return Err(OrderError::InvalidQuantity {
                quantity: line.quantity,
            });
        }

        let total_amount = Self::compute_total(&lines)?;
        if !total_amount.is_positive() {
            return Err(OrderError::InvalidAmount {
                amount: total_amount.amount(),
            });
        }

        Ok(Self {
            id: OrderId::new(),
            user_id,
            lines,
            total_amount,
            status: OrderStatus::Pending,
            is_paid: false,
            payment_method,
            created_at: now,
            updated_at: now,
        })
    }

    /// Sums `unit_price × quantity` over the lines.
    pub fn compute_total(lines: &[OrderLine]) -> Result<Money, OrderError> {
        lines.iter().try_fold(Money::zero(), |total, line| {
            line.line_total()
                .and_then(|line_total| total.checked_add(line_total))
                .ok_or(OrderError::AmountOverflow)
        })
    }

    /// Rebuilds an order from storage.
    pub fn from_parts(parts: OrderParts) -> Self {
        Self {
            id: parts.id,
            user_id: parts.user_id,
            lines: parts.lines,
            total_amount: parts.total_amount,
            status: parts.status,
            is_paid: parts.is_paid,
            payment_method: parts.payment_method,
            created_at: parts.created_at,
            updated_at: parts.updated_at,
        }
    }
}

// Query methods
impl Order {
    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn is_paid(&self) -> bool {
        self.is_paid
    }

    pub fn payment_method(&self) -> PaymentMethod {
        self.payment_method
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn belongs_to(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }
}

// Transition methods (return status changes)
impl Order {
    /// Buyer-initiated cancellation: only a Pending, unpaid order of the
    /// caller's own.
    pub fn cancel_by(&self, ctx: &RequestContext) -> Result<StatusChange, OrderError> {
        if !self.belongs_to(ctx.user_id) {
            return Err(OrderError::NotOwner);
        }

        if self.is_paid {
            return Err(OrderError::CannotCancelPaidOrder);
        }

        if !self.status.can_cancel() {
            return Err(OrderError::InvalidTransition {
                current: self.status,
                action: "cancel",
            });
        }

        Ok(self.change_to(OrderStatus::Cancelled, self.is_paid))
    }

    /// Admin-initiated status change, subject to `policy`.
    pub fn change_status(
        &self,
        to: OrderStatus,
        policy: StatusPolicy,
    ) -> Result<StatusChange, OrderError> {
        if !policy.allows(self.status, to) {
            return Err(OrderError::InvalidTransition {
                current: self.status,
                action: "change status",
            });
        }

        Ok(self.change_to(to, self.is_paid))
    }

    /// Successful gateway payment: Pending → Processing, paid.
    ///
    /// Bypasses the admin policy.
    pub fn confirm_payment(&self) -> Result<StatusChange, OrderError> {
        if self.is_paid || !self.status.can_accept_payment() {
            return Err(OrderError::InvalidTransition {
                current: self.status,
                action: "confirm payment",
            });
        }

        Ok(self.change_to(OrderStatus::Processing, true))
    }

    /// Gateway payment captured after an admin already moved the order on:
    /// marks it paid and keeps its status.
    pub fn mark_paid(&self) -> Result<StatusChange, OrderError> {
        if self.is_paid || self.status == OrderStatus::Cancelled {
            return Err(OrderError::InvalidTransition {
                current: self.status,
                action: "mark paid",
            });
        }

        Ok(self.change_to(self.status, true))
    }

    /// Expiry of an unpaid gateway order: Pending → Cancelled.
    pub fn expire(&self) -> Result<StatusChange, OrderError> {
        if self.is_paid || self.status != OrderStatus::Pending {
            return Err(OrderError::InvalidTransition {
                current: self.status,
                action: "expire",
            });
        }

        Ok(self.change_to(OrderStatus::Cancelled, false))
    }

    /// Returns true if the order is still in the state `change` was computed from.
    pub fn matches(&self, change: &StatusChange) -> bool {
        self.id == change.order_id && self.status == change.from && self.is_paid == change.was_paid
    }

    /// Applies a status change. Callers check [`Order::matches`] first.
    pub fn apply(&mut self, change: &StatusChange, now: DateTime<Utc>) {
        self.status = change.to;
        self.is_paid = change.is_paid;
        self.updated_at = now;
    }

    fn change_to(&self, to: OrderStatus, is_paid: bool) -> StatusChange {
        StatusChange {
            order_id: self.id,
            from: self.status,
            was_paid: self.is_paid,
            to,
            is_paid,
        }
    }
}
