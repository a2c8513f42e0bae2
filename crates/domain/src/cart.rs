//! Cart aggregate.

use chrono::{DateTime, Utc};
use common::{ProductId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by cart rules.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CartError {
    /// Quantities must be positive.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// Summing the quantities of a line would overflow.
    #[error("Quantity for product {product_id} is too large")]
    QuantityOverflow { product_id: ProductId },
}

/// One (product, quantity) pair in a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// The pending line items of a single user.
///
/// A user owns at most one cart. A cart with no items is never persisted;
/// storage backends delete it instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    user_id: UserId,
    items: Vec<CartItem>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Cart {
    /// Creates an empty cart for a user.
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            items: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuilds a cart from stored parts.
    pub fn from_parts(
        user_id: UserId,
        items: Vec<CartItem>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            items,
            created_at,
            updated_at,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Line items in the order they were first added.
    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the line for a product, if present.
    pub fn get_item(&self, product_id: &ProductId) -> Option<&CartItem> {
        self.items.iter().find(|item| &item.product_id == product_id)
    }

    /// Returns the total quantity over all lines.
    pub fn total_quantity(&self) -> u64 {
        self.items.iter().map(|item| u64::from(item.quantity)).sum()
    }

    /// Adds `quantity` units of a product.
    ///
    /// Repeated additions of the same product sum into one line.
    pub fn add_item(
        &mut self,
        product_id: ProductId,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<(), CartError> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity { quantity });
        }

        if let Some(existing) = self
            .items
            .iter_mut()
            .find(|item| item.product_id == product_id)
        {
            existing.quantity = existing
                .quantity
                .checked_add(quantity)
                .ok_or(CartError::QuantityOverflow { product_id })?;
        } else {
            self.items.push(CartItem {
                product_id,
                quantity,
            });
        }

        self.updated_at = now;
        Ok(())
    }

    /// Removes the line for a product. Returns false if it was not present.
    pub fn remove_item(&mut self, product_id: &ProductId, now: DateTime<Utc>) -> bool {
        let before = self.items.len();
        self.items.retain(|item| &item.product_id != product_id);
        let removed = self.items.len() != before;
        if removed {
            self.updated_at = now;
        }
        removed
    }

    /// Folds another cart's lines into this one.
    ///
    /// Used to put a claimed cart back after a failed checkout when the user
    /// has started a new cart in the meantime.
    pub fn merge(&mut self, other: &Cart, now: DateTime<Utc>) -> Result<(), CartError> {
        for item in &other.items {
            self.add_item(item.product_id, item.quantity, now)?;
        }
        self.created_at = self.created_at.min(other.created_at);
        Ok(())
    }
}
