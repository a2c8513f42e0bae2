//! Stock reservation and release.

use store::{ProductStore, StockLine, StoreError};

use crate::error::Result;

/// All-or-nothing stock reservation over a [`ProductStore`].
///
/// Each line is a conditional decrement in the store; a reservation that
/// cannot be satisfied in full leaves every product untouched.
#[derive(Debug, Clone)]
pub struct InventoryLedger<S> {
    store: S,
}

impl<S> InventoryLedger<S>
where
    S: ProductStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn reserve(&self, lines: &[StockLine]) -> Result<()> {
        match self.store.reserve_stock(lines).await {
            Ok(()) => {
                metrics::counter!("stock_reservations_total", "outcome" => "reserved").increment(1);
                Ok(())
            }
            Err(err) => {
                let outcome = match err {
                    StoreError::InsufficientStock { .. } => "insufficient",
                    StoreError::NotFound { .. } => "unknown_product",
                    _ => "error",
                };
                metrics::counter!("stock_reservations_total", "outcome" => outcome).increment(1);
                tracing::warn!(error = %err, outcome, "stock reservation rejected");
                Err(err.into())
            }
        }
    }

    /// Returns stock taken by an earlier reservation.
    #[tracing::instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn release(&self, lines: &[StockLine]) -> Result<()> {
        self.store.release_stock(lines).await?;
        metrics::counter!("stock_reservations_total", "outcome" => "released").increment(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use common::ProductId;
    use domain::{Money, Product, ProductStatus};
    use store::InMemoryStore;

    use super::*;
    use crate::error::CheckoutError;

    fn product(stock: u32) -> Product {
        Product {
            id: ProductId::new(),
            name: "Serum".to_string(),
            price: Money::new(100_000),
            stock,
            status: ProductStatus::Active,
            image_url: None,
        }
    }

    #[tokio::test]
    async fn test_reserve_decrements_every_line() {
        let a = product(5);
        let b = product(2);
        let store = InMemoryStore::with_products([a.clone(), b.clone()]).await;
        let ledger = InventoryLedger::new(store.clone());

        ledger
            .reserve(&[StockLine::new(a.id, 2), StockLine::new(b.id, 2)])
            .await
            .unwrap();

        assert_eq!(store.stock_of(a.id).await, Some(3));
        assert_eq!(store.stock_of(b.id).await, Some(0));
    }

    #[tokio::test]
    async fn test_failed_reservation_changes_nothing() {
        let a = product(5);
        let b = product(1);
        let store = InMemoryStore::with_products([a.clone(), b.clone()]).await;
        let ledger = InventoryLedger::new(store.clone());

        let err = ledger
            .reserve(&[StockLine::new(a.id, 2), StockLine::new(b.id, 2)])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CheckoutError::InsufficientStock {
                requested: 2,
                available: 1,
                ..
            }
        ));
        assert_eq!(store.stock_of(a.id).await, Some(5));
        assert_eq!(store.stock_of(b.id).await, Some(1));
    }

    #[tokio::test]
    async fn test_release_restores_stock() {
        let a = product(5);
        let store = InMemoryStore::with_products([a.clone()]).await;
        let ledger = InventoryLedger::new(store.clone());

        let lines = [StockLine::new(a.id, 4)];
        ledger.reserve(&lines).await.unwrap();
        ledger.release(&lines).await.unwrap();

        assert_eq!(store.stock_of(a.id).await, Some(5));
    }
}
