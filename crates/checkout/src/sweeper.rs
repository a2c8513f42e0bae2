//! Expiry of unpaid gateway orders.
//!
//! The `ExpirySweeper` runs as a background task, cancelling gateway orders
//! whose payment window closed without a callback and returning their stock.

use std::time::Duration;

use chrono::{DateTime, Utc};
use store::{Store, StoreError};
use tokio::task::JoinHandle;

use crate::error::Result;

/// Background task that expires stale unpaid gateway orders.
pub struct ExpirySweeper<S> {
    store: S,
    ttl: chrono::Duration,
    interval: Duration,
    batch_size: usize,
}

impl<S: Store> ExpirySweeper<S> {
    /// Creates a sweeper that expires orders whose payment has been pending
    /// for longer than `ttl`.
    pub fn new(store: S, ttl: chrono::Duration) -> Self {
        Self {
            store,
            ttl,
            interval: Duration::from_secs(60),
            batch_size: 100,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Spawns the sweeper as a background task.
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;

                match self.sweep_once(Utc::now()).await {
                    Ok(0) => {}
                    Ok(expired) => {
                        tracing::info!(expired, "expired unpaid gateway orders");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "expiry sweep failed");
                    }
                }
            }
        })
    }

    /// Runs one sweep as of `now`. Returns the number of orders expired.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - self.ttl;
        let mut expired = 0;

        loop {
            let batch = self
                .store
                .find_expired_orders(cutoff, self.batch_size)
                .await?;
            let full_batch = batch.len() == self.batch_size;
            let mut progressed = false;

            for order in batch {
                let Ok(change) = order.expire() else {
                    continue;
                };
                match self.store.apply_status_change(&change).await {
                    Ok(_) => {
                        expired += 1;
                        progressed = true;
                        metrics::counter!("orders_expired_total").increment(1);
                        tracing::info!(order_id = %order.id(), "order expired");
                    }
                    // Paid or cancelled since it was listed.
                    Err(StoreError::Conflict(reason)) => {
                        tracing::debug!(order_id = %order.id(), %reason, "skipping expiry");
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            if !full_batch || !progressed {
                return Ok(expired);
            }
        }
    }
}
