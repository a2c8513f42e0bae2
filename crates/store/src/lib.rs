//! Persistence for the checkout core.
//!
//! The store is a document-style seam with atomic operations for the few
//! places checkout needs them: stock reservation, cart claiming, order
//! insertion with its payment, and compare-and-set status changes.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use query::{OrderQuery, Page};
pub use store::{
    CartStore, OrderStore, PaymentSettlement, PaymentStore, ProductStore, StockLine, Store,
    merge_stock_lines,
};
