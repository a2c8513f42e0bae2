//! Start-up catalog seeding.

use domain::Product;
use store::{ProductStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("failed to read catalog seed: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid catalog seed: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to store product: {0}")]
    Store(#[from] StoreError),
}

/// Upserts every product in a JSON array, returning how many were written.
pub async fn seed_catalog<S: ProductStore>(store: &S, json: &str) -> Result<usize, SeedError> {
    let products: Vec<Product> = serde_json::from_str(json)?;
    let count = products.len();
    for product in products {
        store.upsert_product(product).await?;
    }
    tracing::info!(count, "catalog seeded");
    Ok(count)
}

/// Reads a seed file and applies it with [`seed_catalog`].
pub async fn seed_catalog_file<S: ProductStore>(
    store: &S,
    path: &std::path::Path,
) -> Result<usize, SeedError> {
    let json = tokio::fs::read_to_string(path).await?;
    seed_catalog(store, &json).await
}
