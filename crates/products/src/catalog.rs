use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use retail_core::{DomainError, Money, ProductId};

/// What the sale flow needs to know about a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub product_id: ProductId,
    pub name: String,
    /// Current unit price; snapshotted onto sale lines at sale time.
    pub unit_price: Money,
}

impl CatalogEntry {
    pub fn new(product_id: ProductId, name: impl Into<String>, unit_price: Money) -> Self {
        Self {
            product_id,
            name: name.into(),
            unit_price,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("product not found: {0}")]
    NotFound(ProductId),

    /// The catalog could not be consulted (storage or transport failure).
    #[error("catalog backend error: {0}")]
    Backend(String),
}

impl CatalogError {
    /// Business view of the error, when it is one.
    pub fn as_rejection(&self) -> Option<DomainError> {
        match self {
            CatalogError::NotFound(product_id) => Some(DomainError::not_found(*product_id)),
            CatalogError::Backend(_) => None,
        }
    }
}

/// Read-only product lookup.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn lookup(&self, product_id: ProductId) -> Result<CatalogEntry, CatalogError>;
}

#[async_trait]
impl<C> ProductCatalog for Arc<C>
where
    C: ProductCatalog + ?Sized,
{
    async fn lookup(&self, product_id: ProductId) -> Result<CatalogEntry, CatalogError> {
        (**self).lookup(product_id).await
    }
}

/// In-memory catalog for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryProductCatalog {
    entries: RwLock<HashMap<ProductId, CatalogEntry>>,
}

impl InMemoryProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, entry: CatalogEntry) -> Result<(), CatalogError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| CatalogError::Backend("lock poisoned".to_string()))?;
        entries.insert(entry.product_id, entry);
        Ok(())
    }

    /// Change the current price. Sales already recorded keep their snapshot.
    pub fn set_price(&self, product_id: ProductId, unit_price: Money) -> Result<(), CatalogError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| CatalogError::Backend("lock poisoned".to_string()))?;
        let entry = entries
            .get_mut(&product_id)
            .ok_or(CatalogError::NotFound(product_id))?;
        entry.unit_price = unit_price;
        Ok(())
    }
}

#[async_trait]
impl ProductCatalog for InMemoryProductCatalog {
    async fn lookup(&self, product_id: ProductId) -> Result<CatalogEntry, CatalogError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| CatalogError::Backend("lock poisoned".to_string()))?;
        entries
            .get(&product_id)
            .cloned()
            .ok_or(CatalogError::NotFound(product_id))
    }
}
