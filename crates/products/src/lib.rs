//! Product catalog collaborator.
//!
//! The catalog is owned elsewhere (administrative CRUD is not part of this workspace).
//! The sale flow only needs a read-only lookup of existence, display name and current
//! unit price, which this crate defines as the `ProductCatalog` seam.

pub mod catalog;

pub use catalog::{CatalogEntry, CatalogError, InMemoryProductCatalog, ProductCatalog};
