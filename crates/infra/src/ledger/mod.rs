//! Authoritative stock ledger boundary.
//!
//! A `StockLedger` owns the per-product quantities and the append-only audit log.
//! It is the single source of truth for stock: every other copy of a quantity (the
//! storefront mirror, dashboards) is derived from it through `subscribe()` or reads.
//!
//! Business outcomes of mutations travel inside the response contracts
//! (`success = false` + tagged rejection). `LedgerError` is reserved for storage
//! faults, where the caller cannot know whether the change happened.

pub mod in_memory;
pub mod postgres;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use retail_core::ProductId;
use retail_inventory::{
    AdjustStockRequest, AdjustStockResponse, AuditEntry, DecreaseStockRequest,
    DecreaseStockResponse,
};

pub use in_memory::InMemoryStockLedger;
pub use postgres::PostgresStockLedger;

/// Capacity of the change feed before slow subscribers start lagging.
pub const CHANGE_FEED_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("ledger storage error: {0}")]
    Storage(String),
}

/// One committed audit entry plus the product quantity right after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockChange {
    pub entry: AuditEntry,
    pub quantity_after: i64,
}

/// Consistent view of all quantities and the full audit log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub quantities: BTreeMap<ProductId, i64>,
    pub entries: Vec<AuditEntry>,
}

#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Current quantity, `None` when the product has no stock record.
    async fn get_stock(&self, product_id: ProductId) -> Result<Option<i64>, LedgerError>;

    /// Quantities for the given products; products without a record are absent.
    async fn batch_get_stock(
        &self,
        product_ids: &[ProductId],
    ) -> Result<BTreeMap<ProductId, i64>, LedgerError>;

    /// All-or-nothing multi-item debit.
    async fn decrease_stock(
        &self,
        request: DecreaseStockRequest,
    ) -> Result<DecreaseStockResponse, LedgerError>;

    /// Single signed adjustment (idempotent when a key is supplied).
    async fn adjust_stock(
        &self,
        request: AdjustStockRequest,
    ) -> Result<AdjustStockResponse, LedgerError>;

    /// Audit entries for one product in chronological order.
    async fn audit_trail(&self, product_id: ProductId) -> Result<Vec<AuditEntry>, LedgerError>;

    async fn snapshot(&self) -> Result<LedgerSnapshot, LedgerError>;

    /// Committed changes, published after commit in per-product order.
    fn subscribe(&self) -> broadcast::Receiver<StockChange>;
}

#[async_trait]
impl<L> StockLedger for Arc<L>
where
    L: StockLedger + ?Sized,
{
    async fn get_stock(&self, product_id: ProductId) -> Result<Option<i64>, LedgerError> {
        (**self).get_stock(product_id).await
    }

    async fn batch_get_stock(
        &self,
        product_ids: &[ProductId],
    ) -> Result<BTreeMap<ProductId, i64>, LedgerError> {
        (**self).batch_get_stock(product_ids).await
    }

    async fn decrease_stock(
        &self,
        request: DecreaseStockRequest,
    ) -> Result<DecreaseStockResponse, LedgerError> {
        (**self).decrease_stock(request).await
    }

    async fn adjust_stock(
        &self,
        request: AdjustStockRequest,
    ) -> Result<AdjustStockResponse, LedgerError> {
        (**self).adjust_stock(request).await
    }

    async fn audit_trail(&self, product_id: ProductId) -> Result<Vec<AuditEntry>, LedgerError> {
        (**self).audit_trail(product_id).await
    }

    async fn snapshot(&self) -> Result<LedgerSnapshot, LedgerError> {
        (**self).snapshot().await
    }

    fn subscribe(&self) -> broadcast::Receiver<StockChange> {
        (**self).subscribe()
    }
}

/// Reason text stored on the audit entry of an adjustment.
///
/// Empty reasons are rejected before they reach the ledger.
pub(crate) fn validate_reason(reason: &str) -> Result<(), retail_core::DomainError> {
    if reason.trim().is_empty() {
        return Err(retail_core::DomainError::invalid_input(
            "adjustment reason must not be empty",
        ));
    }
    Ok(())
}
