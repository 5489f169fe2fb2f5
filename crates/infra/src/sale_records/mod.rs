//! Local sale bookkeeping.
//!
//! A sale header and its lines are written through one local transaction. That
//! transaction never spans the ledger call, which is why the saga needs a
//! compensation path when it fails after a debit.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use retail_core::{ActorId, SaleId};
use retail_sales::SaleRecord;

pub use in_memory::{FailPoint, InMemorySaleRecordStore};
pub use postgres::PostgresSaleRecordStore;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SaleStoreError {
    #[error("sale already recorded: {0}")]
    Duplicate(SaleId),

    #[error("sale store error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait SaleRecordStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn SaleTransaction>, SaleStoreError>;

    /// Header and lines of a committed sale.
    async fn find(&self, sale_id: SaleId) -> Result<Option<SaleRecord>, SaleStoreError>;

    /// Committed sales, newest first; only `actor`'s when given.
    async fn list(&self, actor: Option<ActorId>) -> Result<Vec<SaleRecord>, SaleStoreError>;
}

/// One open local transaction. Dropping it without `commit` discards its writes.
#[async_trait]
pub trait SaleTransaction: Send {
    /// Stage the header and every line of `record`.
    async fn insert_sale(&mut self, record: &SaleRecord) -> Result<(), SaleStoreError>;

    async fn commit(self: Box<Self>) -> Result<(), SaleStoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), SaleStoreError>;
}
