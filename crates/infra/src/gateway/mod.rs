//! The only way the sale and adjustment flows reach the ledger.
//!
//! A gateway speaks the ledger's four remote operations (plus the audit read)
//! regardless of transport. Business outcomes come back as structured responses;
//! `GatewayError` means the call itself failed and the outcome is unknown.

pub mod http;
pub mod local;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use retail_core::ProductId;
use retail_inventory::{
    AdjustStockRequest, AdjustStockResponse, AuditEntry, DecreaseStockRequest,
    DecreaseStockResponse,
};

pub use http::HttpLedgerGateway;
pub use local::LocalLedgerGateway;

/// Transport or ledger-side failure. For mutations the change may or may not have
/// been applied.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    #[error("ledger call timed out after {0:?}")]
    Timeout(Duration),

    #[error("ledger internal error: {0}")]
    Internal(String),

    #[error("ledger protocol error: {0}")]
    Protocol(String),
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Unavailable(_) => "ledger_unavailable",
            GatewayError::Timeout(_) => "ledger_timeout",
            GatewayError::Internal(_) => "ledger_internal",
            GatewayError::Protocol(_) => "ledger_protocol",
        }
    }
}

#[async_trait]
pub trait LedgerGateway: Send + Sync {
    async fn get_stock(&self, product_id: ProductId) -> Result<Option<i64>, GatewayError>;

    /// Empty input returns an empty mapping without contacting the ledger.
    async fn batch_get_stock(
        &self,
        product_ids: &[ProductId],
    ) -> Result<BTreeMap<ProductId, i64>, GatewayError>;

    async fn decrease_stock(
        &self,
        request: DecreaseStockRequest,
    ) -> Result<DecreaseStockResponse, GatewayError>;

    async fn adjust_stock(
        &self,
        request: AdjustStockRequest,
    ) -> Result<AdjustStockResponse, GatewayError>;

    async fn audit_trail(&self, product_id: ProductId) -> Result<Vec<AuditEntry>, GatewayError>;
}

#[async_trait]
impl<G> LedgerGateway for Arc<G>
where
    G: LedgerGateway + ?Sized,
{
    async fn get_stock(&self, product_id: ProductId) -> Result<Option<i64>, GatewayError> {
        (**self).get_stock(product_id).await
    }

    async fn batch_get_stock(
        &self,
        product_ids: &[ProductId],
    ) -> Result<BTreeMap<ProductId, i64>, GatewayError> {
        (**self).batch_get_stock(product_ids).await
    }

    async fn decrease_stock(
        &self,
        request: DecreaseStockRequest,
    ) -> Result<DecreaseStockResponse, GatewayError> {
        (**self).decrease_stock(request).await
    }

    async fn adjust_stock(
        &self,
        request: AdjustStockRequest,
    ) -> Result<AdjustStockResponse, GatewayError> {
        (**self).adjust_stock(request).await
    }

    async fn audit_trail(&self, product_id: ProductId) -> Result<Vec<AuditEntry>, GatewayError> {
        (**self).audit_trail(product_id).await
    }
}
