use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use retail_core::ProductId;
use retail_inventory::{
    AdjustStockRequest, AdjustStockResponse, AuditEntry, DecreaseStockRequest,
    DecreaseStockResponse,
};

use super::{GatewayError, LedgerGateway};
use crate::ledger::{LedgerError, StockLedger};

/// In-process gateway over a `StockLedger`, with the same per-call timeout a remote
/// transport would apply.
#[derive(Clone)]
pub struct LocalLedgerGateway {
    ledger: Arc<dyn StockLedger>,
    timeout: Duration,
}

impl LocalLedgerGateway {
    pub fn new(ledger: Arc<dyn StockLedger>, timeout: Duration) -> Self {
        Self { ledger, timeout }
    }

    async fn call<T, F>(&self, fut: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, LedgerError>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(LedgerError::Storage(msg))) => Err(GatewayError::Internal(msg)),
            Err(_) => Err(GatewayError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl LedgerGateway for LocalLedgerGateway {
    async fn get_stock(&self, product_id: ProductId) -> Result<Option<i64>, GatewayError> {
        self.call(self.ledger.get_stock(product_id)).await
    }

    async fn batch_get_stock(
        &self,
        product_ids: &[ProductId],
    ) -> Result<BTreeMap<ProductId, i64>, GatewayError> {
        if product_ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        self.call(self.ledger.batch_get_stock(product_ids)).await
    }

    async fn decrease_stock(
        &self,
        request: DecreaseStockRequest,
    ) -> Result<DecreaseStockResponse, GatewayError> {
        self.call(self.ledger.decrease_stock(request)).await
    }

    async fn adjust_stock(
        &self,
        request: AdjustStockRequest,
    ) -> Result<AdjustStockResponse, GatewayError> {
        self.call(self.ledger.adjust_stock(request)).await
    }

    async fn audit_trail(&self, product_id: ProductId) -> Result<Vec<AuditEntry>, GatewayError> {
        self.call(self.ledger.audit_trail(product_id)).await
    }
}
