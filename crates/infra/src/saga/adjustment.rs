//! Manual stock adjustments: one validated `AdjustStock` call, no compensation.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument};

use retail_core::{AdjustmentId, AuditEntryId, DomainError, ProductId};
use retail_inventory::{AdjustStockRequest, StockAdjustment};

use crate::gateway::{GatewayError, LedgerGateway};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdjustmentError {
    #[error(transparent)]
    Rejected(DomainError),

    /// Whether the adjustment was applied is unknown; retry with the same idempotency key.
    #[error("ledger outcome unknown for adjustment {adjustment_id}: {source}")]
    LedgerOutcomeUnknown {
        adjustment_id: AdjustmentId,
        #[source]
        source: GatewayError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjustmentOutcome {
    pub adjustment_id: AdjustmentId,
    pub product_id: ProductId,
    pub new_quantity: i64,
    pub audit_entry_id: Option<AuditEntryId>,
    /// The idempotency key had already been applied; nothing changed this time.
    pub replayed: bool,
}

#[derive(Clone)]
pub struct AdjustmentFlow {
    gateway: Arc<dyn LedgerGateway>,
}

impl AdjustmentFlow {
    pub fn new(gateway: Arc<dyn LedgerGateway>) -> Self {
        Self { gateway }
    }

    #[instrument(
        skip(self, adjustment, idempotency_key),
        fields(product_id = %adjustment.product_id, kind = adjustment.kind.as_str(), delta = adjustment.delta)
    )]
    pub async fn apply(
        &self,
        adjustment: StockAdjustment,
        idempotency_key: Option<String>,
    ) -> Result<AdjustmentOutcome, AdjustmentError> {
        adjustment.validate().map_err(AdjustmentError::Rejected)?;

        let adjustment_id = AdjustmentId::new();
        let request = AdjustStockRequest {
            product_id: adjustment.product_id,
            actor_id: adjustment.actor_id,
            delta: adjustment.delta,
            reason: adjustment.audit_reason(adjustment_id),
            idempotency_key,
        };

        let response = self
            .gateway
            .adjust_stock(request)
            .await
            .map_err(|source| AdjustmentError::LedgerOutcomeUnknown {
                adjustment_id,
                source,
            })?;
        let adjusted = response.into_result().map_err(AdjustmentError::Rejected)?;

        info!(
            adjustment_id = %adjustment_id,
            new_quantity = adjusted.new_quantity,
            replayed = adjusted.replayed,
            "stock adjusted"
        );
        Ok(AdjustmentOutcome {
            adjustment_id,
            product_id: adjustment.product_id,
            new_quantity: adjusted.new_quantity,
            audit_entry_id: adjusted.audit_entry_id,
            replayed: adjusted.replayed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use retail_core::ActorId;
    use retail_inventory::AdjustmentKind;

    use crate::gateway::LocalLedgerGateway;
    use crate::ledger::{InMemoryStockLedger, StockLedger};

    fn flow() -> (Arc<InMemoryStockLedger>, AdjustmentFlow) {
        let ledger = InMemoryStockLedger::arc();
        let gateway = LocalLedgerGateway::new(ledger.clone(), Duration::from_secs(1));
        (ledger, AdjustmentFlow::new(Arc::new(gateway)))
    }

    fn adjustment(product_id: ProductId, delta: i64, kind: AdjustmentKind) -> StockAdjustment {
        StockAdjustment {
            product_id,
            actor_id: ActorId::new(),
            delta,
            kind,
            reason: "cycle count".to_string(),
        }
    }

    #[tokio::test]
    async fn restock_creates_record_and_tags_the_audit_reason() {
        let (ledger, flow) = flow();
        let product = ProductId::new();

        let outcome = flow
            .apply(adjustment(product, 5, AdjustmentKind::Restock), None)
            .await
            .unwrap();

        assert_eq!(outcome.new_quantity, 5);
        assert!(outcome.audit_entry_id.is_some());
        let trail = ledger.audit_trail(product).await.unwrap();
        assert_eq!(trail.len(), 1);
        assert!(trail[0].reason.contains(&outcome.adjustment_id.to_string()));
        assert!(trail[0].reason.starts_with("restock"));
    }

    #[tokio::test]
    async fn write_off_below_zero_is_rejected_without_change() {
        let (ledger, flow) = flow();
        let product = ProductId::new();
        flow.apply(adjustment(product, 2, AdjustmentKind::Restock), None)
            .await
            .unwrap();

        let err = flow
            .apply(adjustment(product, -3, AdjustmentKind::WriteOff), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AdjustmentError::Rejected(DomainError::StockWouldGoNegative { current: 2, delta: -3, .. })
        ));
        assert_eq!(ledger.get_stock(product).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn kind_sign_mismatch_never_reaches_the_ledger() {
        let (ledger, flow) = flow();
        let product = ProductId::new();

        let err = flow
            .apply(adjustment(product, 4, AdjustmentKind::WriteOff), None)
            .await
            .unwrap_err();

        assert!(matches!(err, AdjustmentError::Rejected(DomainError::InvalidInput { .. })));
        assert_eq!(ledger.get_stock(product).await.unwrap(), None);
    }

    #[tokio::test]
    async fn repeated_idempotency_key_is_applied_once() {
        let (ledger, flow) = flow();
        let product = ProductId::new();
        let key = Some("restock-2024-001".to_string());

        let first = flow
            .apply(adjustment(product, 3, AdjustmentKind::Restock), key.clone())
            .await
            .unwrap();
        let second = flow
            .apply(adjustment(product, 3, AdjustmentKind::Restock), key)
            .await
            .unwrap();

        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(second.new_quantity, 3);
        assert_eq!(second.audit_entry_id, first.audit_entry_id);
        assert_eq!(ledger.get_stock(product).await.unwrap(), Some(3));
    }
}
