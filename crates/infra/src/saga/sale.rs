//! Storefront sale: catalog → single atomic debit → local commit → compensate on failure.
//!
//! ```text
//!   validate ─► resolve lines (catalog) ─► price snapshot
//!        │
//!        ▼
//!   DecreaseStock(all lines) ── rejected ──► abort, nothing written
//!        │ ok                 ── unknown  ──► abort, alarm (no blind credit)
//!        ▼
//!   [guard armed] begin ─► insert sale+lines ─► commit ──► receipt
//!        │ failure / cancellation
//!        ▼
//!   outbox intent ─► AdjustStock(+qty, key per line) ─► alarm if any credit fails
//! ```

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tracing::{Span, error, field, info, instrument, warn};

use retail_core::{ActorId, DomainError, SaleId};
use retail_inventory::DecreaseStockRequest;
use retail_observability::{Alarm, AlarmKind, AlarmSink};
use retail_products::ProductCatalog;
use retail_sales::{SaleDraft, SaleReceipt, SaleRecord, SaleRequest};

use super::compensation::{CompensationGuard, CompensationOutcome, Compensator};
use crate::gateway::{GatewayError, LedgerGateway};
use crate::outbox::CompensationOutbox;
use crate::sale_records::{SaleRecordStore, SaleStoreError};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SaleError {
    /// Business rejection; nothing was changed.
    #[error(transparent)]
    Rejected(DomainError),

    /// The catalog could not be consulted; nothing was changed.
    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(String),

    /// The debit call failed; whether stock was taken is unknown.
    #[error("ledger outcome unknown for sale {sale_id}: {source}")]
    LedgerOutcomeUnknown {
        sale_id: SaleId,
        #[source]
        source: GatewayError,
    },

    /// Stock was debited but the sale could not be recorded.
    #[error("sale {sale_id} could not be recorded ({source}); stock {compensation}")]
    PersistenceFailed {
        sale_id: SaleId,
        #[source]
        source: SaleStoreError,
        compensation: CompensationOutcome,
    },
}

/// Orchestrates one sale. All collaborators are injected.
#[derive(Clone)]
pub struct SaleSaga {
    catalog: Arc<dyn ProductCatalog>,
    gateway: Arc<dyn LedgerGateway>,
    sales: Arc<dyn SaleRecordStore>,
    alarms: Arc<dyn AlarmSink>,
    compensator: Compensator,
}

impl SaleSaga {
    pub fn new(
        catalog: Arc<dyn ProductCatalog>,
        gateway: Arc<dyn LedgerGateway>,
        sales: Arc<dyn SaleRecordStore>,
        outbox: Arc<dyn CompensationOutbox>,
        alarms: Arc<dyn AlarmSink>,
    ) -> Self {
        let compensator = Compensator::new(gateway.clone(), sales.clone(), outbox, alarms.clone());
        Self {
            catalog,
            gateway,
            sales,
            alarms,
            compensator,
        }
    }

    pub fn compensator(&self) -> &Compensator {
        &self.compensator
    }

    /// `Create(actorID, lines)`.
    #[instrument(
        skip(self, request),
        fields(actor_id = %request.actor_id, line_count = request.lines.len(), sale_id = field::Empty)
    )]
    pub async fn create(&self, request: SaleRequest) -> Result<SaleReceipt, SaleError> {
        request.validate().map_err(SaleError::Rejected)?;

        let sale_id = SaleId::new();
        Span::current().record("sale_id", field::display(sale_id));

        // 1) Resolve every line before any side effect.
        let mut resolved = Vec::with_capacity(request.lines.len());
        for line in &request.lines {
            let entry = self
                .catalog
                .lookup(line.product_id)
                .await
                .map_err(|err| match err.as_rejection() {
                    Some(rejection) => SaleError::Rejected(rejection),
                    None => SaleError::CatalogUnavailable(err.to_string()),
                })?;
            resolved.push((*line, entry));
        }

        // 2) Prices and totals are fixed from here on.
        let draft =
            SaleDraft::price(sale_id, request.actor_id, resolved).map_err(SaleError::Rejected)?;
        let record = draft.to_record(Utc::now());
        let receipt = SaleReceipt::from_record(&record).map_err(SaleError::Rejected)?;

        // 3) One atomic debit for the whole sale.
        let debit = DecreaseStockRequest {
            items: draft.stock_lines(),
            actor_id: draft.actor_id(),
            correlation_id: sale_id.into(),
        };
        match self.gateway.decrease_stock(debit).await {
            Ok(response) => response.into_result().map_err(|rejection| {
                info!(error = %rejection, "sale rejected by ledger");
                SaleError::Rejected(rejection)
            })?,
            Err(source) => {
                self.alarms.raise(
                    Alarm::new(
                        AlarmKind::LedgerOutcomeUnknown,
                        sale_id,
                        format!("debit for sale {sale_id} has unknown outcome: {source}"),
                    )
                    .with_details(json!({ "lines": draft.stock_lines() })),
                );
                return Err(SaleError::LedgerOutcomeUnknown { sale_id, source });
            }
        }

        // From here until commit, cancellation must give the stock back.
        let guard = CompensationGuard::arm(
            self.compensator.clone(),
            sale_id,
            draft.actor_id(),
            draft.stock_lines(),
        );

        // 4) Local commit.
        match self.persist(&record).await {
            Ok(()) => {
                guard.disarm();
                info!(total = %receipt.total, "sale recorded");
                Ok(receipt)
            }
            Err(source) => {
                error!(error = %source, "sale persistence failed after debit; compensating");
                // 5) Compensation. The guard stays armed until the intent is recorded and
                // settled; a repeat from the guard replays the same per-line keys.
                let compensation = self
                    .compensator
                    .compensate(sale_id, draft.actor_id(), draft.stock_lines())
                    .await;
                guard.disarm();
                if compensation == CompensationOutcome::NotNeeded {
                    warn!("commit reported failure but the sale is recorded");
                    return Ok(receipt);
                }
                Err(SaleError::PersistenceFailed {
                    sale_id,
                    source,
                    compensation,
                })
            }
        }
    }

    /// A committed sale with its line snapshots.
    pub async fn find(&self, sale_id: SaleId) -> Result<Option<SaleRecord>, SaleStoreError> {
        self.sales.find(sale_id).await
    }

    /// Committed sales, newest first, optionally for one actor.
    pub async fn list(&self, actor: Option<ActorId>) -> Result<Vec<SaleRecord>, SaleStoreError> {
        self.sales.list(actor).await
    }

    async fn persist(&self, record: &SaleRecord) -> Result<(), SaleStoreError> {
        let mut tx = self.sales.begin().await?;
        if let Err(err) = tx.insert_sale(record).await {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "rollback after failed insert also failed");
            }
            return Err(err);
        }
        tx.commit().await
    }
}
