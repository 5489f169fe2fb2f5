//! Crediting back a sale debit whose local commit did not happen.

use std::sync::Arc;

use serde_json::json;
use tracing::{error, info, warn};

use retail_core::{ActorId, SaleId};
use retail_inventory::{AdjustStockRequest, StockLine, compensation_reason};
use retail_observability::{Alarm, AlarmKind, AlarmSink};

use crate::gateway::LedgerGateway;
use crate::outbox::{CompensationIntent, CompensationOutbox, compensation_key};
use crate::sale_records::SaleRecordStore;

/// How a compensation attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompensationOutcome {
    /// Every debited line was credited back.
    Credited,
    /// The sale turned out to be recorded after all; nothing is owed.
    NotNeeded,
    /// At least one credit failed; the intent stays pending for the recovery sweep.
    Pending,
}

impl std::fmt::Display for CompensationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompensationOutcome::Credited => "credited back",
            CompensationOutcome::NotNeeded => "not owed",
            CompensationOutcome::Pending => "pending recovery",
        };
        f.write_str(s)
    }
}

/// Issues the compensating credits for a sale and keeps the outbox in step.
#[derive(Clone)]
pub struct Compensator {
    gateway: Arc<dyn LedgerGateway>,
    sales: Arc<dyn SaleRecordStore>,
    outbox: Arc<dyn CompensationOutbox>,
    alarms: Arc<dyn AlarmSink>,
}

impl Compensator {
    pub fn new(
        gateway: Arc<dyn LedgerGateway>,
        sales: Arc<dyn SaleRecordStore>,
        outbox: Arc<dyn CompensationOutbox>,
        alarms: Arc<dyn AlarmSink>,
    ) -> Self {
        Self {
            gateway,
            sales,
            outbox,
            alarms,
        }
    }

    /// Record the intent, then try once to settle it.
    pub async fn compensate(
        &self,
        sale_id: SaleId,
        actor_id: ActorId,
        lines: Vec<StockLine>,
    ) -> CompensationOutcome {
        let intent = CompensationIntent::pending(sale_id, actor_id, lines);
        let durable = match self.outbox.record(intent.clone()).await {
            Ok(()) => true,
            Err(err) => {
                error!(sale_id = %sale_id, error = %err, "failed to record compensation intent");
                false
            }
        };

        match self.settle(&intent).await {
            Ok(outcome) => {
                if durable {
                    if let Err(err) = self.outbox.mark_completed(intent.intent_id).await {
                        warn!(intent_id = %intent.intent_id, error = %err, "failed to close compensation intent");
                    }
                }
                outcome
            }
            Err(failure) => {
                if durable {
                    if let Err(err) = self.outbox.mark_failed(intent.intent_id, failure.clone()).await {
                        warn!(intent_id = %intent.intent_id, error = %err, "failed to count compensation attempt");
                    }
                }
                self.alarms.raise(
                    Alarm::new(
                        AlarmKind::CompensationFailed,
                        sale_id,
                        format!("compensating credit failed for sale {sale_id}: {failure}"),
                    )
                    .with_details(json!({
                        "intent_id": intent.intent_id.to_string(),
                        "durable": durable,
                        "lines": intent.lines,
                    })),
                );
                CompensationOutcome::Pending
            }
        }
    }

    /// Credit every line of `intent` (idempotently), unless the sale was recorded.
    ///
    /// All lines are attempted even when one fails; the error lists every failure.
    pub async fn settle(&self, intent: &CompensationIntent) -> Result<CompensationOutcome, String> {
        match self.sales.find(intent.sale_id).await {
            Ok(Some(_)) => {
                info!(sale_id = %intent.sale_id, "sale is recorded; no compensation owed");
                return Ok(CompensationOutcome::NotNeeded);
            }
            Ok(None) => {}
            Err(err) => return Err(format!("cannot check sale record: {err}")),
        }

        let reason = compensation_reason(intent.sale_id);
        let mut failures = Vec::new();

        for (idx, line) in intent.lines.iter().enumerate() {
            let request = AdjustStockRequest {
                product_id: line.product_id,
                actor_id: intent.actor_id,
                delta: line.quantity,
                reason: reason.clone(),
                idempotency_key: Some(compensation_key(intent.sale_id, idx)),
            };
            match self.gateway.adjust_stock(request).await {
                Ok(resp) if resp.success => {
                    info!(
                        sale_id = %intent.sale_id,
                        product_id = %line.product_id,
                        quantity = line.quantity,
                        replayed = resp.replayed,
                        "compensating credit applied"
                    );
                }
                Ok(resp) => failures.push(format!("line {idx}: rejected: {}", resp.message)),
                Err(err) => failures.push(format!("line {idx}: {err}")),
            }
        }

        if failures.is_empty() {
            Ok(CompensationOutcome::Credited)
        } else {
            Err(failures.join("; "))
        }
    }
}

/// Compensates a debited sale if dropped while armed.
///
/// Armed right after the debit succeeds and disarmed once the sale is committed or
/// explicitly compensated. If the saga future is cancelled in between, `Drop` spawns
/// the same compensation on the current runtime.
pub(crate) struct CompensationGuard {
    armed: Option<(Compensator, SaleId, ActorId, Vec<StockLine>)>,
}

impl CompensationGuard {
    pub(crate) fn arm(
        compensator: Compensator,
        sale_id: SaleId,
        actor_id: ActorId,
        lines: Vec<StockLine>,
    ) -> Self {
        Self {
            armed: Some((compensator, sale_id, actor_id, lines)),
        }
    }

    pub(crate) fn disarm(mut self) {
        self.armed = None;
    }
}

impl Drop for CompensationGuard {
    fn drop(&mut self) {
        let Some((compensator, sale_id, actor_id, lines)) = self.armed.take() else {
            return;
        };
        warn!(sale_id = %sale_id, "sale cancelled after debit; compensating");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    compensator.compensate(sale_id, actor_id, lines).await;
                });
            }
            Err(_) => {
                compensator.alarms.raise(
                    Alarm::new(
                        AlarmKind::CompensationFailed,
                        sale_id,
                        format!("sale {sale_id} cancelled after debit outside a runtime; stock owed"),
                    )
                    .with_details(json!({ "lines": lines })),
                );
            }
        }
    }
}
