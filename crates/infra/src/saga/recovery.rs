//! Re-drives pending compensation intents.
//!
//! Runs once at startup (to pick up intents left by a crash) and then periodically.
//! Every credit reuses the per-line idempotency key, so re-driving a partially
//! credited intent never credits a line twice.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use retail_observability::{Alarm, AlarmKind, AlarmSink};

use super::compensation::Compensator;
use crate::outbox::{CompensationIntent, CompensationOutbox, OutboxError};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub completed: usize,
    pub still_pending: usize,
    pub abandoned: usize,
}

pub struct CompensationRecovery {
    compensator: Compensator,
    outbox: Arc<dyn CompensationOutbox>,
    alarms: Arc<dyn AlarmSink>,
    max_attempts: u32,
    batch_size: usize,
}

impl CompensationRecovery {
    pub fn new(
        compensator: Compensator,
        outbox: Arc<dyn CompensationOutbox>,
        alarms: Arc<dyn AlarmSink>,
    ) -> Self {
        Self {
            compensator,
            outbox,
            alarms,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// One pass over the oldest pending intents.
    pub async fn sweep(&self) -> Result<SweepReport, OutboxError> {
        let pending = self.outbox.pending(self.batch_size).await?;
        let mut report = SweepReport {
            examined: pending.len(),
            ..SweepReport::default()
        };

        for intent in pending {
            match self.compensator.settle(&intent).await {
                Ok(outcome) => {
                    self.outbox.mark_completed(intent.intent_id).await?;
                    info!(
                        intent_id = %intent.intent_id,
                        sale_id = %intent.sale_id,
                        outcome = %outcome,
                        "compensation intent settled"
                    );
                    report.completed += 1;
                }
                Err(failure) => {
                    let attempts = self
                        .outbox
                        .mark_failed(intent.intent_id, failure.clone())
                        .await?;
                    if attempts >= self.max_attempts {
                        self.abandon(&intent, attempts, failure).await?;
                        report.abandoned += 1;
                    } else {
                        warn!(
                            intent_id = %intent.intent_id,
                            attempts,
                            error = %failure,
                            "compensation attempt failed; will retry"
                        );
                        report.still_pending += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    async fn abandon(
        &self,
        intent: &CompensationIntent,
        attempts: u32,
        failure: String,
    ) -> Result<(), OutboxError> {
        self.outbox
            .mark_abandoned(intent.intent_id, failure.clone())
            .await?;
        self.alarms.raise(
            Alarm::new(
                AlarmKind::CompensationAbandoned,
                intent.sale_id,
                format!(
                    "gave up compensating sale {} after {attempts} attempts: {failure}",
                    intent.sale_id
                ),
            )
            .with_details(json!({
                "intent_id": intent.intent_id.to_string(),
                "attempts": attempts,
                "lines": intent.lines,
            })),
        );
        Ok(())
    }

    /// Sweep now, then every `interval` until the handle is shut down.
    pub fn spawn_periodic(self: Arc<Self>, interval: Duration) -> RecoveryHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        match self.sweep().await {
                            Ok(report) if report.examined > 0 => {
                                info!(?report, "compensation sweep finished");
                            }
                            Ok(_) => {}
                            Err(err) => error!(error = %err, "compensation sweep failed"),
                        }
                    }
                }
            }
        });
        RecoveryHandle {
            shutdown: Some(shutdown_tx),
            join,
        }
    }
}

/// Handle to stop the periodic sweep.
#[derive(Debug)]
pub struct RecoveryHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl RecoveryHandle {
    /// Request shutdown and wait for an in-flight sweep to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.join.await;
    }
}
