use std::sync::Arc;

use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::ledger::StockChange;
use crate::projections::StockMirror;

/// Handle to stop and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.join.await;
    }
}

/// Feeds a [`StockMirror`] from the ledger change feed.
///
/// - Applies every change in feed order
/// - On lag the mirror is invalidated wholesale (missed changes are unknowable)
/// - Stops when the feed closes or on shutdown
#[derive(Debug)]
pub struct MirrorWorker;

impl MirrorWorker {
    pub fn spawn(
        mirror: Arc<StockMirror>,
        mut changes: broadcast::Receiver<StockChange>,
    ) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    received = changes.recv() => match received {
                        Ok(change) => mirror.apply(&change),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "stock mirror lagged behind the ledger feed; invalidating");
                            mirror.invalidate_all();
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("ledger change feed closed; mirror worker stopping");
                            break;
                        }
                    },
                }
            }
        });

        WorkerHandle {
            shutdown: Some(shutdown_tx),
            join,
        }
    }
}
