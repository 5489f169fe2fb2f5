use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::debug;

use retail_core::ProductId;

use crate::gateway::{GatewayError, LedgerGateway};
use crate::ledger::StockChange;

#[derive(Debug, Clone, Copy)]
struct MirrorEntry {
    quantity: i64,
    refreshed_at: Instant,
}

/// Storefront read cache of ledger quantities.
///
/// Disposable: filled from ledger reads, updated from the ledger change feed and
/// dropped on feed lag. It is never written from anywhere else, so it can only be
/// stale, never divergent. With no feed (remote ledger), `max_age` bounds staleness.
pub struct StockMirror {
    gateway: Arc<dyn LedgerGateway>,
    entries: RwLock<HashMap<ProductId, MirrorEntry>>,
    /// Bumped by every feed update and invalidation; a read-through fill that
    /// started under an older epoch is discarded.
    epoch: AtomicU64,
    max_age: Option<Duration>,
}

impl StockMirror {
    pub fn new(gateway: Arc<dyn LedgerGateway>) -> Self {
        Self {
            gateway,
            entries: RwLock::new(HashMap::new()),
            epoch: AtomicU64::new(0),
            max_age: None,
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Cached quantity, or a ledger read on miss / expiry.
    pub async fn get(&self, product_id: ProductId) -> Result<Option<i64>, GatewayError> {
        if let Some(quantity) = self.cached(product_id) {
            return Ok(Some(quantity));
        }

        let epoch = self.epoch.load(Ordering::Acquire);
        let quantity = self.gateway.get_stock(product_id).await?;

        if let Some(quantity) = quantity {
            if let Ok(mut entries) = self.entries.write() {
                if self.epoch.load(Ordering::Acquire) == epoch {
                    entries.insert(
                        product_id,
                        MirrorEntry {
                            quantity,
                            refreshed_at: Instant::now(),
                        },
                    );
                }
            }
        }
        Ok(quantity)
    }

    /// Fresh cached value only; never touches the ledger.
    pub fn cached(&self, product_id: ProductId) -> Option<i64> {
        let entries = self.entries.read().ok()?;
        let entry = entries.get(&product_id)?;
        match self.max_age {
            Some(max_age) if entry.refreshed_at.elapsed() > max_age => None,
            _ => Some(entry.quantity),
        }
    }

    /// Apply one committed ledger change.
    pub fn apply(&self, change: &StockChange) {
        if let Ok(mut entries) = self.entries.write() {
            self.epoch.fetch_add(1, Ordering::AcqRel);
            entries.insert(
                change.entry.product_id,
                MirrorEntry {
                    quantity: change.quantity_after,
                    refreshed_at: Instant::now(),
                },
            );
        }
    }

    /// Forget everything; the next reads go to the ledger.
    pub fn invalidate_all(&self) {
        if let Ok(mut entries) = self.entries.write() {
            self.epoch.fetch_add(1, Ordering::AcqRel);
            debug!(dropped = entries.len(), "stock mirror invalidated");
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;
    use retail_core::ActorId;
    use retail_inventory::{AdjustStockRequest, AuditEntry};

    use crate::gateway::LocalLedgerGateway;
    use crate::ledger::{InMemoryStockLedger, StockLedger};

    fn mirror() -> (Arc<InMemoryStockLedger>, StockMirror) {
        let ledger = InMemoryStockLedger::arc();
        let gateway = LocalLedgerGateway::new(ledger.clone(), Duration::from_secs(1));
        (ledger, StockMirror::new(Arc::new(gateway)))
    }

    fn restock(product_id: ProductId, delta: i64) -> AdjustStockRequest {
        AdjustStockRequest {
            product_id,
            actor_id: ActorId::new(),
            delta,
            reason: "restock".to_string(),
            idempotency_key: None,
        }
    }

    #[tokio::test]
    async fn miss_reads_through_and_caches() {
        let (ledger, mirror) = mirror();
        let product = ProductId::new();
        ledger.adjust_stock(restock(product, 7)).await.unwrap();

        assert_eq!(mirror.cached(product), None);
        assert_eq!(mirror.get(product).await.unwrap(), Some(7));
        assert_eq!(mirror.cached(product), Some(7));
    }

    #[tokio::test]
    async fn unknown_product_is_not_cached() {
        let (_ledger, mirror) = mirror();
        assert_eq!(mirror.get(ProductId::new()).await.unwrap(), None);
        assert!(mirror.is_empty());
    }

    #[tokio::test]
    async fn feed_updates_overwrite_and_invalidation_clears() {
        let (ledger, mirror) = mirror();
        let product = ProductId::new();
        ledger.adjust_stock(restock(product, 3)).await.unwrap();
        mirror.get(product).await.unwrap();

        let entry = AuditEntry::record(product, ActorId::new(), -1, "sale", Utc::now());
        mirror.apply(&StockChange {
            entry,
            quantity_after: 2,
        });
        assert_eq!(mirror.cached(product), Some(2));

        mirror.invalidate_all();
        assert_eq!(mirror.cached(product), None);
        assert_eq!(mirror.get(product).await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn expired_entries_are_refreshed() {
        let ledger = InMemoryStockLedger::arc();
        let gateway = LocalLedgerGateway::new(ledger.clone(), Duration::from_secs(1));
        let mirror = StockMirror::new(Arc::new(gateway)).with_max_age(Duration::from_millis(10));
        let product = ProductId::new();

        ledger.adjust_stock(restock(product, 1)).await.unwrap();
        assert_eq!(mirror.get(product).await.unwrap(), Some(1));

        ledger.adjust_stock(restock(product, 4)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(mirror.cached(product), None);
        assert_eq!(mirror.get(product).await.unwrap(), Some(5));
    }
}
