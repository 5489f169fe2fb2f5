use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, Mutex as SlotMutex, OwnedMutexGuard};
use tracing::{debug, instrument};

use retail_core::ProductId;
use retail_inventory::{
    AdjustStockRequest, AdjustStockResponse, AuditEntry, DecreaseStockRequest,
    DecreaseStockResponse, plan_adjust, plan_debit, sale_reason,
};

use super::{
    CHANGE_FEED_CAPACITY, LedgerError, LedgerSnapshot, StockChange, StockLedger, validate_reason,
};

/// `None` until the first accepted adjustment creates the record.
type Slot = Arc<SlotMutex<Option<i64>>>;

/// In-memory stock ledger.
///
/// Each product has its own async lock; multi-product operations take the locks in
/// ascending `ProductId` order, so concurrent batches cannot deadlock and disjoint
/// products never contend. The audit log and idempotency table are only touched
/// while the relevant product locks are held.
#[derive(Debug)]
pub struct InMemoryStockLedger {
    slots: RwLock<HashMap<ProductId, Slot>>,
    audit: Mutex<Vec<AuditEntry>>,
    applied_keys: Mutex<HashMap<String, AdjustStockResponse>>,
    feed: broadcast::Sender<StockChange>,
}

impl Default for InMemoryStockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStockLedger {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            slots: RwLock::new(HashMap::new()),
            audit: Mutex::new(Vec::new()),
            applied_keys: Mutex::new(HashMap::new()),
            feed,
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn slot(&self, product_id: &ProductId) -> Result<Option<Slot>, LedgerError> {
        let slots = self
            .slots
            .read()
            .map_err(|_| LedgerError::Storage("lock poisoned".to_string()))?;
        Ok(slots.get(product_id).cloned())
    }

    fn slot_or_create(&self, product_id: ProductId) -> Result<Slot, LedgerError> {
        if let Some(slot) = self.slot(&product_id)? {
            return Ok(slot);
        }
        let mut slots = self
            .slots
            .write()
            .map_err(|_| LedgerError::Storage("lock poisoned".to_string()))?;
        Ok(slots
            .entry(product_id)
            .or_insert_with(|| Arc::new(SlotMutex::new(None)))
            .clone())
    }

    /// Lock every existing slot among `product_ids` in ascending order.
    async fn lock_ordered<'a, I>(
        &self,
        product_ids: I,
    ) -> Result<BTreeMap<ProductId, OwnedMutexGuard<Option<i64>>>, LedgerError>
    where
        I: IntoIterator<Item = &'a ProductId>,
    {
        let ordered: BTreeSet<ProductId> = product_ids.into_iter().copied().collect();
        let mut guards = BTreeMap::new();
        for product_id in ordered {
            if let Some(slot) = self.slot(&product_id)? {
                guards.insert(product_id, slot.lock_owned().await);
            }
        }
        Ok(guards)
    }

    fn audit_log(&self) -> Result<MutexGuard<'_, Vec<AuditEntry>>, LedgerError> {
        self.audit
            .lock()
            .map_err(|_| LedgerError::Storage("audit lock poisoned".to_string()))
    }

    fn keys(&self) -> Result<MutexGuard<'_, HashMap<String, AdjustStockResponse>>, LedgerError> {
        self.applied_keys
            .lock()
            .map_err(|_| LedgerError::Storage("idempotency lock poisoned".to_string()))
    }

    fn publish(&self, changes: Vec<StockChange>) {
        for change in changes {
            // No subscribers is fine.
            let _ = self.feed.send(change);
        }
    }
}

#[async_trait]
impl StockLedger for InMemoryStockLedger {
    async fn get_stock(&self, product_id: ProductId) -> Result<Option<i64>, LedgerError> {
        match self.slot(&product_id)? {
            Some(slot) => Ok(*slot.lock().await),
            None => Ok(None),
        }
    }

    async fn batch_get_stock(
        &self,
        product_ids: &[ProductId],
    ) -> Result<BTreeMap<ProductId, i64>, LedgerError> {
        let mut out = BTreeMap::new();
        for product_id in product_ids.iter().collect::<BTreeSet<_>>() {
            if let Some(quantity) = self.get_stock(*product_id).await? {
                out.insert(*product_id, quantity);
            }
        }
        Ok(out)
    }

    #[instrument(
        skip(self, request),
        fields(
            correlation_id = %request.correlation_id,
            item_count = request.items.len()
        ),
        err
    )]
    async fn decrease_stock(
        &self,
        request: DecreaseStockRequest,
    ) -> Result<DecreaseStockResponse, LedgerError> {
        let mut guards = self
            .lock_ordered(request.items.iter().map(|i| &i.product_id))
            .await?;

        let plan = match plan_debit(&request.items, |id| guards.get(id).and_then(|g| **g)) {
            Ok(plan) => plan,
            Err(rejection) => {
                debug!(error = %rejection, "decrease rejected");
                return Ok(DecreaseStockResponse::rejected(rejection));
            }
        };

        let reason = sale_reason(request.correlation_id);
        let now = Utc::now();
        let mut changes = Vec::with_capacity(plan.lines().len());
        {
            let mut audit = self.audit_log()?;
            for (line, quantity_after) in plan.steps() {
                let entry = AuditEntry::record(
                    line.product_id,
                    request.actor_id,
                    -line.quantity,
                    reason.clone(),
                    now,
                );
                audit.push(entry.clone());
                changes.push(StockChange {
                    entry,
                    quantity_after,
                });
            }
        }

        for (product_id, quantity) in plan.resulting_quantities() {
            if let Some(guard) = guards.get_mut(product_id) {
                **guard = Some(*quantity);
            }
        }

        // Published while the product locks are still held: feed order matches commit order.
        self.publish(changes);
        drop(guards);

        Ok(DecreaseStockResponse::decreased())
    }

    #[instrument(
        skip(self, request),
        fields(product_id = %request.product_id, delta = request.delta),
        err
    )]
    async fn adjust_stock(
        &self,
        request: AdjustStockRequest,
    ) -> Result<AdjustStockResponse, LedgerError> {
        if let Err(rejection) = validate_reason(&request.reason) {
            return Ok(AdjustStockResponse::rejected(rejection));
        }

        let slot = if request.delta >= 0 {
            self.slot_or_create(request.product_id)?
        } else {
            match self.slot(&request.product_id)? {
                Some(slot) => slot,
                // A negative delta can never have created a record, so there is nothing
                // to replay either.
                None => {
                    return Ok(AdjustStockResponse::rejected(
                        retail_core::DomainError::not_found(request.product_id),
                    ));
                }
            }
        };

        let mut guard = slot.lock_owned().await;
        let mut keys = self.keys()?;

        if let Some(key) = &request.idempotency_key {
            if let Some(previous) = keys.get(key) {
                debug!(idempotency_key = %key, "adjustment replayed");
                let mut replay = previous.clone();
                replay.replayed = true;
                return Ok(replay);
            }
        }

        let plan = match plan_adjust(request.product_id, *guard, request.delta) {
            Ok(plan) => plan,
            Err(rejection) => return Ok(AdjustStockResponse::rejected(rejection)),
        };

        let entry = AuditEntry::record(
            request.product_id,
            request.actor_id,
            request.delta,
            request.reason,
            Utc::now(),
        );
        self.audit_log()?.push(entry.clone());
        *guard = Some(plan.new_quantity);

        let response = AdjustStockResponse::adjusted(plan.new_quantity, entry.entry_id);
        if let Some(key) = request.idempotency_key {
            keys.insert(key, response.clone());
        }
        drop(keys);

        self.publish(vec![StockChange {
            entry,
            quantity_after: plan.new_quantity,
        }]);
        drop(guard);

        Ok(response)
    }

    async fn audit_trail(&self, product_id: ProductId) -> Result<Vec<AuditEntry>, LedgerError> {
        let audit = self.audit_log()?;
        Ok(audit
            .iter()
            .filter(|e| e.product_id == product_id)
            .cloned()
            .collect())
    }

    async fn snapshot(&self) -> Result<LedgerSnapshot, LedgerError> {
        let product_ids: Vec<ProductId> = {
            let slots = self
                .slots
                .read()
                .map_err(|_| LedgerError::Storage("lock poisoned".to_string()))?;
            slots.keys().copied().collect()
        };

        let guards = self.lock_ordered(product_ids.iter()).await?;
        let quantities = guards
            .iter()
            .filter_map(|(id, g)| (**g).map(|q| (*id, q)))
            .collect();
        // Products created after the key copy are not locked; their entries belong to
        // a later snapshot.
        let entries = self
            .audit_log()?
            .iter()
            .filter(|e| guards.contains_key(&e.product_id))
            .cloned()
            .collect();

        Ok(LedgerSnapshot {
            quantities,
            entries,
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<StockChange> {
        self.feed.subscribe()
    }
}
