use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use retail_core::CompensationId;

use super::{CompensationIntent, CompensationOutbox, IntentStatus, OutboxError};

/// In-memory outbox for tests/dev (not durable across restarts).
#[derive(Debug, Default)]
pub struct InMemoryCompensationOutbox {
    intents: RwLock<HashMap<CompensationId, CompensationIntent>>,
}

impl InMemoryCompensationOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn all(&self) -> Vec<CompensationIntent> {
        let mut all: Vec<_> = self
            .intents
            .read()
            .map(|i| i.values().cloned().collect())
            .unwrap_or_default();
        all.sort_by_key(|i| i.created_at);
        all
    }

    fn update<F, T>(&self, intent_id: CompensationId, f: F) -> Result<T, OutboxError>
    where
        F: FnOnce(&mut CompensationIntent) -> T,
    {
        let mut intents = self
            .intents
            .write()
            .map_err(|_| OutboxError::Storage("lock poisoned".to_string()))?;
        let intent = intents
            .get_mut(&intent_id)
            .ok_or(OutboxError::NotFound(intent_id))?;
        let out = f(intent);
        intent.updated_at = Utc::now();
        Ok(out)
    }
}

#[async_trait]
impl CompensationOutbox for InMemoryCompensationOutbox {
    async fn record(&self, intent: CompensationIntent) -> Result<(), OutboxError> {
        let mut intents = self
            .intents
            .write()
            .map_err(|_| OutboxError::Storage("lock poisoned".to_string()))?;
        if intents.contains_key(&intent.intent_id) {
            return Err(OutboxError::AlreadyExists(intent.intent_id));
        }
        intents.insert(intent.intent_id, intent);
        Ok(())
    }

    async fn get(&self, intent_id: CompensationId) -> Result<Option<CompensationIntent>, OutboxError> {
        let intents = self
            .intents
            .read()
            .map_err(|_| OutboxError::Storage("lock poisoned".to_string()))?;
        Ok(intents.get(&intent_id).cloned())
    }

    async fn pending(&self, limit: usize) -> Result<Vec<CompensationIntent>, OutboxError> {
        let intents = self
            .intents
            .read()
            .map_err(|_| OutboxError::Storage("lock poisoned".to_string()))?;
        let mut pending: Vec<_> = intents
            .values()
            .filter(|i| i.status == IntentStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|i| i.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_completed(&self, intent_id: CompensationId) -> Result<(), OutboxError> {
        self.update(intent_id, |i| {
            i.status = IntentStatus::Completed;
            i.last_error = None;
        })
    }

    async fn mark_failed(&self, intent_id: CompensationId, error: String) -> Result<u32, OutboxError> {
        self.update(intent_id, |i| {
            i.attempts += 1;
            i.last_error = Some(error);
            i.attempts
        })
    }

    async fn mark_abandoned(&self, intent_id: CompensationId, error: String) -> Result<(), OutboxError> {
        self.update(intent_id, |i| {
            i.status = IntentStatus::Abandoned;
            i.last_error = Some(error);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use retail_core::{ActorId, ProductId, SaleId};
    use retail_inventory::StockLine;

    #[tokio::test]
    async fn lifecycle_moves_intent_out_of_pending() {
        let outbox = InMemoryCompensationOutbox::new();
        let intent = CompensationIntent::pending(
            SaleId::new(),
            ActorId::new(),
            vec![StockLine::new(ProductId::new(), 2)],
        );
        let id = intent.intent_id;
        outbox.record(intent.clone()).await.unwrap();
        assert_eq!(
            outbox.record(intent).await,
            Err(OutboxError::AlreadyExists(id))
        );

        assert_eq!(outbox.mark_failed(id, "ledger down".into()).await.unwrap(), 1);
        assert_eq!(outbox.pending(10).await.unwrap().len(), 1);

        outbox.mark_completed(id).await.unwrap();
        assert!(outbox.pending(10).await.unwrap().is_empty());
        let stored = outbox.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::Completed);
        assert_eq!(stored.attempts, 1);
    }
}
