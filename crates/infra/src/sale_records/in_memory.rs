use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;

use retail_core::{ActorId, SaleId};
use retail_sales::SaleRecord;

use super::{SaleRecordStore, SaleStoreError, SaleTransaction};

/// Where an injected failure strikes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Begin,
    Insert,
    Commit,
    /// `commit` never completes (simulates a hung database).
    HangOnCommit,
}

#[derive(Debug, Default)]
struct Inner {
    sales: RwLock<HashMap<SaleId, SaleRecord>>,
    fail_point: Mutex<Option<FailPoint>>,
}

impl Inner {
    fn fails_at(&self, point: FailPoint) -> bool {
        self.fail_point
            .lock()
            .map(|p| *p == Some(point))
            .unwrap_or(false)
    }
}

/// In-memory sale store for tests/dev, with failure injection.
#[derive(Debug, Default, Clone)]
pub struct InMemorySaleRecordStore {
    inner: Arc<Inner>,
}

impl InMemorySaleRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent transaction fail at `point` (`None` to heal).
    pub fn fail_at(&self, point: Option<FailPoint>) {
        if let Ok(mut p) = self.inner.fail_point.lock() {
            *p = point;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.sales.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SaleRecordStore for InMemorySaleRecordStore {
    async fn begin(&self) -> Result<Box<dyn SaleTransaction>, SaleStoreError> {
        if self.inner.fails_at(FailPoint::Begin) {
            return Err(SaleStoreError::Storage("injected failure at begin".to_string()));
        }
        Ok(Box::new(InMemorySaleTransaction {
            inner: self.inner.clone(),
            staged: Vec::new(),
        }))
    }

    async fn find(&self, sale_id: SaleId) -> Result<Option<SaleRecord>, SaleStoreError> {
        let sales = self
            .inner
            .sales
            .read()
            .map_err(|_| SaleStoreError::Storage("lock poisoned".to_string()))?;
        Ok(sales.get(&sale_id).cloned())
    }

    async fn list(&self, actor: Option<ActorId>) -> Result<Vec<SaleRecord>, SaleStoreError> {
        let sales = self
            .inner
            .sales
            .read()
            .map_err(|_| SaleStoreError::Storage("lock poisoned".to_string()))?;
        let mut records: Vec<SaleRecord> = sales
            .values()
            .filter(|r| actor.is_none_or(|a| r.actor_id == a))
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.sale_id.cmp(&a.sale_id))
        });
        Ok(records)
    }
}

struct InMemorySaleTransaction {
    inner: Arc<Inner>,
    staged: Vec<SaleRecord>,
}

#[async_trait]
impl SaleTransaction for InMemorySaleTransaction {
    async fn insert_sale(&mut self, record: &SaleRecord) -> Result<(), SaleStoreError> {
        if self.inner.fails_at(FailPoint::Insert) {
            return Err(SaleStoreError::Storage("injected failure at insert".to_string()));
        }
        self.staged.push(record.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), SaleStoreError> {
        if self.inner.fails_at(FailPoint::HangOnCommit) {
            std::future::pending::<()>().await;
        }
        if self.inner.fails_at(FailPoint::Commit) {
            return Err(SaleStoreError::Storage("injected failure at commit".to_string()));
        }

        let mut sales = self
            .inner
            .sales
            .write()
            .map_err(|_| SaleStoreError::Storage("lock poisoned".to_string()))?;
        if let Some(dup) = self.staged.iter().find(|r| sales.contains_key(&r.sale_id)) {
            return Err(SaleStoreError::Duplicate(dup.sale_id));
        }
        for record in self.staged {
            sales.insert(record.sale_id, record);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), SaleStoreError> {
        Ok(())
    }
}
