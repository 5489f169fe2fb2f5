//! Scenario tests for the sale saga against the in-memory ledger.
//!
//! Pipeline: Catalog → SaleSaga → LedgerGateway → StockLedger, with the sale store,
//! compensation outbox and alarm sink wired in explicitly.
//!
//! Verifies:
//! - Concurrent sales never oversell and never drive stock negative
//! - A rejected debit leaves every line untouched
//! - Persistence failure or cancellation after a debit credits the stock back
//! - Failed compensation is alarmed, re-driven by the sweep, and abandoned after retries

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use retail_core::{ActorId, CompensationId, DomainError, Money, ProductId};
    use retail_inventory::{
        AdjustStockRequest, AdjustStockResponse, AuditEntry, DecreaseStockRequest,
        DecreaseStockResponse, StockLine,
    };
    use retail_observability::{AlarmKind, MemoryAlarmSink};
    use retail_products::{CatalogEntry, InMemoryProductCatalog};
    use retail_sales::{SaleLineRequest, SaleRequest};

    use crate::gateway::{GatewayError, LedgerGateway, LocalLedgerGateway};
    use crate::ledger::{InMemoryStockLedger, StockLedger};
    use crate::outbox::{
        CompensationIntent, CompensationOutbox, InMemoryCompensationOutbox, IntentStatus,
        OutboxError, compensation_key,
    };
    use crate::reconcile::reconcile_ledger;
    use crate::sale_records::{FailPoint, InMemorySaleRecordStore, SaleRecordStore};
    use crate::saga::{CompensationOutcome, CompensationRecovery, SaleError, SaleSaga};

    /// Local gateway with switchable infrastructure failures.
    struct FlakyGateway {
        inner: LocalLedgerGateway,
        fail_debits: AtomicBool,
        fail_credits: AtomicBool,
    }

    impl FlakyGateway {
        fn injected() -> GatewayError {
            GatewayError::Unavailable("injected ledger outage".to_string())
        }
    }

    #[async_trait]
    impl LedgerGateway for FlakyGateway {
        async fn get_stock(&self, product_id: ProductId) -> Result<Option<i64>, GatewayError> {
            self.inner.get_stock(product_id).await
        }

        async fn batch_get_stock(
            &self,
            product_ids: &[ProductId],
        ) -> Result<BTreeMap<ProductId, i64>, GatewayError> {
            self.inner.batch_get_stock(product_ids).await
        }

        async fn decrease_stock(
            &self,
            request: DecreaseStockRequest,
        ) -> Result<DecreaseStockResponse, GatewayError> {
            if self.fail_debits.load(Ordering::SeqCst) {
                return Err(Self::injected());
            }
            self.inner.decrease_stock(request).await
        }

        async fn adjust_stock(
            &self,
            request: AdjustStockRequest,
        ) -> Result<AdjustStockResponse, GatewayError> {
            if self.fail_credits.load(Ordering::SeqCst) {
                return Err(Self::injected());
            }
            self.inner.adjust_stock(request).await
        }

        async fn audit_trail(&self, product_id: ProductId) -> Result<Vec<AuditEntry>, GatewayError> {
            self.inner.audit_trail(product_id).await
        }
    }

    /// Outbox whose next `record` never completes (a stalled database round trip).
    struct StallingOutbox {
        inner: Arc<InMemoryCompensationOutbox>,
        stall_next_record: AtomicBool,
    }

    #[async_trait]
    impl CompensationOutbox for StallingOutbox {
        async fn record(&self, intent: CompensationIntent) -> Result<(), OutboxError> {
            if self.stall_next_record.swap(false, Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            self.inner.record(intent).await
        }

        async fn get(
            &self,
            intent_id: CompensationId,
        ) -> Result<Option<CompensationIntent>, OutboxError> {
            self.inner.get(intent_id).await
        }

        async fn pending(&self, limit: usize) -> Result<Vec<CompensationIntent>, OutboxError> {
            self.inner.pending(limit).await
        }

        async fn mark_completed(&self, intent_id: CompensationId) -> Result<(), OutboxError> {
            self.inner.mark_completed(intent_id).await
        }

        async fn mark_failed(
            &self,
            intent_id: CompensationId,
            error: String,
        ) -> Result<u32, OutboxError> {
            self.inner.mark_failed(intent_id, error).await
        }

        async fn mark_abandoned(
            &self,
            intent_id: CompensationId,
            error: String,
        ) -> Result<(), OutboxError> {
            self.inner.mark_abandoned(intent_id, error).await
        }
    }

    struct Harness {
        ledger: Arc<InMemoryStockLedger>,
        catalog: Arc<InMemoryProductCatalog>,
        sales: InMemorySaleRecordStore,
        outbox: Arc<InMemoryCompensationOutbox>,
        alarms: Arc<MemoryAlarmSink>,
        gateway: Arc<FlakyGateway>,
        saga: SaleSaga,
        actor: ActorId,
    }

    fn setup() -> Harness {
        let ledger = InMemoryStockLedger::arc();
        let catalog = Arc::new(InMemoryProductCatalog::new());
        let sales = InMemorySaleRecordStore::new();
        let outbox = InMemoryCompensationOutbox::arc();
        let alarms = Arc::new(MemoryAlarmSink::new());
        let gateway = Arc::new(FlakyGateway {
            inner: LocalLedgerGateway::new(ledger.clone(), Duration::from_secs(2)),
            fail_debits: AtomicBool::new(false),
            fail_credits: AtomicBool::new(false),
        });
        let saga = SaleSaga::new(
            catalog.clone(),
            gateway.clone(),
            Arc::new(sales.clone()),
            outbox.clone(),
            alarms.clone(),
        );

        Harness {
            ledger,
            catalog,
            sales,
            outbox,
            alarms,
            gateway,
            saga,
            actor: ActorId::new(),
        }
    }

    impl Harness {
        /// Register a product at `price` minor units and stock it with `quantity`.
        async fn product(&self, name: &str, price: u64, quantity: i64) -> ProductId {
            let product_id = ProductId::new();
            self.catalog
                .upsert(CatalogEntry::new(product_id, name, Money::from_minor(price)))
                .unwrap();
            if quantity > 0 {
                self.ledger
                    .adjust_stock(AdjustStockRequest {
                        product_id,
                        actor_id: self.actor,
                        delta: quantity,
                        reason: "opening stock".to_string(),
                        idempotency_key: None,
                    })
                    .await
                    .unwrap()
                    .into_result()
                    .unwrap();
            }
            product_id
        }

        fn sale(&self, lines: &[(ProductId, i64)]) -> SaleRequest {
            SaleRequest::new(
                self.actor,
                lines
                    .iter()
                    .map(|&(product_id, quantity)| SaleLineRequest {
                        product_id,
                        quantity,
                    })
                    .collect(),
            )
        }

        async fn stock(&self, product_id: ProductId) -> Option<i64> {
            self.ledger.get_stock(product_id).await.unwrap()
        }

        fn recovery(&self, max_attempts: u32) -> CompensationRecovery {
            CompensationRecovery::new(
                self.saga.compensator().clone(),
                self.outbox.clone(),
                self.alarms.clone(),
            )
            .with_max_attempts(max_attempts)
        }

        async fn assert_reconciled(&self) {
            let discrepancies = reconcile_ledger(self.ledger.as_ref()).await.unwrap();
            assert!(discrepancies.is_empty(), "discrepancies: {discrepancies:?}");
        }
    }

    #[tokio::test]
    async fn sale_records_lines_with_snapshot_prices() {
        let h = setup();
        let tea = h.product("tea", 250, 10).await;
        let mug = h.product("mug", 1_200, 3).await;

        let receipt = h.saga.create(h.sale(&[(tea, 4), (mug, 1)])).await.unwrap();

        assert_eq!(receipt.total, Money::from_minor(4 * 250 + 1_200));
        assert_eq!(receipt.lines.len(), 2);
        assert_eq!(receipt.lines[0].name, "tea");
        assert_eq!(receipt.lines[1].name, "mug");
        assert_eq!(h.stock(tea).await, Some(6));
        assert_eq!(h.stock(mug).await, Some(2));

        let stored = h.saga.find(receipt.sale_id).await.unwrap().unwrap();
        assert_eq!(stored.lines.len(), 2);
        assert_eq!(stored.lines[0].unit_price_at_sale, Money::from_minor(250));
        assert_eq!(stored.lines[1].product_name, "mug");

        let history = h.saga.list(Some(h.actor)).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].sale_id, receipt.sale_id);
        assert!(h.saga.list(Some(ActorId::new())).await.unwrap().is_empty());

        let trail = h.ledger.audit_trail(tea).await.unwrap();
        assert!(trail.last().unwrap().reason.contains(&receipt.sale_id.to_string()));
        h.assert_reconciled().await;
    }

    #[tokio::test]
    async fn later_price_changes_do_not_touch_recorded_sales() {
        let h = setup();
        let tea = h.product("tea", 250, 10).await;

        let receipt = h.saga.create(h.sale(&[(tea, 2)])).await.unwrap();
        h.catalog.set_price(tea, Money::from_minor(999)).unwrap();

        let stored = h.saga.find(receipt.sale_id).await.unwrap().unwrap();
        assert_eq!(stored.lines[0].unit_price_at_sale, Money::from_minor(250));
        assert_eq!(stored.total().unwrap(), Money::from_minor(500));
        assert_eq!(receipt.total, Money::from_minor(500));
    }

    #[tokio::test]
    async fn selling_the_whole_stock_then_one_more_fails_insufficient() {
        let h = setup();
        let p = h.product("lamp", 100, 10).await;

        h.saga.create(h.sale(&[(p, 10)])).await.unwrap();
        let err = h.saga.create(h.sale(&[(p, 1)])).await.unwrap_err();

        assert!(matches!(
            err,
            SaleError::Rejected(DomainError::InsufficientStock { requested: 1, available: 0, .. })
        ));
        assert_eq!(h.stock(p).await, Some(0));
        assert_eq!(h.sales.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sales_for_the_last_units_never_oversell() {
        let h = setup();
        let p = h.product("lamp", 100, 10).await;

        let (big, small) = tokio::join!(
            h.saga.create(h.sale(&[(p, 10)])),
            h.saga.create(h.sale(&[(p, 1)])),
        );

        let remaining = h.stock(p).await.unwrap();
        match (big, small) {
            (Ok(_), Err(err)) => {
                assert!(matches!(err, SaleError::Rejected(DomainError::InsufficientStock { .. })));
                assert_eq!(remaining, 0);
            }
            (Err(err), Ok(_)) => {
                assert!(matches!(err, SaleError::Rejected(DomainError::InsufficientStock { .. })));
                assert_eq!(remaining, 9);
            }
            other => panic!("exactly one sale must win, got {other:?}"),
        }
        h.assert_reconciled().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn many_single_unit_sales_sell_exactly_the_stock() {
        let h = Arc::new(setup());
        let p = h.product("sticker", 50, 20).await;

        let mut tasks = Vec::new();
        for _ in 0..35 {
            let h = h.clone();
            tasks.push(tokio::spawn(async move { h.saga.create(h.sale(&[(p, 1)])).await }));
        }

        let mut sold = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => sold += 1,
                Err(SaleError::Rejected(DomainError::InsufficientStock { .. })) => {}
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert_eq!(sold, 20);
        assert_eq!(h.stock(p).await, Some(0));
        assert_eq!(h.sales.len(), 20);
        h.assert_reconciled().await;
    }

    #[tokio::test]
    async fn one_short_line_rejects_the_sale_and_leaves_other_lines_untouched() {
        let h = setup();
        let p1 = h.product("pen", 120, 5).await;
        let p2 = h.product("ink", 800, 1).await;

        let err = h.saga.create(h.sale(&[(p1, 2), (p2, 3)])).await.unwrap_err();

        match err {
            SaleError::Rejected(DomainError::InsufficientStock {
                product_id,
                requested,
                available,
            }) => {
                assert_eq!(product_id, p2);
                assert_eq!(requested, 3);
                assert_eq!(available, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(h.stock(p1).await, Some(5));
        assert_eq!(h.stock(p2).await, Some(1));
        assert_eq!(h.ledger.audit_trail(p1).await.unwrap().len(), 1);
        assert!(h.sales.is_empty());
        assert!(h.outbox.all().is_empty());
    }

    #[tokio::test]
    async fn repeated_product_lines_are_checked_in_aggregate() {
        let h = setup();
        let p = h.product("cup", 300, 3).await;

        let err = h.saga.create(h.sale(&[(p, 2), (p, 2)])).await.unwrap_err();
        assert!(matches!(err, SaleError::Rejected(DomainError::InsufficientStock { .. })));
        assert_eq!(h.stock(p).await, Some(3));

        let receipt = h.saga.create(h.sale(&[(p, 1), (p, 2)])).await.unwrap();
        assert_eq!(receipt.lines.len(), 2);
        assert_eq!(h.stock(p).await, Some(0));
        h.assert_reconciled().await;
    }

    #[tokio::test]
    async fn unknown_product_aborts_before_any_side_effect() {
        let h = setup();
        let known = h.product("pen", 120, 5).await;
        let unknown = ProductId::new();

        let err = h.saga.create(h.sale(&[(known, 1), (unknown, 1)])).await.unwrap_err();

        assert_eq!(err, SaleError::Rejected(DomainError::not_found(unknown)));
        assert_eq!(h.stock(known).await, Some(5));
        assert_eq!(h.ledger.audit_trail(known).await.unwrap().len(), 1);
        assert!(h.sales.is_empty());
    }

    #[tokio::test]
    async fn malformed_request_is_rejected_as_invalid_input() {
        let h = setup();
        let p = h.product("pen", 120, 5).await;

        for request in [h.sale(&[]), h.sale(&[(p, 0)]), h.sale(&[(p, -2)])] {
            let err = h.saga.create(request).await.unwrap_err();
            assert!(matches!(err, SaleError::Rejected(DomainError::InvalidInput { .. })));
        }
        assert_eq!(h.stock(p).await, Some(5));
    }

    #[tokio::test]
    async fn commit_failure_after_debit_credits_the_stock_back() {
        let h = setup();
        let p = h.product("lamp", 100, 4).await;
        h.sales.fail_at(Some(FailPoint::Commit));

        let err = h.saga.create(h.sale(&[(p, 1)])).await.unwrap_err();

        let sale_id = match err {
            SaleError::PersistenceFailed {
                sale_id,
                compensation,
                ..
            } => {
                assert_eq!(compensation, CompensationOutcome::Credited);
                sale_id
            }
            other => panic!("unexpected error: {other:?}"),
        };
        assert_eq!(h.stock(p).await, Some(4));

        let changes: Vec<i64> = h
            .ledger
            .audit_trail(p)
            .await
            .unwrap()
            .iter()
            .map(|e| e.change_quantity)
            .collect();
        assert_eq!(changes, vec![4, -1, 1]);
        let last = h.ledger.audit_trail(p).await.unwrap().pop().unwrap();
        assert_eq!(last.reason, format!("compensating rollback for {sale_id}"));

        let intents = h.outbox.all();
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].status, IntentStatus::Completed);
        assert_eq!(h.alarms.alarms().len(), 0);
        h.assert_reconciled().await;
    }

    #[tokio::test]
    async fn insert_failure_rolls_back_and_compensates_every_line() {
        let h = setup();
        let p1 = h.product("pen", 120, 5).await;
        let p2 = h.product("ink", 800, 2).await;
        h.sales.fail_at(Some(FailPoint::Insert));

        let err = h.saga.create(h.sale(&[(p1, 2), (p2, 2)])).await.unwrap_err();

        assert!(matches!(
            err,
            SaleError::PersistenceFailed {
                compensation: CompensationOutcome::Credited,
                ..
            }
        ));
        assert_eq!(h.stock(p1).await, Some(5));
        assert_eq!(h.stock(p2).await, Some(2));
        assert!(h.sales.is_empty());
        h.assert_reconciled().await;
    }

    #[tokio::test]
    async fn unknown_debit_outcome_is_alarmed_and_never_blindly_credited() {
        let h = setup();
        let p = h.product("lamp", 100, 4).await;
        h.gateway.fail_debits.store(true, Ordering::SeqCst);

        let err = h.saga.create(h.sale(&[(p, 1)])).await.unwrap_err();

        assert!(matches!(
            err,
            SaleError::LedgerOutcomeUnknown {
                source: GatewayError::Unavailable(_),
                ..
            }
        ));
        assert_eq!(h.alarms.count(AlarmKind::LedgerOutcomeUnknown), 1);
        assert!(h.outbox.all().is_empty());
        assert_eq!(h.stock(p).await, Some(4));
    }

    #[tokio::test]
    async fn failed_compensation_is_alarmed_then_settled_by_the_sweep() {
        let h = setup();
        let p = h.product("lamp", 100, 4).await;
        h.sales.fail_at(Some(FailPoint::Commit));
        h.gateway.fail_credits.store(true, Ordering::SeqCst);

        let err = h.saga.create(h.sale(&[(p, 3)])).await.unwrap_err();

        assert!(matches!(
            err,
            SaleError::PersistenceFailed {
                compensation: CompensationOutcome::Pending,
                ..
            }
        ));
        assert_eq!(h.stock(p).await, Some(1));
        assert_eq!(h.alarms.count(AlarmKind::CompensationFailed), 1);
        let pending = h.outbox.pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);

        h.gateway.fail_credits.store(false, Ordering::SeqCst);
        let report = h.recovery(5).sweep().await.unwrap();

        assert_eq!(report.examined, 1);
        assert_eq!(report.completed, 1);
        assert_eq!(h.stock(p).await, Some(4));
        assert!(h.outbox.pending(10).await.unwrap().is_empty());

        // A second sweep finds nothing to do and credits nothing twice.
        let report = h.recovery(5).sweep().await.unwrap();
        assert_eq!(report.examined, 0);
        assert_eq!(h.stock(p).await, Some(4));
        h.assert_reconciled().await;
    }

    #[tokio::test]
    async fn sweep_abandons_after_max_attempts_with_an_alarm() {
        let h = setup();
        let p = h.product("lamp", 100, 4).await;
        h.sales.fail_at(Some(FailPoint::Commit));
        h.gateway.fail_credits.store(true, Ordering::SeqCst);

        h.saga.create(h.sale(&[(p, 2)])).await.unwrap_err();
        let recovery = h.recovery(3);

        let first = recovery.sweep().await.unwrap();
        assert_eq!(first.still_pending, 1);
        let second = recovery.sweep().await.unwrap();
        assert_eq!(second.abandoned, 1);

        let intents = h.outbox.all();
        assert_eq!(intents[0].status, IntentStatus::Abandoned);
        assert_eq!(intents[0].attempts, 3);
        assert!(intents[0].last_error.is_some());
        assert_eq!(h.alarms.count(AlarmKind::CompensationAbandoned), 1);
        assert_eq!(recovery.sweep().await.unwrap().examined, 0);
        assert_eq!(h.stock(p).await, Some(2));
    }

    #[tokio::test]
    async fn sweep_replays_lines_that_were_already_credited() {
        let h = setup();
        let p1 = h.product("pen", 120, 5).await;
        let p2 = h.product("ink", 800, 5).await;
        let intent = CompensationIntent::pending(
            retail_core::SaleId::new(),
            h.actor,
            vec![StockLine::new(p1, 2), StockLine::new(p2, 1)],
        );
        h.outbox.record(intent.clone()).await.unwrap();

        // Line 0 was credited before a crash; line 1 was not.
        h.gateway
            .adjust_stock(AdjustStockRequest {
                product_id: p1,
                actor_id: h.actor,
                delta: 2,
                reason: format!("compensating rollback for {}", intent.sale_id),
                idempotency_key: Some(compensation_key(intent.sale_id, 0)),
            })
            .await
            .unwrap();

        let report = h.recovery(5).sweep().await.unwrap();

        assert_eq!(report.completed, 1);
        assert_eq!(h.stock(p1).await, Some(7));
        assert_eq!(h.stock(p2).await, Some(6));
        assert_eq!(
            h.outbox.get(intent.intent_id).await.unwrap().unwrap().status,
            IntentStatus::Completed
        );
    }

    #[tokio::test]
    async fn compensation_is_not_owed_for_a_recorded_sale() {
        let h = setup();
        let p = h.product("pen", 120, 5).await;
        let receipt = h.saga.create(h.sale(&[(p, 2)])).await.unwrap();

        let outcome = h
            .saga
            .compensator()
            .compensate(receipt.sale_id, h.actor, vec![StockLine::new(p, 2)])
            .await;

        assert_eq!(outcome, CompensationOutcome::NotNeeded);
        assert_eq!(h.stock(p).await, Some(3));
        assert!(h.sales.find(receipt.sale_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cancelled_sale_after_debit_is_compensated() {
        let h = setup();
        let p = h.product("lamp", 100, 4).await;
        h.sales.fail_at(Some(FailPoint::HangOnCommit));

        let timed_out =
            tokio::time::timeout(Duration::from_millis(50), h.saga.create(h.sale(&[(p, 3)]))).await;
        assert!(timed_out.is_err());

        let mut restored = None;
        for _ in 0..100 {
            restored = h.stock(p).await;
            if restored == Some(4) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(restored, Some(4));
        assert!(h.sales.is_empty());
        h.assert_reconciled().await;
    }

    #[tokio::test]
    async fn sale_cancelled_while_recording_compensation_is_still_credited() {
        let h = setup();
        let p = h.product("kettle", 900, 5).await;
        h.sales.fail_at(Some(FailPoint::Insert));

        let outbox = Arc::new(StallingOutbox {
            inner: h.outbox.clone(),
            stall_next_record: AtomicBool::new(true),
        });
        let saga = SaleSaga::new(
            h.catalog.clone(),
            h.gateway.clone(),
            Arc::new(h.sales.clone()),
            outbox.clone(),
            h.alarms.clone(),
        );

        let timed_out =
            tokio::time::timeout(Duration::from_millis(50), saga.create(h.sale(&[(p, 2)]))).await;
        assert!(timed_out.is_err());
        assert!(!outbox.stall_next_record.load(Ordering::SeqCst));

        let mut restored = None;
        for _ in 0..100 {
            restored = h.stock(p).await;
            if restored == Some(5) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(restored, Some(5));
        assert!(h.sales.is_empty());
        h.assert_reconciled().await;
    }
}
