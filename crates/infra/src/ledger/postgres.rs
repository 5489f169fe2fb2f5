//! Postgres-backed stock ledger.
//!
//! ## Concurrency
//!
//! Every mutation runs in one transaction that first locks the affected
//! `stock_records` rows with `SELECT ... FOR UPDATE ORDER BY product_id`. Rows are
//! always locked in the same order, so concurrent multi-product debits queue
//! instead of deadlocking, and transactions on disjoint products never block each
//! other. `CHECK (quantity >= 0)` backs the non-negative invariant at the storage
//! level.
//!
//! ## Error Mapping
//!
//! | SQLx error | PostgreSQL code | Result |
//! |------------|-----------------|--------|
//! | Database (unique violation) on `idempotency_key` | `23505` | replay of the first outcome |
//! | Database (check violation) | `23514` | `LedgerError::Storage` (planning should have prevented it) |
//! | anything else | any | `LedgerError::Storage` |

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::sync::broadcast;
use tracing::{debug, instrument};
use uuid::Uuid;

use retail_core::{ActorId, AuditEntryId, DomainError, ProductId};
use retail_inventory::{
    AdjustStockRequest, AdjustStockResponse, AuditEntry, DecreaseStockRequest,
    DecreaseStockResponse, plan_adjust, plan_debit, sale_reason,
};

use super::{
    CHANGE_FEED_CAPACITY, LedgerError, LedgerSnapshot, StockChange, StockLedger, validate_reason,
};

/// DDL for the ledger tables.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS stock_records (
    product_id  UUID PRIMARY KEY,
    quantity    BIGINT NOT NULL CHECK (quantity >= 0),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS stock_audit_entries (
    entry_id        UUID PRIMARY KEY,
    product_id      UUID NOT NULL REFERENCES stock_records (product_id),
    actor_id        UUID NOT NULL,
    change_quantity BIGINT NOT NULL,
    quantity_after  BIGINT NOT NULL,
    reason          TEXT NOT NULL,
    idempotency_key TEXT UNIQUE,
    created_at      TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS stock_audit_entries_product_idx
    ON stock_audit_entries (product_id, created_at, entry_id);
"#;

#[derive(Debug, Clone)]
pub struct PostgresStockLedger {
    pool: Arc<PgPool>,
    feed: broadcast::Sender<StockChange>,
}

impl PostgresStockLedger {
    pub fn new(pool: PgPool) -> Self {
        let (feed, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            pool: Arc::new(pool),
            feed,
        }
    }

    /// Create the ledger tables if they do not exist.
    pub async fn migrate(&self) -> Result<(), LedgerError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'_, Postgres>, LedgerError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }

    fn publish(&self, changes: Vec<StockChange>) {
        for change in changes {
            let _ = self.feed.send(change);
        }
    }

    /// Outcome previously recorded under `key`, if any.
    async fn find_applied(&self, key: &str) -> Result<Option<AdjustStockResponse>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT entry_id, quantity_after
            FROM stock_audit_entries
            WHERE idempotency_key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_applied", e))?;

        match row {
            Some(row) => {
                let entry_id: Uuid = row
                    .try_get("entry_id")
                    .map_err(|e| map_sqlx_error("find_applied", e))?;
                let quantity_after: i64 = row
                    .try_get("quantity_after")
                    .map_err(|e| map_sqlx_error("find_applied", e))?;
                let mut replay =
                    AdjustStockResponse::adjusted(quantity_after, AuditEntryId::from_uuid(entry_id));
                replay.replayed = true;
                Ok(Some(replay))
            }
            None => Ok(None),
        }
    }

    async fn apply_adjustment(
        &self,
        request: &AdjustStockRequest,
    ) -> Result<Result<(AdjustStockResponse, StockChange), DomainError>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        if request.delta >= 0 {
            // Lazy creation; a concurrent creator simply wins and we lock its row.
            sqlx::query(
                r#"
                INSERT INTO stock_records (product_id, quantity)
                VALUES ($1, 0)
                ON CONFLICT (product_id) DO NOTHING
                "#,
            )
            .bind(request.product_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        }

        let current: Option<i64> = sqlx::query_scalar(
            "SELECT quantity FROM stock_records WHERE product_id = $1 FOR UPDATE",
        )
        .bind(request.product_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        let plan = match plan_adjust(request.product_id, current, request.delta) {
            Ok(plan) => plan,
            Err(rejection) => {
                tx.rollback().await?;
                return Ok(Err(rejection));
            }
        };

        sqlx::query(
            "UPDATE stock_records SET quantity = $2, updated_at = now() WHERE product_id = $1",
        )
        .bind(request.product_id.as_uuid())
        .bind(plan.new_quantity)
        .execute(&mut *tx)
        .await?;

        let entry = AuditEntry::record(
            request.product_id,
            request.actor_id,
            request.delta,
            request.reason.clone(),
            Utc::now(),
        );
        insert_entry(&mut tx, &entry, plan.new_quantity, request.idempotency_key.as_deref()).await?;

        tx.commit().await?;

        Ok(Ok((
            AdjustStockResponse::adjusted(plan.new_quantity, entry.entry_id),
            StockChange {
                entry,
                quantity_after: plan.new_quantity,
            },
        )))
    }
}

async fn insert_entry(
    tx: &mut Transaction<'_, Postgres>,
    entry: &AuditEntry,
    quantity_after: i64,
    idempotency_key: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO stock_audit_entries (
            entry_id,
            product_id,
            actor_id,
            change_quantity,
            quantity_after,
            reason,
            idempotency_key,
            created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(entry.entry_id.as_uuid())
    .bind(entry.product_id.as_uuid())
    .bind(entry.actor_id.as_uuid())
    .bind(entry.change_quantity)
    .bind(quantity_after)
    .bind(&entry.reason)
    .bind(idempotency_key)
    .bind(entry.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl StockLedger for PostgresStockLedger {
    async fn get_stock(&self, product_id: ProductId) -> Result<Option<i64>, LedgerError> {
        sqlx::query_scalar("SELECT quantity FROM stock_records WHERE product_id = $1")
            .bind(product_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_stock", e))
    }

    async fn batch_get_stock(
        &self,
        product_ids: &[ProductId],
    ) -> Result<BTreeMap<ProductId, i64>, LedgerError> {
        if product_ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let ids: Vec<Uuid> = product_ids.iter().map(|p| *p.as_uuid()).collect();

        let rows = sqlx::query(
            "SELECT product_id, quantity FROM stock_records WHERE product_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("batch_get_stock", e))?;

        rows.iter()
            .map(|row| -> Result<(ProductId, i64), sqlx::Error> {
                let product_id: Uuid = row.try_get("product_id")?;
                let quantity: i64 = row.try_get("quantity")?;
                Ok((ProductId::from_uuid(product_id), quantity))
            })
            .collect::<Result<_, sqlx::Error>>()
            .map_err(|e| map_sqlx_error("batch_get_stock", e))
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
        let ids: Vec<Uuid> = request
            .items
            .iter()
            .map(|i| *i.product_id.as_uuid())
            .collect();

        let mut tx = self.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT product_id, quantity
            FROM stock_records
            WHERE product_id = ANY($1)
            ORDER BY product_id
            FOR UPDATE
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_stock_rows", e))?;

        let mut current = BTreeMap::new();
        for row in &rows {
            let product_id: Uuid = row
                .try_get("product_id")
                .map_err(|e| map_sqlx_error("lock_stock_rows", e))?;
            let quantity: i64 = row
                .try_get("quantity")
                .map_err(|e| map_sqlx_error("lock_stock_rows", e))?;
            current.insert(ProductId::from_uuid(product_id), quantity);
        }

        let plan = match plan_debit(&request.items, |id| current.get(id).copied()) {
            Ok(plan) => plan,
            Err(rejection) => {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                debug!(error = %rejection, "decrease rejected");
                return Ok(DecreaseStockResponse::rejected(rejection));
            }
        };

        for (product_id, quantity) in plan.resulting_quantities() {
            sqlx::query(
                "UPDATE stock_records SET quantity = $2, updated_at = now() WHERE product_id = $1",
            )
            .bind(product_id.as_uuid())
            .bind(*quantity)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_stock", e))?;
        }

        let reason = sale_reason(request.correlation_id);
        let now = Utc::now();
        let mut changes = Vec::with_capacity(plan.lines().len());
        for (line, quantity_after) in plan.steps() {
            let entry = AuditEntry::record(
                line.product_id,
                request.actor_id,
                -line.quantity,
                reason.clone(),
                now,
            );
            insert_entry(&mut tx, &entry, quantity_after, None)
                .await
                .map_err(|e| map_sqlx_error("insert_audit_entry", e))?;
            changes.push(StockChange {
                entry,
                quantity_after,
            });
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        self.publish(changes);
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

        if let Some(key) = &request.idempotency_key {
            if let Some(replay) = self.find_applied(key).await? {
                debug!(idempotency_key = %key, "adjustment replayed");
                return Ok(replay);
            }
        }

        match self.apply_adjustment(&request).await {
            Ok(Ok((response, change))) => {
                self.publish(vec![change]);
                Ok(response)
            }
            Ok(Err(rejection)) => Ok(AdjustStockResponse::rejected(rejection)),
            // Lost a race with a concurrent request carrying the same key.
            Err(e) if is_unique_violation(&e) && request.idempotency_key.is_some() => {
                let key = request.idempotency_key.as_deref().unwrap_or_default();
                self.find_applied(key).await?.ok_or_else(|| {
                    LedgerError::Storage(format!("idempotency key {key} conflicted but not found"))
                })
            }
            Err(e) => Err(map_sqlx_error("adjust_stock", e)),
        }
    }

    async fn audit_trail(&self, product_id: ProductId) -> Result<Vec<AuditEntry>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT entry_id, product_id, actor_id, change_quantity, reason, created_at
            FROM stock_audit_entries
            WHERE product_id = $1
            ORDER BY created_at ASC, entry_id ASC
            "#,
        )
        .bind(product_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("audit_trail", e))?;

        rows.iter()
            .map(AuditEntryRow::from_row)
            .map(|r| r.map(AuditEntry::from))
            .collect::<Result<_, _>>()
            .map_err(|e| map_sqlx_error("audit_trail", e))
    }

    async fn snapshot(&self) -> Result<LedgerSnapshot, LedgerError> {
        let mut tx = self.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("snapshot", e))?;

        let quantity_rows = sqlx::query("SELECT product_id, quantity FROM stock_records")
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("snapshot", e))?;
        let entry_rows = sqlx::query(
            r#"
            SELECT entry_id, product_id, actor_id, change_quantity, reason, created_at
            FROM stock_audit_entries
            ORDER BY created_at ASC, entry_id ASC
            "#,
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("snapshot", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("snapshot", e))?;

        let mut quantities = BTreeMap::new();
        for row in &quantity_rows {
            let product_id: Uuid = row
                .try_get("product_id")
                .map_err(|e| map_sqlx_error("snapshot", e))?;
            let quantity: i64 = row
                .try_get("quantity")
                .map_err(|e| map_sqlx_error("snapshot", e))?;
            quantities.insert(ProductId::from_uuid(product_id), quantity);
        }
        let entries = entry_rows
            .iter()
            .map(AuditEntryRow::from_row)
            .map(|r| r.map(AuditEntry::from))
            .collect::<Result<_, _>>()
            .map_err(|e| map_sqlx_error("snapshot", e))?;

        Ok(LedgerSnapshot {
            quantities,
            entries,
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<StockChange> {
        self.feed.subscribe()
    }
}

/// Map SQLx errors to `LedgerError`.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => LedgerError::Storage(format!(
            "database error in {}: {} (code {})",
            operation,
            db_err.message(),
            db_err.code().as_deref().unwrap_or("none")
        )),
        sqlx::Error::PoolClosed => {
            LedgerError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => LedgerError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// Check if an error is a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

#[derive(Debug)]
struct AuditEntryRow {
    entry_id: Uuid,
    product_id: Uuid,
    actor_id: Uuid,
    change_quantity: i64,
    reason: String,
    created_at: DateTime<Utc>,
}

impl AuditEntryRow {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(AuditEntryRow {
            entry_id: row.try_get("entry_id")?,
            product_id: row.try_get("product_id")?,
            actor_id: row.try_get("actor_id")?,
            change_quantity: row.try_get("change_quantity")?,
            reason: row.try_get("reason")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl From<AuditEntryRow> for AuditEntry {
    fn from(row: AuditEntryRow) -> Self {
        AuditEntry {
            entry_id: AuditEntryId::from_uuid(row.entry_id),
            product_id: ProductId::from_uuid(row.product_id),
            actor_id: ActorId::from_uuid(row.actor_id),
            change_quantity: row.change_quantity,
            reason: row.reason,
            created_at: row.created_at,
        }
    }
}
