use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use retail_core::{ActorId, CompensationId, SaleId};
use retail_inventory::StockLine;

use super::{CompensationIntent, CompensationOutbox, IntentStatus, OutboxError};
use crate::ledger::postgres::is_unique_violation;

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS compensation_intents (
    intent_id   UUID PRIMARY KEY,
    sale_id     UUID NOT NULL,
    actor_id    UUID NOT NULL,
    lines       JSONB NOT NULL,
    status      TEXT NOT NULL CHECK (status IN ('pending', 'completed', 'abandoned')),
    attempts    INTEGER NOT NULL DEFAULT 0,
    last_error  TEXT,
    created_at  TIMESTAMPTZ NOT NULL,
    updated_at  TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS compensation_intents_pending_idx
    ON compensation_intents (created_at)
    WHERE status = 'pending';
"#;

#[derive(Debug, Clone)]
pub struct PostgresCompensationOutbox {
    pool: Arc<PgPool>,
}

impl PostgresCompensationOutbox {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn migrate(&self) -> Result<(), OutboxError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn set_status(
        &self,
        intent_id: CompensationId,
        status: IntentStatus,
        error: Option<String>,
    ) -> Result<(), OutboxError> {
        let result = sqlx::query(
            r#"
            UPDATE compensation_intents
            SET status = $2, last_error = $3, updated_at = now()
            WHERE intent_id = $1
            "#,
        )
        .bind(intent_id.as_uuid())
        .bind(status.as_str())
        .bind(error)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_status", e))?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::NotFound(intent_id));
        }
        Ok(())
    }
}

const SELECT_INTENT: &str = r#"
    SELECT intent_id, sale_id, actor_id, lines, status, attempts, last_error, created_at, updated_at
    FROM compensation_intents
"#;

#[async_trait]
impl CompensationOutbox for PostgresCompensationOutbox {
    async fn record(&self, intent: CompensationIntent) -> Result<(), OutboxError> {
        let lines = serde_json::to_value(&intent.lines)
            .map_err(|e| OutboxError::Storage(format!("lines serialization failed: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO compensation_intents (
                intent_id,
                sale_id,
                actor_id,
                lines,
                status,
                attempts,
                last_error,
                created_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(intent.intent_id.as_uuid())
        .bind(intent.sale_id.as_uuid())
        .bind(intent.actor_id.as_uuid())
        .bind(lines)
        .bind(intent.status.as_str())
        .bind(intent.attempts as i32)
        .bind(&intent.last_error)
        .bind(intent.created_at)
        .bind(intent.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                OutboxError::AlreadyExists(intent.intent_id)
            } else {
                map_sqlx_error("record", e)
            }
        })?;
        Ok(())
    }

    async fn get(&self, intent_id: CompensationId) -> Result<Option<CompensationIntent>, OutboxError> {
        let row = sqlx::query(&format!("{SELECT_INTENT} WHERE intent_id = $1"))
            .bind(intent_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;
        row.as_ref().map(intent_from_row).transpose()
    }

    async fn pending(&self, limit: usize) -> Result<Vec<CompensationIntent>, OutboxError> {
        let rows = sqlx::query(&format!(
            "{SELECT_INTENT} WHERE status = 'pending' ORDER BY created_at ASC LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("pending", e))?;
        rows.iter().map(intent_from_row).collect()
    }

    async fn mark_completed(&self, intent_id: CompensationId) -> Result<(), OutboxError> {
        self.set_status(intent_id, IntentStatus::Completed, None).await
    }

    async fn mark_failed(&self, intent_id: CompensationId, error: String) -> Result<u32, OutboxError> {
        let attempts: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE compensation_intents
            SET attempts = attempts + 1, last_error = $2, updated_at = now()
            WHERE intent_id = $1
            RETURNING attempts
            "#,
        )
        .bind(intent_id.as_uuid())
        .bind(error)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_failed", e))?;

        attempts
            .map(|a| a.max(0) as u32)
            .ok_or(OutboxError::NotFound(intent_id))
    }

    async fn mark_abandoned(&self, intent_id: CompensationId, error: String) -> Result<(), OutboxError> {
        self.set_status(intent_id, IntentStatus::Abandoned, Some(error)).await
    }
}

fn intent_from_row(row: &sqlx::postgres::PgRow) -> Result<CompensationIntent, OutboxError> {
    let read = |e: sqlx::Error| map_sqlx_error("decode_intent", e);

    let intent_id: Uuid = row.try_get("intent_id").map_err(read)?;
    let sale_id: Uuid = row.try_get("sale_id").map_err(read)?;
    let actor_id: Uuid = row.try_get("actor_id").map_err(read)?;
    let lines: serde_json::Value = row.try_get("lines").map_err(read)?;
    let status: String = row.try_get("status").map_err(read)?;
    let attempts: i32 = row.try_get("attempts").map_err(read)?;
    let last_error: Option<String> = row.try_get("last_error").map_err(read)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(read)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(read)?;

    let lines: Vec<StockLine> = serde_json::from_value(lines)
        .map_err(|e| OutboxError::Storage(format!("invalid lines payload: {e}")))?;
    let status = IntentStatus::parse(&status)
        .ok_or_else(|| OutboxError::Storage(format!("unknown intent status '{status}'")))?;

    Ok(CompensationIntent {
        intent_id: CompensationId::from_uuid(intent_id),
        sale_id: SaleId::from_uuid(sale_id),
        actor_id: ActorId::from_uuid(actor_id),
        lines,
        status,
        attempts: attempts.max(0) as u32,
        last_error,
        created_at,
        updated_at,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> OutboxError {
    match err {
        sqlx::Error::Database(db_err) => {
            OutboxError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            OutboxError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => OutboxError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
