use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use retail_core::{ActorId, Money, ProductId, SaleId, SaleLineId};
use retail_sales::{SaleLine, SaleRecord};

use super::{SaleRecordStore, SaleStoreError, SaleTransaction};
use crate::ledger::postgres::is_unique_violation;

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sales (
    sale_id     UUID PRIMARY KEY,
    actor_id    UUID NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS sale_lines (
    line_id             UUID PRIMARY KEY,
    sale_id             UUID NOT NULL REFERENCES sales (sale_id),
    line_no             INTEGER NOT NULL,
    product_id          UUID NOT NULL,
    product_name        TEXT NOT NULL,
    quantity            BIGINT NOT NULL CHECK (quantity > 0),
    unit_price_at_sale  BIGINT NOT NULL CHECK (unit_price_at_sale >= 0),
    UNIQUE (sale_id, line_no)
);

CREATE INDEX IF NOT EXISTS sales_actor_created_idx ON sales (actor_id, created_at DESC);
"#;

#[derive(Debug, Clone)]
pub struct PostgresSaleRecordStore {
    pool: Arc<PgPool>,
}

impl PostgresSaleRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn migrate(&self) -> Result<(), SaleStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

#[async_trait]
impl SaleRecordStore for PostgresSaleRecordStore {
    async fn begin(&self) -> Result<Box<dyn SaleTransaction>, SaleStoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PgSaleTransaction { tx }))
    }

    #[instrument(skip(self), fields(sale_id = %sale_id), err)]
    async fn find(&self, sale_id: SaleId) -> Result<Option<SaleRecord>, SaleStoreError> {
        let header = sqlx::query("SELECT sale_id, actor_id, created_at FROM sales WHERE sale_id = $1")
            .bind(sale_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_sale", e))?;

        let Some(header) = header else {
            return Ok(None);
        };
        let mut records = self.with_lines(vec![header]).await?;
        Ok(records.pop())
    }

    #[instrument(skip(self), err)]
    async fn list(&self, actor: Option<ActorId>) -> Result<Vec<SaleRecord>, SaleStoreError> {
        let headers = sqlx::query(
            r#"
            SELECT sale_id, actor_id, created_at
            FROM sales
            WHERE $1::uuid IS NULL OR actor_id = $1
            ORDER BY created_at DESC, sale_id DESC
            "#,
        )
        .bind(actor.map(|a| *a.as_uuid()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_sales", e))?;

        self.with_lines(headers).await
    }
}

impl PostgresSaleRecordStore {
    /// Attach the lines of every header row, keeping header order.
    async fn with_lines(
        &self,
        headers: Vec<sqlx::postgres::PgRow>,
    ) -> Result<Vec<SaleRecord>, SaleStoreError> {
        let mut records = Vec::with_capacity(headers.len());
        for row in &headers {
            let record = (|| -> Result<SaleRecord, sqlx::Error> {
                let sale_id: Uuid = row.try_get("sale_id")?;
                let actor_id: Uuid = row.try_get("actor_id")?;
                let created_at: DateTime<Utc> = row.try_get("created_at")?;
                Ok(SaleRecord {
                    sale_id: SaleId::from_uuid(sale_id),
                    actor_id: ActorId::from_uuid(actor_id),
                    created_at,
                    lines: Vec::new(),
                })
            })()
            .map_err(|e| map_sqlx_error("read_sale", e))?;
            records.push(record);
        }
        if records.is_empty() {
            return Ok(records);
        }

        let ids: Vec<Uuid> = records.iter().map(|r| *r.sale_id.as_uuid()).collect();
        let rows = sqlx::query(
            r#"
            SELECT line_id, sale_id, product_id, product_name, quantity, unit_price_at_sale
            FROM sale_lines
            WHERE sale_id = ANY($1)
            ORDER BY sale_id, line_no ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("read_sale_lines", e))?;

        let mut lines: HashMap<SaleId, Vec<SaleLine>> = HashMap::new();
        for row in &rows {
            let line = (|| -> Result<SaleLine, sqlx::Error> {
                let price: i64 = row.try_get("unit_price_at_sale")?;
                Ok(SaleLine {
                    line_id: SaleLineId::from_uuid(row.try_get("line_id")?),
                    sale_id: SaleId::from_uuid(row.try_get("sale_id")?),
                    product_id: ProductId::from_uuid(row.try_get("product_id")?),
                    product_name: row.try_get("product_name")?,
                    quantity: row.try_get("quantity")?,
                    unit_price_at_sale: Money::from_minor(price.max(0) as u64),
                })
            })()
            .map_err(|e| map_sqlx_error("read_sale_lines", e))?;
            lines.entry(line.sale_id).or_default().push(line);
        }

        for record in &mut records {
            record.lines = lines.remove(&record.sale_id).unwrap_or_default();
        }
        Ok(records)
    }
}

struct PgSaleTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl SaleTransaction for PgSaleTransaction {
    async fn insert_sale(&mut self, record: &SaleRecord) -> Result<(), SaleStoreError> {
        sqlx::query("INSERT INTO sales (sale_id, actor_id, created_at) VALUES ($1, $2, $3)")
            .bind(record.sale_id.as_uuid())
            .bind(record.actor_id.as_uuid())
            .bind(record.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    SaleStoreError::Duplicate(record.sale_id)
                } else {
                    map_sqlx_error("insert_sale", e)
                }
            })?;

        for (line_no, line) in record.lines.iter().enumerate() {
            let price = i64::try_from(line.unit_price_at_sale.minor_units()).map_err(|_| {
                SaleStoreError::Storage(format!("unit price out of range on line {line_no}"))
            })?;
            sqlx::query(
                r#"
                INSERT INTO sale_lines (
                    line_id,
                    sale_id,
                    line_no,
                    product_id,
                    product_name,
                    quantity,
                    unit_price_at_sale
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(line.line_id.as_uuid())
            .bind(record.sale_id.as_uuid())
            .bind(line_no as i32)
            .bind(line.product_id.as_uuid())
            .bind(&line.product_name)
            .bind(line.quantity)
            .bind(price)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_sale_line", e))?;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), SaleStoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), SaleStoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> SaleStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            SaleStoreError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            SaleStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => SaleStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
