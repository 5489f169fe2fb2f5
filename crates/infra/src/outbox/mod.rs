//! Durable "compensation owed" records.
//!
//! The sale saga writes an intent here *before* it tries to credit stock back, so a
//! crash or a failed credit leaves a trace the recovery sweep can re-drive. Every
//! credit carries an idempotency key derived from (sale, line index), which makes
//! re-driving safe: a line that was already credited is replayed, not applied again.
//!
//! ## Status lifecycle
//!
//! `Pending` → `Completed` when every line has been credited,
//! `Pending` → `Abandoned` after the sweep exhausts its attempts (operator alarm).

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use retail_core::{ActorId, CompensationId, SaleId};
use retail_inventory::StockLine;

pub use in_memory::InMemoryCompensationOutbox;
pub use postgres::PostgresCompensationOutbox;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Pending,
    Completed,
    Abandoned,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Pending => "pending",
            IntentStatus::Completed => "completed",
            IntentStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(IntentStatus::Pending),
            "completed" => Some(IntentStatus::Completed),
            "abandoned" => Some(IntentStatus::Abandoned),
            _ => None,
        }
    }
}

/// Stock owed back to the ledger for one sale whose local commit did not happen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationIntent {
    pub intent_id: CompensationId,
    pub sale_id: SaleId,
    pub actor_id: ActorId,
    /// The debited lines, in debit order (the index is part of each credit's key).
    pub lines: Vec<StockLine>,
    pub status: IntentStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CompensationIntent {
    pub fn pending(sale_id: SaleId, actor_id: ActorId, lines: Vec<StockLine>) -> Self {
        let now = Utc::now();
        Self {
            intent_id: CompensationId::new(),
            sale_id,
            actor_id,
            lines,
            status: IntentStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Idempotency key of the credit that undoes line `line_index` of `sale_id`.
pub fn compensation_key(sale_id: SaleId, line_index: usize) -> String {
    format!("compensate:{sale_id}:{line_index}")
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OutboxError {
    #[error("compensation intent not found: {0}")]
    NotFound(CompensationId),

    #[error("compensation intent already exists: {0}")]
    AlreadyExists(CompensationId),

    #[error("outbox storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait CompensationOutbox: Send + Sync {
    async fn record(&self, intent: CompensationIntent) -> Result<(), OutboxError>;

    async fn get(&self, intent_id: CompensationId) -> Result<Option<CompensationIntent>, OutboxError>;

    /// Pending intents, oldest first.
    async fn pending(&self, limit: usize) -> Result<Vec<CompensationIntent>, OutboxError>;

    async fn mark_completed(&self, intent_id: CompensationId) -> Result<(), OutboxError>;

    /// Count a failed attempt; returns the new attempt count.
    async fn mark_failed(&self, intent_id: CompensationId, error: String) -> Result<u32, OutboxError>;

    async fn mark_abandoned(&self, intent_id: CompensationId, error: String) -> Result<(), OutboxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_stable_per_sale_and_line() {
        let sale_id = SaleId::new();
        assert_eq!(compensation_key(sale_id, 0), compensation_key(sale_id, 0));
        assert_ne!(compensation_key(sale_id, 0), compensation_key(sale_id, 1));
        assert_eq!(compensation_key(sale_id, 2), format!("compensate:{sale_id}:2"));
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [IntentStatus::Pending, IntentStatus::Completed, IntentStatus::Abandoned] {
            assert_eq!(IntentStatus::parse(status.as_str()), Some(status));
        }
    }
}
