//! Administrative stock adjustments (restock, write-off, correction).

use serde::{Deserialize, Serialize};

use retail_core::{ActorId, AdjustmentId, DomainError, DomainResult, ProductId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    /// Goods received: delta must be positive.
    Restock,
    /// Damaged, lost or expired goods: delta must be negative.
    WriteOff,
    /// Stock-take correction: any delta.
    Correction,
}

impl AdjustmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentKind::Restock => "restock",
            AdjustmentKind::WriteOff => "write_off",
            AdjustmentKind::Correction => "correction",
        }
    }

    fn accepts(&self, delta: i64) -> bool {
        match self {
            AdjustmentKind::Restock => delta > 0,
            AdjustmentKind::WriteOff => delta < 0,
            AdjustmentKind::Correction => true,
        }
    }
}

/// A requested adjustment before it reaches the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustment {
    pub product_id: ProductId,
    pub actor_id: ActorId,
    pub delta: i64,
    pub kind: AdjustmentKind,
    pub reason: String,
}

impl StockAdjustment {
    pub fn validate(&self) -> DomainResult<()> {
        if self.reason.trim().is_empty() {
            return Err(DomainError::invalid_input("adjustment reason is required"));
        }
        if !self.kind.accepts(self.delta) {
            return Err(DomainError::invalid_input(format!(
                "delta {} is not valid for a {} adjustment",
                self.delta,
                self.kind.as_str()
            )));
        }
        Ok(())
    }

    /// Audit reason: kind, free text, and the adjustment id for traceability.
    pub fn audit_reason(&self, adjustment_id: AdjustmentId) -> String {
        format!(
            "{}: {} (adjustment {adjustment_id})",
            self.kind.as_str(),
            self.reason.trim()
        )
    }
}
