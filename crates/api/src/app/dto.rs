use serde::{Deserialize, Serialize};

use retail_core::{ActorId, AdjustmentId, AuditEntryId, Money, ProductId};
use retail_infra::saga::AdjustmentOutcome;
use retail_inventory::{AdjustmentKind, StockAdjustment};
use retail_products::CatalogEntry;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateAdjustmentRequest {
    pub product_id: ProductId,
    pub actor_id: ActorId,
    pub delta: i64,
    pub kind: AdjustmentKind,
    pub reason: String,
    /// Retrying with the same key never applies the adjustment twice.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl CreateAdjustmentRequest {
    pub fn into_parts(self) -> (StockAdjustment, Option<String>) {
        (
            StockAdjustment {
                product_id: self.product_id,
                actor_id: self.actor_id,
                delta: self.delta,
                kind: self.kind,
                reason: self.reason,
            },
            self.idempotency_key,
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct UpsertCatalogEntryRequest {
    pub name: String,
    /// Minor currency units.
    pub unit_price: u64,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct StockResponse {
    pub product_id: ProductId,
    pub quantity: i64,
}

#[derive(Debug, Serialize)]
pub struct AdjustmentResponse {
    pub adjustment_id: AdjustmentId,
    pub product_id: ProductId,
    pub new_quantity: i64,
    pub audit_entry_id: Option<AuditEntryId>,
    pub replayed: bool,
}

impl From<AdjustmentOutcome> for AdjustmentResponse {
    fn from(o: AdjustmentOutcome) -> Self {
        Self {
            adjustment_id: o.adjustment_id,
            product_id: o.product_id,
            new_quantity: o.new_quantity,
            audit_entry_id: o.audit_entry_id,
            replayed: o.replayed,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CatalogEntryResponse {
    pub product_id: ProductId,
    pub name: String,
    pub unit_price: Money,
}

impl From<CatalogEntry> for CatalogEntryResponse {
    fn from(e: CatalogEntry) -> Self {
        Self {
            product_id: e.product_id,
            name: e.name,
            unit_price: e.unit_price,
        }
    }
}
