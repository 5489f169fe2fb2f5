//! Request/response contracts of the ledger's remote operations.
//!
//! These are transport-agnostic: the in-process gateway passes them directly, the
//! HTTP transport serializes them as JSON. A business rejection is a *successful*
//! response with `success = false`, a human-readable `message`, and the tagged
//! `rejection` so callers can match on it instead of parsing text.

use serde::{Deserialize, Serialize};

use retail_core::{ActorId, AuditEntryId, CorrelationId, DomainError, DomainResult, ProductId};

use crate::stock::{StockLevel, StockLine};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetStockResponse {
    pub product_id: ProductId,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchGetStockRequest {
    pub product_ids: Vec<ProductId>,
}

/// Absent product IDs are simply omitted from `items`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchGetStockResponse {
    pub items: Vec<StockLevel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecreaseStockRequest {
    pub items: Vec<StockLine>,
    pub actor_id: ActorId,
    pub correlation_id: CorrelationId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecreaseStockResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<DomainError>,
}

impl DecreaseStockResponse {
    pub fn decreased() -> Self {
        Self {
            success: true,
            message: "stock decreased".to_string(),
            rejection: None,
        }
    }

    pub fn rejected(rejection: DomainError) -> Self {
        Self {
            success: false,
            message: rejection.to_string(),
            rejection: Some(rejection),
        }
    }

    /// Collapse into a domain result; a rejection without a tag becomes `InvalidInput`.
    pub fn into_result(self) -> DomainResult<()> {
        if self.success {
            return Ok(());
        }
        Err(self
            .rejection
            .unwrap_or(DomainError::InvalidInput {
                message: self.message,
            }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStockRequest {
    pub product_id: ProductId,
    pub actor_id: ActorId,
    pub delta: i64,
    pub reason: String,
    /// When set, a repeated request with the same key returns the first outcome
    /// instead of applying the delta again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStockResponse {
    pub success: bool,
    pub new_quantity: i64,
    pub audit_entry_id: Option<AuditEntryId>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<DomainError>,
    /// True when the response was answered from an earlier request with the same
    /// idempotency key.
    #[serde(default)]
    pub replayed: bool,
}

/// Accepted adjustment.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Adjusted {
    pub new_quantity: i64,
    pub audit_entry_id: Option<AuditEntryId>,
    pub replayed: bool,
}

impl AdjustStockResponse {
    pub fn adjusted(new_quantity: i64, audit_entry_id: AuditEntryId) -> Self {
        Self {
            success: true,
            new_quantity,
            audit_entry_id: Some(audit_entry_id),
            message: "success".to_string(),
            rejection: None,
            replayed: false,
        }
    }

    pub fn rejected(rejection: DomainError) -> Self {
        Self {
            success: false,
            new_quantity: 0,
            audit_entry_id: None,
            message: rejection.to_string(),
            rejection: Some(rejection),
            replayed: false,
        }
    }

    pub fn into_result(self) -> DomainResult<Adjusted> {
        if self.success {
            return Ok(Adjusted {
                new_quantity: self.new_quantity,
                audit_entry_id: self.audit_entry_id,
                replayed: self.replayed,
            });
        }
        Err(self
            .rejection
            .unwrap_or(DomainError::InvalidInput {
                message: self.message,
            }))
    }
}
