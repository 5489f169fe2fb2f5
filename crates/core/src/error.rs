//! Domain error model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::ProductId;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Business-level error taxonomy.
///
/// Every variant is an expected, deterministic outcome (a rejection), never an
/// infrastructure fault. Infrastructure concerns have their own error types in the
/// layers that own them. The enum is serde-tagged so a rejection can travel inside a
/// ledger response and be matched on the other side without parsing messages.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainError {
    /// Malformed input (bad identifier, non-positive quantity, empty request).
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// The product is unknown to the catalog or has no stock record.
    #[error("product not found: {product_id}")]
    NotFound { product_id: ProductId },

    /// A debit asked for more than the product holds.
    #[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: i64,
        available: i64,
    },

    /// An adjustment would drive the quantity below zero.
    #[error("stock cannot be negative for product {product_id}: current {current}, delta {delta}")]
    StockWouldGoNegative {
        product_id: ProductId,
        current: i64,
        delta: i64,
    },

    /// Uniqueness conflict (catalog side; never produced by the ledger).
    #[error("conflict: {message}")]
    Conflict { message: String },
}

impl DomainError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: msg.into(),
        }
    }

    pub fn not_found(product_id: ProductId) -> Self {
        Self::NotFound { product_id }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict {
            message: msg.into(),
        }
    }

    /// Product the rejection refers to, when there is one.
    pub fn product_id(&self) -> Option<ProductId> {
        match self {
            DomainError::NotFound { product_id }
            | DomainError::InsufficientStock { product_id, .. }
            | DomainError::StockWouldGoNegative { product_id, .. } => Some(*product_id),
            DomainError::InvalidInput { .. } | DomainError::Conflict { .. } => None,
        }
    }

    /// Stable machine-readable code (used in HTTP bodies and logs).
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::InvalidInput { .. } => "invalid_input",
            DomainError::NotFound { .. } => "not_found",
            DomainError::InsufficientStock { .. } => "insufficient_stock",
            DomainError::StockWouldGoNegative { .. } => "stock_would_go_negative",
            DomainError::Conflict { .. } => "conflict",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_round_trips_with_kind_tag() {
        let product_id = ProductId::new();
        let err = DomainError::InsufficientStock {
            product_id,
            requested: 3,
            available: 1,
        };

        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "insufficient_stock");

        let back: DomainError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn message_names_the_offending_product() {
        let product_id = ProductId::new();
        let err = DomainError::not_found(product_id);
        assert!(err.to_string().contains(&product_id.to_string()));
        assert_eq!(err.product_id(), Some(product_id));
    }
}
