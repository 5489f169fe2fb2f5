use serde::{Deserialize, Serialize};

use retail_core::{DomainError, DomainResult, ProductId};

/// Authoritative stock row for one product.
///
/// Exists only once an adjustment has created it; `quantity` is never negative.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub product_id: ProductId,
    pub quantity: i64,
}

/// One requested stock movement: `quantity` units of `product_id`.
///
/// Used for debit batches (sales) and compensating credits. The quantity is a
/// magnitude and must be positive.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLine {
    pub product_id: ProductId,
    pub quantity: i64,
}

impl StockLine {
    pub fn new(product_id: ProductId, quantity: i64) -> Self {
        Self {
            product_id,
            quantity,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.quantity <= 0 {
            return Err(DomainError::invalid_input(format!(
                "quantity for product {} must be positive (got {})",
                self.product_id, self.quantity
            )));
        }
        Ok(())
    }
}

/// Quantity snapshot returned by stock reads.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub product_id: ProductId,
    pub quantity: i64,
}

impl From<StockRecord> for StockLevel {
    fn from(value: StockRecord) -> Self {
        Self {
            product_id: value.product_id,
            quantity: value.quantity,
        }
    }
}
