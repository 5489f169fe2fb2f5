//! Append-only audit trail of ledger changes, plus the reconciliation fold.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use retail_core::{ActorId, AuditEntryId, CorrelationId, ProductId, SaleId};

/// One immutable ledger change for one product line.
///
/// Entries are facts: once written they are never updated or deleted. Their
/// `change_quantity` summed per product equals the product's current quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: AuditEntryId,
    pub product_id: ProductId,
    pub actor_id: ActorId,
    pub change_quantity: i64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn record(
        product_id: ProductId,
        actor_id: ActorId,
        change_quantity: i64,
        reason: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entry_id: AuditEntryId::new(),
            product_id,
            actor_id,
            change_quantity,
            reason: reason.into(),
            created_at,
        }
    }
}

/// Audit reason for a sale debit.
pub fn sale_reason(correlation_id: CorrelationId) -> String {
    format!("sale {correlation_id}")
}

/// Audit reason for a compensating credit that undoes a sale debit.
pub fn compensation_reason(sale_id: SaleId) -> String {
    format!("compensating rollback for {sale_id}")
}

/// Sum of `change_quantity` per product.
pub fn fold_audit<'a>(entries: impl IntoIterator<Item = &'a AuditEntry>) -> BTreeMap<ProductId, i64> {
    let mut sums = BTreeMap::new();
    for entry in entries {
        *sums.entry(entry.product_id).or_insert(0) += entry.change_quantity;
    }
    sums
}

/// A product whose ledger quantity disagrees with its audit history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub product_id: ProductId,
    /// `None` when the audit log mentions a product that has no stock record.
    pub ledger_quantity: Option<i64>,
    pub audit_sum: i64,
}

/// Compare current quantities with the folded audit log.
///
/// Returns every product (present on either side) whose numbers do not agree.
/// An empty result means the ledger reconciles.
pub fn reconcile(quantities: &BTreeMap<ProductId, i64>, entries: &[AuditEntry]) -> Vec<Discrepancy> {
    let sums = fold_audit(entries);
    let products: BTreeSet<ProductId> = quantities.keys().chain(sums.keys()).copied().collect();

    products
        .into_iter()
        .filter_map(|product_id| {
            let ledger_quantity = quantities.get(&product_id).copied();
            let audit_sum = sums.get(&product_id).copied().unwrap_or(0);
            if ledger_quantity == Some(audit_sum) {
                None
            } else {
                Some(Discrepancy {
                    product_id,
                    ledger_quantity,
                    audit_sum,
                })
            }
        })
        .collect()
}
