//! Audit-versus-quantity reconciliation.
//!
//! For every product, the sum of its audit `change_quantity` since creation must equal
//! the current ledger quantity. Used by tests after concurrent runs and exposed for
//! operational checks.

use std::collections::BTreeMap;

use tracing::{info, warn};

use retail_core::ProductId;
use retail_inventory::{Discrepancy, reconcile};

use crate::ledger::{LedgerError, StockLedger};

/// Reconcile the whole ledger from one consistent snapshot.
pub async fn reconcile_ledger(ledger: &dyn StockLedger) -> Result<Vec<Discrepancy>, LedgerError> {
    let snapshot = ledger.snapshot().await?;
    let discrepancies = reconcile(&snapshot.quantities, &snapshot.entries);

    if discrepancies.is_empty() {
        info!(products = snapshot.quantities.len(), "ledger reconciles");
    } else {
        warn!(count = discrepancies.len(), "ledger does not reconcile");
    }
    Ok(discrepancies)
}

/// Reconcile one product from its quantity and audit trail.
///
/// The two reads are not atomic, so a concurrent writer can produce a transient
/// mismatch; use [`reconcile_ledger`] when writers may be active.
pub async fn reconcile_product(
    ledger: &dyn StockLedger,
    product_id: ProductId,
) -> Result<Option<Discrepancy>, LedgerError> {
    let trail = ledger.audit_trail(product_id).await?;
    let mut quantities = BTreeMap::new();
    if let Some(quantity) = ledger.get_stock(product_id).await? {
        quantities.insert(product_id, quantity);
    }
    Ok(reconcile(&quantities, &trail).into_iter().next())
}
