//! Sales domain module.
//!
//! Pure sale bookkeeping: request validation, price snapshotting, totals, and the
//! persisted sale record shape. No IO; the saga in `retail-infra` drives it.

pub mod sale;

pub use sale::{PricedLine, ReceiptLine, SaleDraft, SaleLine, SaleLineRequest, SaleReceipt, SaleRecord, SaleRequest};
