//! Stock ledger domain module.
//!
//! This crate contains the business rules of the per-product stock ledger,
//! implemented as deterministic domain logic (no IO, no HTTP, no storage):
//! the stock and audit data model, debit/adjustment planning, the reconciliation
//! fold, and the request/response contracts of the ledger's remote operations.

pub mod adjustment;
pub mod audit;
pub mod contract;
pub mod plan;
pub mod stock;

pub use adjustment::{AdjustmentKind, StockAdjustment};
pub use audit::{AuditEntry, Discrepancy, compensation_reason, fold_audit, reconcile, sale_reason};
pub use contract::{
    AdjustStockRequest, AdjustStockResponse, Adjusted, BatchGetStockRequest, BatchGetStockResponse,
    DecreaseStockRequest, DecreaseStockResponse, GetStockResponse,
};
pub use plan::{AdjustPlan, DebitPlan, plan_adjust, plan_debit};
pub use stock::{StockLevel, StockLine, StockRecord};
