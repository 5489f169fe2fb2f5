//! Read models derived from the ledger.
//!
//! Projections are disposable: dropping one loses nothing, it is rebuilt from ledger
//! reads and the change feed.

pub mod stock_mirror;

pub use stock_mirror::StockMirror;
