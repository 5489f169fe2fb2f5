//! HTTP API: ledger service routes, storefront sale/adjustment routes, wiring.

pub mod app;
