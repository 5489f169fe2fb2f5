//! Infrastructure layer: ledger stores, gateways, sale persistence, flows and config.

pub mod config;
pub mod gateway;
pub mod ledger;
pub mod outbox;
pub mod projections;
pub mod reconcile;
pub mod sale_records;
pub mod saga;
pub mod workers;

#[cfg(test)]
mod integration_tests;
