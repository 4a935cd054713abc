//! Infrastructure layer: ledger stores, reconciliation engine, catalog, config.

pub mod catalog;
pub mod config;
pub mod error;
pub mod reconciliation;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use catalog::ProductCatalog;
pub use config::{ConfigError, LedgerConfig, StoreBackend};
pub use error::LedgerError;
pub use reconciliation::{MovementRecord, ProductRemoval, ReconciliationEngine};
pub use store::{
    FailPoint, InMemoryLedgerStore, LedgerStore, LedgerTransaction, PostgresLedgerStore, StoreError,
};
