//! Ledger persistence boundary.
//!
//! The engine talks to storage only through [`LedgerStore`] (scoped reads and
//! transaction start) and [`LedgerTransaction`] (row locks, staged writes,
//! commit/rollback). Two implementations ship here: an in-memory store for
//! tests/dev and a Postgres store.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{FailPoint, InMemoryLedgerStore, InMemoryTransaction};
pub use postgres::{PostgresLedgerStore, PostgresTransaction};
pub use r#trait::{LedgerStore, LedgerTransaction, StoreError};
