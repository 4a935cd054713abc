//! `stockledger-auth`: identities that act on the ledger.
//!
//! Authentication happens upstream. This crate only describes the user
//! records movements reference and validates identities being imported.

pub mod user;

pub use user::{NewUser, User};
