//! Products domain module.
//!
//! This crate contains the product record and its business rules (naming,
//! stock arithmetic, archival), implemented purely as deterministic domain
//! logic (no IO, no storage).

pub mod product;

pub use product::{MAX_STOCK, NewProduct, Product, ProductPatch, ProductScope, apply_stock_delta};
