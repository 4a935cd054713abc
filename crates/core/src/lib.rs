//! `stockledger-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the product,
//! movement and identity modules (no infrastructure concerns).

pub mod entity;
pub mod error;
pub mod id;
pub mod validation;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{MovementId, ProductId, UserId};
pub use validation::{FieldError, ValidationErrors};
