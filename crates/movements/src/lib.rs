//! Stock movement domain module.
//!
//! Incoming and outgoing movements share one shape and differ only in the sign
//! of their stock effect. This crate holds the movement lifecycle (record,
//! revise, cancel) and the delta math the reconciliation engine applies to
//! product stock. Pure domain logic: no IO, no storage.

pub mod delta;
pub mod movement;
pub mod quantity;

pub use delta::{cancellation_delta, creation_delta, update_delta};
pub use movement::{
    Movement, MovementChange, MovementKind, MovementRevision, MovementStatus, NewMovement,
};
pub use quantity::{Quantity, QuantityLimit};
