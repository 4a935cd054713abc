//! Ledger service boundary: request validation, response shaping, error
//! mapping and the JSON-lines command handler.

pub mod app;
