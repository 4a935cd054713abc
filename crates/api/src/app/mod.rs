//! Service boundary wiring.
//!
//! - `services.rs`: store selection and the engine/catalog pair
//! - `commands.rs`: the JSON-lines request protocol
//! - `dto.rs`: request validation and response views
//! - `errors.rs`: error classification and payloads

use stockledger_infra::{LedgerConfig, StoreError};

pub mod commands;
pub mod dto;
pub mod errors;
pub mod services;

/// Build the command handler for the configured store (public entrypoint used by `main.rs`).
pub async fn build_app(config: &LedgerConfig) -> Result<commands::CommandHandler, StoreError> {
    let services = services::build_services(config).await?;
    Ok(commands::CommandHandler::new(services))
}
