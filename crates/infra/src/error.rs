//! Ledger error taxonomy.

use thiserror::Error;

use stockledger_core::{DomainError, MovementId, ProductId, ValidationErrors};
use stockledger_movements::MovementKind;

use crate::store::StoreError;

/// Failure of a ledger operation.
///
/// Every variant is detected before commit; the transaction that raised it is
/// rolled back in full.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    ValidationFailed(ValidationErrors),

    #[error("product {0} not found")]
    ProductNotFound(ProductId),

    #[error("{kind} movement {id} not found")]
    MovementNotFound { kind: MovementKind, id: MovementId },

    #[error("stock cannot go negative (stock: {stock}, delta: {delta})")]
    InvalidStock { stock: u64, delta: i64 },

    #[error("movement is already cancelled")]
    AlreadyCancelled,

    #[error("persistence failure: {0}")]
    PersistenceFailure(#[from] StoreError),
}

impl LedgerError {
    /// Stable machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::ValidationFailed(_) => "validation_failed",
            LedgerError::ProductNotFound(_) => "product_not_found",
            LedgerError::MovementNotFound { .. } => "movement_not_found",
            LedgerError::InvalidStock { .. } => "invalid_stock",
            LedgerError::AlreadyCancelled => "already_cancelled",
            LedgerError::PersistenceFailure(_) => "persistence_failure",
        }
    }

    /// Whether the caller can fix the request (everything except storage failures).
    pub fn is_client_error(&self) -> bool {
        !matches!(self, LedgerError::PersistenceFailure(_))
    }

    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationFailed(ValidationErrors::single(field, message))
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(errors) => LedgerError::ValidationFailed(errors),
            DomainError::InvalidStock { stock, delta } => LedgerError::InvalidStock { stock, delta },
            DomainError::AlreadyCancelled => LedgerError::AlreadyCancelled,
            DomainError::InvalidId(msg) => LedgerError::field("id", msg),
        }
    }
}

impl From<ValidationErrors> for LedgerError {
    fn from(value: ValidationErrors) -> Self {
        LedgerError::ValidationFailed(value)
    }
}
