use serde::Serialize;
use tracing::error;

use stockledger_core::{FieldError, ValidationErrors};
use stockledger_infra::LedgerError;

pub const BAD_REQUEST: u16 = 400;
pub const NOT_FOUND: u16 = 404;
pub const CONFLICT: u16 = 409;
pub const UNPROCESSABLE_ENTITY: u16 = 422;
pub const INTERNAL_SERVER_ERROR: u16 = 500;

/// Error payload: stable kind, human message, field errors for validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
}

/// A failed request, classified with an HTTP-style status code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: u16,
    pub body: ErrorBody,
}

impl ApiError {
    pub fn is_client_error(&self) -> bool {
        self.status < INTERNAL_SERVER_ERROR
    }
}

pub fn json_error(status: u16, code: &'static str, message: impl Into<String>) -> ApiError {
    ApiError {
        status,
        body: ErrorBody {
            error: code,
            message: message.into(),
            fields: Vec::new(),
        },
    }
}

pub fn validation_error(errors: ValidationErrors) -> ApiError {
    ApiError {
        status: BAD_REQUEST,
        body: ErrorBody {
            error: "validation_failed",
            message: errors.to_string(),
            fields: errors.into_iter().collect(),
        },
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(value: ValidationErrors) -> Self {
        validation_error(value)
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::ValidationFailed(errors) => validation_error(errors),
            LedgerError::ProductNotFound(_) | LedgerError::MovementNotFound { .. } => {
                json_error(NOT_FOUND, err.kind(), err.to_string())
            }
            LedgerError::InvalidStock { .. } => json_error(UNPROCESSABLE_ENTITY, err.kind(), err.to_string()),
            LedgerError::AlreadyCancelled => json_error(CONFLICT, err.kind(), err.to_string()),
            LedgerError::PersistenceFailure(ref source) => {
                // Storage details stay in the logs.
                error!(error = %source, "persistence failure");
                json_error(INTERNAL_SERVER_ERROR, err.kind(), "internal persistence failure")
            }
        }
    }
}
