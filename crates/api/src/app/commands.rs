//! Line-delimited JSON command protocol.
//!
//! Each input line is one request object tagged by `op`:
//!
//! ```json
//! {"op":"create_movement","kind":"incoming","product_id":"...","user_id":"...","qty":10,"incoming_at":"2024-05-01"}
//! ```
//!
//! Each response is one line: `{"ok":true,"data":...}` or
//! `{"ok":false,"status":422,"error":{"error":"invalid_stock","message":"..."}}`.

use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, warn};

use crate::app::dto::{
    CreateMovementRequest, CreateProductRequest, ImportUserRequest, UpdateMovementRequest, UpdateProductRequest,
};
use crate::app::errors::{json_error, ApiError, BAD_REQUEST};
use crate::app::services::AppServices;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CreateProduct(CreateProductRequest),
    GetProduct {
        id: String,
    },
    ListProducts,
    UpdateProduct {
        id: String,
        #[serde(flatten)]
        body: UpdateProductRequest,
    },
    DeleteProduct {
        id: String,
    },
    ImportUser(ImportUserRequest),
    CreateMovement {
        kind: String,
        #[serde(flatten)]
        body: CreateMovementRequest,
    },
    UpdateMovement {
        kind: String,
        id: String,
        #[serde(flatten)]
        body: UpdateMovementRequest,
    },
    CancelMovement {
        kind: String,
        id: String,
    },
    GetMovement {
        kind: String,
        id: String,
    },
    ListMovements {
        kind: String,
        #[serde(default)]
        id: Option<String>,
    },
}

impl Request {
    pub fn op(&self) -> &'static str {
        match self {
            Request::CreateProduct(_) => "create_product",
            Request::GetProduct { .. } => "get_product",
            Request::ListProducts => "list_products",
            Request::UpdateProduct { .. } => "update_product",
            Request::DeleteProduct { .. } => "delete_product",
            Request::ImportUser(_) => "import_user",
            Request::CreateMovement { .. } => "create_movement",
            Request::UpdateMovement { .. } => "update_movement",
            Request::CancelMovement { .. } => "cancel_movement",
            Request::GetMovement { .. } => "get_movement",
            Request::ListMovements { .. } => "list_movements",
        }
    }
}

/// Turns request lines into response values.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    services: AppServices,
}

impl CommandHandler {
    pub fn new(services: AppServices) -> Self {
        Self { services }
    }

    pub async fn handle_line(&self, line: &str) -> JsonValue {
        let request = match serde_json::from_str::<Request>(line) {
            Ok(request) => request,
            Err(err) => {
                debug!(error = %err, "malformed request line");
                return failure(json_error(BAD_REQUEST, "invalid_request", err.to_string()));
            }
        };

        let op = request.op();
        match self.services.execute(request).await {
            Ok(data) => json!({ "ok": true, "data": data }),
            Err(err) => {
                if err.is_client_error() {
                    warn!(op, status = err.status, error = err.body.error, "request rejected");
                }
                failure(err)
            }
        }
    }
}

fn failure(err: ApiError) -> JsonValue {
    json!({ "ok": false, "status": err.status, "error": err.body })
}
