//! Service wiring: one engine + catalog pair over the configured store.

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{error, info};

use stockledger_infra::{
    InMemoryLedgerStore, LedgerConfig, LedgerStore, PostgresLedgerStore, ProductCatalog, ReconciliationEngine,
    StoreBackend, StoreError,
};
use stockledger_movements::QuantityLimit;

use crate::app::commands::Request;
use crate::app::dto::{self, MovementView, ProductRemovalView, ProductView, UserView};
use crate::app::errors::{json_error, ApiError, INTERNAL_SERVER_ERROR};

/// Engine and catalog sharing one store.
#[derive(Debug, Clone)]
pub struct LedgerServices<S> {
    pub engine: ReconciliationEngine<S>,
    pub catalog: ProductCatalog<S>,
}

impl<S> LedgerServices<S>
where
    S: LedgerStore + Clone,
{
    pub fn new(store: S, limit: QuantityLimit) -> Self {
        Self {
            engine: ReconciliationEngine::with_limit(store.clone(), limit),
            catalog: ProductCatalog::new(store),
        }
    }

    fn limit(&self) -> QuantityLimit {
        self.engine.limit()
    }

    /// Validate, run and shape one request.
    pub async fn execute(&self, request: Request) -> Result<JsonValue, ApiError> {
        let data = match request {
            Request::CreateProduct(body) => {
                let input = body.validate()?;
                to_json(ProductView::from(self.catalog.create_product(input).await?))?
            }
            Request::GetProduct { id } => {
                let id = dto::parse_product_id(&id)?;
                to_json(ProductView::from(self.catalog.get_product(id).await?))?
            }
            Request::ListProducts => {
                let products = self.catalog.list_products().await?;
                to_json(products.into_iter().map(ProductView::from).collect::<Vec<_>>())?
            }
            Request::UpdateProduct { id, body } => {
                let id = dto::parse_product_id(&id)?;
                let patch = body.validate()?;
                to_json(ProductView::from(self.catalog.update_product(id, patch).await?))?
            }
            Request::DeleteProduct { id } => {
                let id = dto::parse_product_id(&id)?;
                to_json(ProductRemovalView::from(self.engine.delete_product(id).await?))?
            }
            Request::ImportUser(body) => {
                let input = body.validate()?;
                to_json(UserView::from(self.catalog.import_user(input).await?))?
            }
            Request::CreateMovement { kind, body } => {
                let kind = dto::parse_kind(&kind)?;
                let intent = body.validate(self.limit())?;
                to_json(MovementView::from(self.engine.create_movement(kind, intent).await?))?
            }
            Request::UpdateMovement { kind, id, body } => {
                let kind = dto::parse_kind(&kind)?;
                let id = dto::parse_movement_id(&id)?;
                let revision = body.validate(self.limit())?;
                to_json(MovementView::from(self.engine.update_movement(kind, id, revision).await?))?
            }
            Request::CancelMovement { kind, id } => {
                let kind = dto::parse_kind(&kind)?;
                let id = dto::parse_movement_id(&id)?;
                to_json(MovementView::from(self.engine.cancel_movement(kind, id).await?))?
            }
            Request::GetMovement { kind, id } => {
                let kind = dto::parse_kind(&kind)?;
                let id = dto::parse_movement_id(&id)?;
                to_json(MovementView::from(self.engine.get_movement(kind, id).await?))?
            }
            Request::ListMovements { kind, id } => {
                let kind = dto::parse_kind(&kind)?;
                let id = id.as_deref().map(dto::parse_movement_id).transpose()?;
                let records = self.engine.list_movements(kind, id).await?;
                to_json(records.into_iter().map(MovementView::from).collect::<Vec<_>>())?
            }
        };
        Ok(data)
    }
}

fn to_json<T: Serialize>(value: T) -> Result<JsonValue, ApiError> {
    serde_json::to_value(value).map_err(|err| {
        error!(error = %err, "response serialization failed");
        json_error(INTERNAL_SERVER_ERROR, "serialization_failure", "failed to encode response")
    })
}

/// Services over whichever store the configuration selects.
#[derive(Debug, Clone)]
pub enum AppServices {
    InMemory(LedgerServices<InMemoryLedgerStore>),
    Postgres(LedgerServices<PostgresLedgerStore>),
}

impl AppServices {
    pub fn in_memory(limit: QuantityLimit) -> Self {
        AppServices::InMemory(LedgerServices::new(InMemoryLedgerStore::new(), limit))
    }

    pub async fn execute(&self, request: Request) -> Result<JsonValue, ApiError> {
        match self {
            AppServices::InMemory(services) => services.execute(request).await,
            AppServices::Postgres(services) => services.execute(request).await,
        }
    }
}

pub async fn build_services(config: &LedgerConfig) -> Result<AppServices, StoreError> {
    match &config.store {
        StoreBackend::InMemory => {
            info!("using in-memory ledger store");
            Ok(AppServices::in_memory(config.max_movement_qty))
        }
        StoreBackend::Postgres {
            database_url,
            max_connections,
        } => {
            let store = PostgresLedgerStore::connect(database_url, *max_connections).await?;
            store.ensure_schema().await?;
            info!(max_connections = *max_connections, "using postgres ledger store");
            Ok(AppServices::Postgres(LedgerServices::new(store, config.max_movement_qty)))
        }
    }
}
