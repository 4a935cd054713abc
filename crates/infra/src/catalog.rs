//! Product catalog and identity import.
//!
//! Product creation, lookups and explicit name/stock corrections, plus the
//! import of upstream-managed users that movements reference. Product removal
//! lives on the reconciliation engine because it depends on movement history.

use chrono::Utc;
use tracing::{info, instrument, warn};

use stockledger_auth::{NewUser, User};
use stockledger_core::{ProductId, UserId};
use stockledger_products::{NewProduct, Product, ProductPatch, ProductScope};

use crate::error::LedgerError;
use crate::reconciliation::finish;
use crate::store::{LedgerStore, LedgerTransaction, StoreError};

#[derive(Debug, Clone)]
pub struct ProductCatalog<S> {
    store: S,
}

impl<S> ProductCatalog<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S> ProductCatalog<S>
where
    S: LedgerStore,
{
    #[instrument(skip(self, input), fields(name = %input.name, stock = input.stock))]
    pub async fn create_product(&self, input: NewProduct) -> Result<Product, LedgerError> {
        let product = Product::create(ProductId::new(), input, Utc::now())?;

        let mut tx = self.store.begin().await?;
        let outcome = tx.insert_product(&product).await.map_err(LedgerError::from);
        finish(tx, outcome).await?;

        info!(product_id = %product.id, "product created");
        Ok(product)
    }

    /// An active product.
    pub async fn get_product(&self, id: ProductId) -> Result<Product, LedgerError> {
        self.store
            .find_product(id, ProductScope::Active)
            .await?
            .ok_or(LedgerError::ProductNotFound(id))
    }

    /// All active products, oldest first.
    pub async fn list_products(&self) -> Result<Vec<Product>, LedgerError> {
        Ok(self.store.list_products(ProductScope::Active).await?)
    }

    /// Explicit name/stock correction on an active product.
    ///
    /// A stock correction bypasses movement history and is logged at `warn`.
    #[instrument(skip(self, patch), fields(product_id = %id))]
    pub async fn update_product(&self, id: ProductId, patch: ProductPatch) -> Result<Product, LedgerError> {
        let mut tx = self.store.begin().await?;
        let outcome = correct_in(&mut tx, id, &patch).await;
        let (before, after) = finish(tx, outcome).await?;

        if before.stock != after.stock {
            warn!(
                previous_stock = before.stock,
                stock = after.stock,
                "stock corrected outside movement history"
            );
        }
        Ok(after)
    }

    /// Register an identity managed upstream so movements may reference it.
    #[instrument(skip(self, input), fields(username = %input.username))]
    pub async fn import_user(&self, input: NewUser) -> Result<User, LedgerError> {
        let user = User::import(UserId::new(), input, Utc::now())?;

        let mut tx = self.store.begin().await?;
        let outcome = tx.insert_user(&user).await.map_err(LedgerError::from);
        match finish(tx, outcome).await {
            Ok(()) => {
                info!(user_id = %user.id, "user imported");
                Ok(user)
            }
            Err(LedgerError::PersistenceFailure(StoreError::Conflict(msg))) => {
                Err(LedgerError::field(conflicting_field(&msg), msg))
            }
            Err(err) => Err(err),
        }
    }

    pub async fn get_user(&self, id: UserId) -> Result<User, LedgerError> {
        self.store
            .find_user(id)
            .await?
            .ok_or_else(|| LedgerError::field("user_id", format!("user {id} does not exist")))
    }
}

async fn correct_in<X: LedgerTransaction>(
    tx: &mut X,
    id: ProductId,
    patch: &ProductPatch,
) -> Result<(Product, Product), LedgerError> {
    let before = tx.lock_product(id).await?.ok_or(LedgerError::ProductNotFound(id))?;
    let after = before.patched(patch, Utc::now())?;
    tx.save_product(&after).await?;
    Ok((before, after))
}

/// Which unique column a conflict message refers to.
fn conflicting_field(message: &str) -> &'static str {
    if message.contains("email") { "email" } else { "username" }
}
