use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use stockledger_auth::User;
use stockledger_core::{MovementId, ProductId, UserId};
use stockledger_movements::{Movement, MovementKind};
use stockledger_products::{Product, ProductScope};

/// Storage operation error.
///
/// These are **infrastructure errors** (connectivity, constraints, corrupt
/// rows) as opposed to domain errors (validation, stock rules, lifecycle).
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not reach the backing store (pool closed, IO failure).
    #[error("connection failure: {0}")]
    Connection(String),

    /// A uniqueness constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A referential or check constraint rejected the write.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// A query failed for any other reason.
    #[error("query failed: {0}")]
    Query(String),

    /// Begin, commit or rollback failed.
    #[error("transaction failure: {0}")]
    Transaction(String),

    /// A stored row could not be mapped back into a domain value.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Entry point to ledger storage.
///
/// Reads on the store itself are unlocked snapshots, suitable for listing and
/// lookups that do not feed a write. Anything that reads-then-writes must go
/// through [`LedgerStore::begin`].
#[async_trait]
pub trait LedgerStore: Send + Sync {
    type Tx: LedgerTransaction;

    /// Open a unit of work.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    async fn find_product(&self, id: ProductId, scope: ProductScope) -> Result<Option<Product>, StoreError>;

    /// Products visible in `scope`, oldest first.
    async fn list_products(&self, scope: ProductScope) -> Result<Vec<Product>, StoreError>;

    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    async fn find_movement(&self, kind: MovementKind, id: MovementId) -> Result<Option<Movement>, StoreError>;

    /// All movements of `kind` (live and cancelled), oldest first.
    async fn list_movements(&self, kind: MovementKind) -> Result<Vec<Movement>, StoreError>;
}

/// A single atomic unit of work.
///
/// Row locks taken through `lock_*` are held until [`commit`](Self::commit),
/// [`rollback`](Self::rollback) or drop. Dropping an uncommitted transaction
/// discards every write made through it.
///
/// Callers lock a movement before its product, never the reverse.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Lock and read an active (non-archived) product.
    async fn lock_product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError>;

    /// Lock and read a movement regardless of status.
    async fn lock_movement(&mut self, kind: MovementKind, id: MovementId) -> Result<Option<Movement>, StoreError>;

    async fn find_user(&mut self, id: UserId) -> Result<Option<User>, StoreError>;

    /// Fails with [`StoreError::Conflict`] when the username or email is taken.
    async fn insert_user(&mut self, user: &User) -> Result<(), StoreError>;

    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError>;

    /// Overwrite a product previously read in this transaction.
    async fn save_product(&mut self, product: &Product) -> Result<(), StoreError>;

    /// Remove a product row outright. Only valid while no movement references it.
    async fn delete_product(&mut self, id: ProductId) -> Result<(), StoreError>;

    /// Number of movements of `kind` referencing `product_id`, any status.
    async fn count_movements(&mut self, kind: MovementKind, product_id: ProductId) -> Result<u64, StoreError>;

    async fn insert_movement(&mut self, movement: &Movement) -> Result<(), StoreError>;

    async fn save_movement(&mut self, movement: &Movement) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    type Tx = S::Tx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        (**self).begin().await
    }

    async fn find_product(&self, id: ProductId, scope: ProductScope) -> Result<Option<Product>, StoreError> {
        (**self).find_product(id, scope).await
    }

    async fn list_products(&self, scope: ProductScope) -> Result<Vec<Product>, StoreError> {
        (**self).list_products(scope).await
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        (**self).find_user(id).await
    }

    async fn find_movement(&self, kind: MovementKind, id: MovementId) -> Result<Option<Movement>, StoreError> {
        (**self).find_movement(kind, id).await
    }

    async fn list_movements(&self, kind: MovementKind) -> Result<Vec<Movement>, StoreError> {
        (**self).list_movements(kind).await
    }
}
