//! Stock reconciliation engine (application-level orchestration).
//!
//! Keeps every product's stock equal to its opening stock plus the effects of
//! its non-cancelled movements (plus explicit corrections), and never lets it
//! go negative.
//!
//! ## Execution Flow
//!
//! Every mutation follows the same pipeline inside one store transaction:
//!
//! ```text
//! validated intent
//!   ↓
//! 1. Lock rows (movement first, then product)
//!   ↓
//! 2. Decide (pure: Movement::record / revise / cancel produce the next
//!    movement state and a signed stock delta)
//!   ↓
//! 3. Apply the delta to the locked product (rejects negative stock)
//!   ↓
//! 4. Write movement + product
//!   ↓
//! 5. Commit, or roll back everything on the first error
//! ```
//!
//! Reads (`get_movement`, `list_movements`) are unlocked and join products
//! including archived ones, so historical movements stay resolvable after a
//! product is archived.

use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, instrument};

use stockledger_auth::User;
use stockledger_core::{Entity, MovementId, ProductId, UserId};
use stockledger_movements::{Movement, MovementKind, MovementRevision, NewMovement, Quantity, QuantityLimit};
use stockledger_products::{Product, ProductScope};

use crate::error::LedgerError;
use crate::store::{LedgerStore, LedgerTransaction, StoreError};

/// A movement joined with the product it affects and the acting user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MovementRecord {
    pub movement: Movement,
    pub product: Product,
    pub user: User,
}

/// Outcome of removing a product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductRemoval {
    /// The product had no movement history and its row is gone.
    Deleted(ProductId),
    /// The product has history; it is archived and stays joinable.
    Archived(Product),
}

/// Commit on success, roll back on failure.
///
/// Outcomes are reported to the caller, not logged here. A rollback failure
/// is logged since the caller only sees the original error.
pub(crate) async fn finish<T, X>(tx: X, outcome: Result<T, LedgerError>) -> Result<T, LedgerError>
where
    X: LedgerTransaction,
{
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                error!(kind = err.kind(), error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

async fn require_user<X: LedgerTransaction>(tx: &mut X, id: UserId) -> Result<User, LedgerError> {
    tx.find_user(id)
        .await?
        .ok_or_else(|| LedgerError::field("user_id", format!("user {id} does not exist")))
}

async fn lock_active_product<X: LedgerTransaction>(tx: &mut X, id: ProductId) -> Result<Product, LedgerError> {
    tx.lock_product(id).await?.ok_or(LedgerError::ProductNotFound(id))
}

async fn lock_movement<X: LedgerTransaction>(
    tx: &mut X,
    kind: MovementKind,
    id: MovementId,
) -> Result<Movement, LedgerError> {
    tx.lock_movement(kind, id)
        .await?
        .ok_or(LedgerError::MovementNotFound { kind, id })
}

async fn create_in<X: LedgerTransaction>(
    tx: &mut X,
    kind: MovementKind,
    intent: &NewMovement,
) -> Result<MovementRecord, LedgerError> {
    let user = require_user(tx, intent.user_id).await?;
    let product = lock_active_product(tx, intent.product_id).await?;

    let now = Utc::now();
    let change = Movement::record(MovementId::new(), kind, intent, now);
    tx.insert_movement(&change.movement).await?;

    let product = product.with_stock_delta(change.delta, now)?;
    tx.save_product(&product).await?;

    Ok(MovementRecord {
        movement: change.movement,
        product,
        user,
    })
}

async fn update_in<X: LedgerTransaction>(
    tx: &mut X,
    kind: MovementKind,
    id: MovementId,
    revision: &MovementRevision,
) -> Result<MovementRecord, LedgerError> {
    let current = lock_movement(tx, kind, id).await?;

    let now = Utc::now();
    let change = current.revise(revision, now)?;
    let user = require_user(tx, revision.user_id).await?;
    let product = lock_active_product(tx, current.product_id).await?;

    let product = product.with_stock_delta(change.delta, now)?;
    tx.save_movement(&change.movement).await?;
    tx.save_product(&product).await?;

    Ok(MovementRecord {
        movement: change.movement,
        product,
        user,
    })
}

async fn cancel_in<X: LedgerTransaction>(
    tx: &mut X,
    kind: MovementKind,
    id: MovementId,
) -> Result<MovementRecord, LedgerError> {
    let current = lock_movement(tx, kind, id).await?;

    let now = Utc::now();
    let change = current.cancel(now)?;
    let product = lock_active_product(tx, current.product_id).await?;

    let product = product.with_stock_delta(change.delta, now)?;
    tx.save_movement(&change.movement).await?;
    tx.save_product(&product).await?;

    let user = tx.find_user(current.user_id).await?.ok_or_else(|| {
        StoreError::Corrupt(format!("movement {id} references missing user {}", current.user_id))
    })?;

    Ok(MovementRecord {
        movement: change.movement,
        product,
        user,
    })
}

async fn remove_product_in<X: LedgerTransaction>(tx: &mut X, id: ProductId) -> Result<ProductRemoval, LedgerError> {
    let product = lock_active_product(tx, id).await?;

    let incoming = tx.count_movements(MovementKind::Incoming, id).await?;
    let outgoing = tx.count_movements(MovementKind::Outgoing, id).await?;

    if incoming == 0 && outgoing == 0 {
        tx.delete_product(id).await?;
        return Ok(ProductRemoval::Deleted(id));
    }

    let archived = product.archived(Utc::now());
    tx.save_product(&archived).await?;
    Ok(ProductRemoval::Archived(archived))
}

/// Resolves movement references for read paths, caching repeated rows.
struct Joiner<'a, S> {
    store: &'a S,
    products: HashMap<ProductId, Product>,
    users: HashMap<UserId, User>,
}

impl<'a, S: LedgerStore> Joiner<'a, S> {
    fn new(store: &'a S) -> Self {
        Self {
            store,
            products: HashMap::new(),
            users: HashMap::new(),
        }
    }

    async fn join(&mut self, movement: Movement) -> Result<MovementRecord, LedgerError> {
        let product = match self.products.get(&movement.product_id) {
            Some(p) => p.clone(),
            None => {
                let p = self
                    .store
                    .find_product(movement.product_id, ProductScope::IncludeArchived)
                    .await?
                    .ok_or_else(|| {
                        StoreError::Corrupt(format!(
                            "movement {} references missing product {}",
                            movement.id, movement.product_id
                        ))
                    })?;
                self.products.insert(p.id(), p.clone());
                p
            }
        };

        let user = match self.users.get(&movement.user_id) {
            Some(u) => u.clone(),
            None => {
                let u = self.store.find_user(movement.user_id).await?.ok_or_else(|| {
                    StoreError::Corrupt(format!(
                        "movement {} references missing user {}",
                        movement.id, movement.user_id
                    ))
                })?;
                self.users.insert(u.id(), u.clone());
                u
            }
        };

        Ok(MovementRecord { movement, product, user })
    }
}

/// Applies movement mutations to product stock atomically.
///
/// `S` is the injected store; there is no global handle. Mutations run in a
/// transaction of their own and either commit both the movement and the
/// product or neither.
#[derive(Debug, Clone)]
pub struct ReconciliationEngine<S> {
    store: S,
    limit: QuantityLimit,
}

impl<S> ReconciliationEngine<S> {
    pub fn new(store: S) -> Self {
        Self::with_limit(store, QuantityLimit::default())
    }

    pub fn with_limit(store: S, limit: QuantityLimit) -> Self {
        Self { store, limit }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn limit(&self) -> QuantityLimit {
        self.limit
    }

    fn check_qty(&self, qty: Quantity) -> Result<(), LedgerError> {
        if qty.get() > self.limit.max() {
            return Err(LedgerError::field(
                "qty",
                format!("qty must not exceed {}", self.limit.max()),
            ));
        }
        Ok(())
    }
}

impl<S> ReconciliationEngine<S>
where
    S: LedgerStore,
{
    /// Record a new movement and apply its effect to the product.
    ///
    /// Errors: `ValidationFailed` (qty over the limit, unknown user),
    /// `ProductNotFound` (missing or archived), `InvalidStock`,
    /// `PersistenceFailure`.
    #[instrument(
        skip(self, intent),
        fields(kind = %kind, product_id = %intent.product_id, qty = intent.qty.get())
    )]
    pub async fn create_movement(&self, kind: MovementKind, intent: NewMovement) -> Result<MovementRecord, LedgerError> {
        self.check_qty(intent.qty)?;

        let mut tx = self.store.begin().await?;
        let outcome = create_in(&mut tx, kind, &intent).await;
        let record = finish(tx, outcome).await?;

        info!(
            movement_id = %record.movement.id,
            delta = record.movement.stock_effect(),
            stock = record.product.stock,
            "movement recorded"
        );
        Ok(record)
    }

    /// Revise quantity, date and acting user of a live movement.
    ///
    /// The stock changes by the difference between the new and previous
    /// quantity. The product reference cannot change.
    #[instrument(skip(self, revision), fields(kind = %kind, movement_id = %id, qty = revision.qty.get()))]
    pub async fn update_movement(
        &self,
        kind: MovementKind,
        id: MovementId,
        revision: MovementRevision,
    ) -> Result<MovementRecord, LedgerError> {
        self.check_qty(revision.qty)?;

        let mut tx = self.store.begin().await?;
        let outcome = update_in(&mut tx, kind, id, &revision).await;
        let record = finish(tx, outcome).await?;

        info!(stock = record.product.stock, "movement revised");
        Ok(record)
    }

    /// Cancel a live movement, reversing its full effect. Cancellation is terminal.
    #[instrument(skip(self), fields(kind = %kind, movement_id = %id))]
    pub async fn cancel_movement(&self, kind: MovementKind, id: MovementId) -> Result<MovementRecord, LedgerError> {
        let mut tx = self.store.begin().await?;
        let outcome = cancel_in(&mut tx, kind, id).await;
        let record = finish(tx, outcome).await?;

        info!(stock = record.product.stock, "movement cancelled");
        Ok(record)
    }

    /// One movement with its product (archived included) and user.
    #[instrument(skip(self), fields(kind = %kind, movement_id = %id))]
    pub async fn get_movement(&self, kind: MovementKind, id: MovementId) -> Result<MovementRecord, LedgerError> {
        let movement = self
            .store
            .find_movement(kind, id)
            .await?
            .ok_or(LedgerError::MovementNotFound { kind, id })?;
        Joiner::new(&self.store).join(movement).await
    }

    /// Movements of `kind`, or just the one with `id` when given.
    ///
    /// Products are joined including archived ones.
    #[instrument(skip(self), fields(kind = %kind))]
    pub async fn list_movements(
        &self,
        kind: MovementKind,
        id: Option<MovementId>,
    ) -> Result<Vec<MovementRecord>, LedgerError> {
        if let Some(id) = id {
            return Ok(vec![self.get_movement(kind, id).await?]);
        }

        let movements = self.store.list_movements(kind).await?;
        let mut joiner = Joiner::new(&self.store);
        let mut records = Vec::with_capacity(movements.len());
        for movement in movements {
            records.push(joiner.join(movement).await?);
        }
        Ok(records)
    }

    /// Hard-delete a product without movement history; archive it otherwise.
    ///
    /// Runs with the product row locked, so it serializes against movement
    /// creation on the same product.
    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn delete_product(&self, id: ProductId) -> Result<ProductRemoval, LedgerError> {
        let mut tx = self.store.begin().await?;
        let outcome = remove_product_in(&mut tx, id).await;
        let removal = finish(tx, outcome).await?;

        match &removal {
            ProductRemoval::Deleted(_) => info!("product deleted"),
            ProductRemoval::Archived(_) => info!("product archived"),
        }
        Ok(removal)
    }
}
