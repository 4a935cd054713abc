use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tokio::sync::{Mutex as RowMutex, OwnedMutexGuard};

use stockledger_auth::User;
use stockledger_core::{MovementId, ProductId, UserId};
use stockledger_movements::{Movement, MovementKind};
use stockledger_products::{Product, ProductScope};

use super::r#trait::{LedgerStore, LedgerTransaction, StoreError};

/// Write steps that can be told to fail once, for atomicity tests.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FailPoint {
    InsertMovement,
    SaveMovement,
    SaveProduct,
    Commit,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
enum RowKey {
    Product(ProductId),
    Movement(MovementKind, MovementId),
}

#[derive(Debug, Default)]
struct Tables {
    products: HashMap<ProductId, Product>,
    users: HashMap<UserId, User>,
    movements: HashMap<(MovementKind, MovementId), Movement>,
}

#[derive(Debug, Default)]
struct Shared {
    tables: RwLock<Tables>,
    row_locks: Mutex<HashMap<RowKey, Arc<RowMutex<()>>>>,
    fail_points: Mutex<HashSet<FailPoint>>,
}

impl Shared {
    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Query("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::Query("lock poisoned".to_string()))
    }

    fn row_mutex(&self, key: RowKey) -> Result<Arc<RowMutex<()>>, StoreError> {
        let mut locks = self
            .row_locks
            .lock()
            .map_err(|_| StoreError::Query("lock poisoned".to_string()))?;
        Ok(locks.entry(key).or_default().clone())
    }

    /// Forget row mutexes nobody holds or waits on any more.
    fn release_rows(&self, keys: impl IntoIterator<Item = RowKey>) {
        let Ok(mut locks) = self.row_locks.lock() else {
            return;
        };
        for key in keys {
            if locks.get(&key).is_some_and(|m| Arc::strong_count(m) == 1) {
                locks.remove(&key);
            }
        }
    }

    /// Consume a one-shot fail point if it is armed.
    fn trip(&self, point: FailPoint) -> Result<(), StoreError> {
        let mut armed = self
            .fail_points
            .lock()
            .map_err(|_| StoreError::Query("lock poisoned".to_string()))?;
        if armed.remove(&point) {
            let msg = format!("injected failure at {point:?}");
            return Err(match point {
                FailPoint::Commit => StoreError::Transaction(msg),
                _ => StoreError::Query(msg),
            });
        }
        Ok(())
    }
}

fn sorted_by_creation<T, K: Ord>(mut rows: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    rows.sort_by_key(|r| key(r));
    rows
}

/// In-memory ledger store.
///
/// Intended for tests/dev. Cloning shares the same tables. Row locks are
/// per-row async mutexes held by the owning [`InMemoryTransaction`]; writes are
/// staged in the transaction and applied together on commit.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    shared: Arc<Shared>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a one-shot failure for the next time `point` is reached.
    pub fn fail_next(&self, point: FailPoint) {
        self.shared
            .fail_points
            .lock()
            .expect("fail point registry poisoned")
            .insert(point);
    }

    #[cfg(test)]
    fn tracked_row_locks(&self) -> usize {
        self.shared.row_locks.lock().map(|locks| locks.len()).unwrap_or_default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(InMemoryTransaction {
            shared: Arc::clone(&self.shared),
            guards: HashMap::new(),
            staged: Vec::new(),
        })
    }

    async fn find_product(&self, id: ProductId, scope: ProductScope) -> Result<Option<Product>, StoreError> {
        let tables = self.shared.read()?;
        Ok(tables
            .products
            .get(&id)
            .filter(|p| p.is_visible_in(scope))
            .cloned())
    }

    async fn list_products(&self, scope: ProductScope) -> Result<Vec<Product>, StoreError> {
        let tables = self.shared.read()?;
        let rows = tables
            .products
            .values()
            .filter(|p| p.is_visible_in(scope))
            .cloned()
            .collect();
        Ok(sorted_by_creation(rows, |p: &Product| (p.created_at, p.id)))
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.shared.read()?.users.get(&id).cloned())
    }

    async fn find_movement(&self, kind: MovementKind, id: MovementId) -> Result<Option<Movement>, StoreError> {
        Ok(self.shared.read()?.movements.get(&(kind, id)).cloned())
    }

    async fn list_movements(&self, kind: MovementKind) -> Result<Vec<Movement>, StoreError> {
        let tables = self.shared.read()?;
        let rows = tables
            .movements
            .values()
            .filter(|m| m.kind == kind)
            .cloned()
            .collect();
        Ok(sorted_by_creation(rows, |m: &Movement| (m.created_at, m.id)))
    }
}

#[derive(Debug, Clone)]
enum Write {
    PutUser(User),
    PutProduct(Product),
    DeleteProduct(ProductId),
    PutMovement(Movement),
}

/// Unit of work over an [`InMemoryLedgerStore`].
#[derive(Debug)]
pub struct InMemoryTransaction {
    shared: Arc<Shared>,
    guards: HashMap<RowKey, OwnedMutexGuard<()>>,
    staged: Vec<Write>,
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        let keys: Vec<RowKey> = self.guards.drain().map(|(key, _guard)| key).collect();
        if !keys.is_empty() {
            self.shared.release_rows(keys);
        }
    }
}

impl InMemoryTransaction {
    async fn lock_row(&mut self, key: RowKey) -> Result<(), StoreError> {
        if self.guards.contains_key(&key) {
            return Ok(());
        }
        let mutex = self.shared.row_mutex(key)?;
        let guard = mutex.lock_owned().await;
        self.guards.insert(key, guard);
        Ok(())
    }

    fn read_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let staged = self.staged.iter().rev().find_map(|w| match w {
            Write::PutProduct(p) if p.id == id => Some(Some(p.clone())),
            Write::DeleteProduct(deleted) if *deleted == id => Some(None),
            _ => None,
        });
        match staged {
            Some(row) => Ok(row),
            None => Ok(self.shared.read()?.products.get(&id).cloned()),
        }
    }

    fn read_movement(&self, kind: MovementKind, id: MovementId) -> Result<Option<Movement>, StoreError> {
        let staged = self.staged.iter().rev().find_map(|w| match w {
            Write::PutMovement(m) if m.kind == kind && m.id == id => Some(m.clone()),
            _ => None,
        });
        match staged {
            Some(row) => Ok(Some(row)),
            None => Ok(self.shared.read()?.movements.get(&(kind, id)).cloned()),
        }
    }

    fn read_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let staged = self.staged.iter().rev().find_map(|w| match w {
            Write::PutUser(u) if u.id == id => Some(u.clone()),
            _ => None,
        });
        match staged {
            Some(row) => Ok(Some(row)),
            None => Ok(self.shared.read()?.users.get(&id).cloned()),
        }
    }

    /// Movements of `kind` as this transaction sees them (committed + staged).
    fn visible_movements(&self, kind: MovementKind) -> Result<HashMap<MovementId, Movement>, StoreError> {
        let mut rows: HashMap<MovementId, Movement> = self
            .shared
            .read()?
            .movements
            .values()
            .filter(|m| m.kind == kind)
            .map(|m| (m.id, m.clone()))
            .collect();
        for write in &self.staged {
            if let Write::PutMovement(m) = write {
                if m.kind == kind {
                    rows.insert(m.id, m.clone());
                }
            }
        }
        Ok(rows)
    }
}

fn user_conflict(existing: &User, candidate: &User) -> Option<StoreError> {
    if existing.id == candidate.id {
        return None;
    }
    if existing.username == candidate.username {
        return Some(StoreError::Conflict(format!(
            "username '{}' is already registered",
            candidate.username
        )));
    }
    if existing.email == candidate.email {
        return Some(StoreError::Conflict(format!(
            "email '{}' is already registered",
            candidate.email
        )));
    }
    None
}

#[async_trait]
impl LedgerTransaction for InMemoryTransaction {
    async fn lock_product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        self.lock_row(RowKey::Product(id)).await?;
        Ok(self
            .read_product(id)?
            .filter(|p| p.is_visible_in(ProductScope::Active)))
    }

    async fn lock_movement(&mut self, kind: MovementKind, id: MovementId) -> Result<Option<Movement>, StoreError> {
        self.lock_row(RowKey::Movement(kind, id)).await?;
        self.read_movement(kind, id)
    }

    async fn find_user(&mut self, id: UserId) -> Result<Option<User>, StoreError> {
        self.read_user(id)
    }

    async fn insert_user(&mut self, user: &User) -> Result<(), StoreError> {
        if self.read_user(user.id)?.is_some() {
            return Err(StoreError::Conflict(format!("user {} already exists", user.id)));
        }
        {
            let tables = self.shared.read()?;
            if let Some(err) = tables.users.values().find_map(|u| user_conflict(u, user)) {
                return Err(err);
            }
        }
        let staged_conflict = self.staged.iter().find_map(|w| match w {
            Write::PutUser(u) => user_conflict(u, user),
            _ => None,
        });
        if let Some(err) = staged_conflict {
            return Err(err);
        }
        self.staged.push(Write::PutUser(user.clone()));
        Ok(())
    }

    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError> {
        if self.read_product(product.id)?.is_some() {
            return Err(StoreError::Conflict(format!("product {} already exists", product.id)));
        }
        self.staged.push(Write::PutProduct(product.clone()));
        Ok(())
    }

    async fn save_product(&mut self, product: &Product) -> Result<(), StoreError> {
        self.shared.trip(FailPoint::SaveProduct)?;
        if self.read_product(product.id)?.is_none() {
            return Err(StoreError::Query(format!("no product row {}", product.id)));
        }
        self.staged.push(Write::PutProduct(product.clone()));
        Ok(())
    }

    async fn delete_product(&mut self, id: ProductId) -> Result<(), StoreError> {
        if self.read_product(id)?.is_none() {
            return Err(StoreError::Query(format!("no product row {id}")));
        }
        for kind in MovementKind::ALL {
            if self.count_movements(kind, id).await? > 0 {
                return Err(StoreError::Constraint(format!(
                    "product {id} is still referenced by {kind} movements"
                )));
            }
        }
        self.staged.push(Write::DeleteProduct(id));
        Ok(())
    }

    async fn count_movements(&mut self, kind: MovementKind, product_id: ProductId) -> Result<u64, StoreError> {
        let count = self
            .visible_movements(kind)?
            .values()
            .filter(|m| m.product_id == product_id)
            .count();
        Ok(count as u64)
    }

    async fn insert_movement(&mut self, movement: &Movement) -> Result<(), StoreError> {
        self.shared.trip(FailPoint::InsertMovement)?;
        if self.read_movement(movement.kind, movement.id)?.is_some() {
            return Err(StoreError::Conflict(format!("movement {} already exists", movement.id)));
        }
        if self.read_product(movement.product_id)?.is_none() {
            return Err(StoreError::Constraint(format!(
                "movement references missing product {}",
                movement.product_id
            )));
        }
        if self.read_user(movement.user_id)?.is_none() {
            return Err(StoreError::Constraint(format!(
                "movement references missing user {}",
                movement.user_id
            )));
        }
        self.staged.push(Write::PutMovement(movement.clone()));
        Ok(())
    }

    async fn save_movement(&mut self, movement: &Movement) -> Result<(), StoreError> {
        self.shared.trip(FailPoint::SaveMovement)?;
        if self.read_movement(movement.kind, movement.id)?.is_none() {
            return Err(StoreError::Query(format!("no movement row {}", movement.id)));
        }
        if self.read_user(movement.user_id)?.is_none() {
            return Err(StoreError::Constraint(format!(
                "movement references missing user {}",
                movement.user_id
            )));
        }
        self.staged.push(Write::PutMovement(movement.clone()));
        Ok(())
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        self.shared.trip(FailPoint::Commit)?;

        let mut tables = self.shared.write()?;

        // Usernames/emails are only checked against committed rows at insert
        // time, so a concurrent import may have claimed them since.
        for write in &self.staged {
            if let Write::PutUser(user) = write {
                if let Some(err) = tables.users.values().find_map(|u| user_conflict(u, user)) {
                    return Err(err);
                }
            }
        }

        for write in std::mem::take(&mut self.staged) {
            match write {
                Write::PutUser(user) => {
                    tables.users.insert(user.id, user);
                }
                Write::PutProduct(product) => {
                    tables.products.insert(product.id, product);
                }
                Write::DeleteProduct(id) => {
                    tables.products.remove(&id);
                }
                Write::PutMovement(movement) => {
                    tables.movements.insert((movement.kind, movement.id), movement);
                }
            }
        }

        drop(tables);
        // Row guards release when `self` drops here.
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}
