//! Postgres-backed ledger store.
//!
//! Each [`PostgresTransaction`] wraps one database transaction. Row locks are
//! `SELECT ... FOR UPDATE`; non-negative stock, positive quantities and the
//! movement status set are also enforced by CHECK constraints, and movements
//! reference products/users with `ON DELETE RESTRICT`.
//!
//! ## Error Mapping
//!
//! | SQLx error | Postgres code | `StoreError` |
//! |------------|---------------|--------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `Constraint` |
//! | Database (check violation) | `23514` | `Constraint` |
//! | Database (other) | any | `Query` |
//! | PoolClosed / PoolTimedOut / Io / Tls | n/a | `Connection` |
//! | Other | n/a | `Query` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use stockledger_auth::User;
use stockledger_core::{MovementId, ProductId, UserId};
use stockledger_movements::{Movement, MovementKind, MovementStatus, Quantity};
use stockledger_products::{Product, ProductScope};

use super::r#trait::{LedgerStore, LedgerTransaction, StoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS products (
    id          UUID PRIMARY KEY,
    name        TEXT NOT NULL CHECK (length(btrim(name)) > 0),
    stock       BIGINT NOT NULL CHECK (stock >= 0),
    archived_at TIMESTAMPTZ NULL,
    created_at  TIMESTAMPTZ NOT NULL,
    updated_at  TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id         UUID PRIMARY KEY,
    username   TEXT NOT NULL UNIQUE,
    email      TEXT NOT NULL UNIQUE,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS incoming_items (
    id          UUID PRIMARY KEY,
    qty         INTEGER NOT NULL CHECK (qty > 0),
    incoming_at DATE NOT NULL,
    user_id     UUID NOT NULL REFERENCES users (id) ON DELETE RESTRICT,
    product_id  UUID NOT NULL REFERENCES products (id) ON DELETE RESTRICT,
    status      TEXT NOT NULL CHECK (status IN ('succeed', 'cancelled')),
    created_at  TIMESTAMPTZ NOT NULL,
    updated_at  TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS incoming_items_product_idx ON incoming_items (product_id);

CREATE TABLE IF NOT EXISTS outgoing_items (
    id          UUID PRIMARY KEY,
    qty         INTEGER NOT NULL CHECK (qty > 0),
    outgoing_at DATE NOT NULL,
    user_id     UUID NOT NULL REFERENCES users (id) ON DELETE RESTRICT,
    product_id  UUID NOT NULL REFERENCES products (id) ON DELETE RESTRICT,
    status      TEXT NOT NULL CHECK (status IN ('succeed', 'cancelled')),
    created_at  TIMESTAMPTZ NOT NULL,
    updated_at  TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS outgoing_items_product_idx ON outgoing_items (product_id);
"#;

const PRODUCT_COLUMNS: &str = "id, name, stock, archived_at, created_at, updated_at";
const USER_COLUMNS: &str = "id, username, email, created_at";

fn movement_table(kind: MovementKind) -> &'static str {
    match kind {
        MovementKind::Incoming => "incoming_items",
        MovementKind::Outgoing => "outgoing_items",
    }
}

fn select_movements(kind: MovementKind) -> String {
    format!(
        "SELECT id, qty, {date} AS moved_at, user_id, product_id, status, created_at, updated_at FROM {table}",
        date = kind.date_field(),
        table = movement_table(kind),
    )
}

/// Postgres ledger store over a shared connection pool.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Open a pool against `database_url`.
    #[instrument(skip(database_url), err)]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the ledger tables if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    type Tx = PostgresTransaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_transaction_error("begin_transaction", e))?;
        Ok(PostgresTransaction { tx })
    }

    #[instrument(skip(self), fields(product_id = %id, operation = "find_product"), err)]
    async fn find_product(&self, id: ProductId, scope: ProductScope) -> Result<Option<Product>, StoreError> {
        let sql = match scope {
            ProductScope::Active => {
                format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 AND archived_at IS NULL")
            }
            ProductScope::IncludeArchived => format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"),
        };
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_product", e))?;
        row.map(|r| product_from_row(&r)).transpose()
    }

    #[instrument(skip(self), fields(operation = "list_products", product_count = tracing::field::Empty), err)]
    async fn list_products(&self, scope: ProductScope) -> Result<Vec<Product>, StoreError> {
        let sql = match scope {
            ProductScope::Active => format!(
                "SELECT {PRODUCT_COLUMNS} FROM products WHERE archived_at IS NULL ORDER BY created_at, id"
            ),
            ProductScope::IncludeArchived => {
                format!("SELECT {PRODUCT_COLUMNS} FROM products ORDER BY created_at, id")
            }
        };
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_products", e))?;

        let products = rows.iter().map(product_from_row).collect::<Result<Vec<_>, _>>()?;
        Span::current().record("product_count", products.len());
        Ok(products)
    }

    #[instrument(skip(self), fields(user_id = %id, operation = "find_user"), err)]
    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_user", e))?;
        row.map(|r| user_from_row(&r)).transpose()
    }

    #[instrument(skip(self), fields(kind = %kind, movement_id = %id, operation = "find_movement"), err)]
    async fn find_movement(&self, kind: MovementKind, id: MovementId) -> Result<Option<Movement>, StoreError> {
        let sql = format!("{} WHERE id = $1", select_movements(kind));
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_movement", e))?;
        row.map(|r| movement_from_row(kind, &r)).transpose()
    }

    #[instrument(skip(self), fields(kind = %kind, operation = "list_movements", movement_count = tracing::field::Empty), err)]
    async fn list_movements(&self, kind: MovementKind) -> Result<Vec<Movement>, StoreError> {
        let sql = format!("{} ORDER BY created_at, id", select_movements(kind));
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_movements", e))?;

        let movements = rows
            .iter()
            .map(|r| movement_from_row(kind, r))
            .collect::<Result<Vec<_>, _>>()?;
        Span::current().record("movement_count", movements.len());
        Ok(movements)
    }
}

/// One database transaction. Dropping it without commit rolls back.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTransaction for PostgresTransaction {
    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn lock_product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 AND archived_at IS NULL FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_product", e))?;
        row.map(|r| product_from_row(&r)).transpose()
    }

    #[instrument(skip(self), fields(kind = %kind, movement_id = %id), err)]
    async fn lock_movement(&mut self, kind: MovementKind, id: MovementId) -> Result<Option<Movement>, StoreError> {
        let sql = format!("{} WHERE id = $1 FOR UPDATE", select_movements(kind));
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_movement", e))?;
        row.map(|r| movement_from_row(kind, &r)).transpose()
    }

    async fn find_user(&mut self, id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("find_user", e))?;
        row.map(|r| user_from_row(&r)).transpose()
    }

    #[instrument(skip(self, user), fields(user_id = %user.id), err)]
    async fn insert_user(&mut self, user: &User) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO users (id, username, email, created_at) VALUES ($1, $2, $3, $4)")
            .bind(user.id.as_uuid())
            .bind(&user.username)
            .bind(&user.email)
            .bind(user.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_user", e))?;
        Ok(())
    }

    #[instrument(skip(self, product), fields(product_id = %product.id), err)]
    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, stock, archived_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(stock_column(product.stock)?)
        .bind(product.archived_at)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_product", e))?;
        Ok(())
    }

    #[instrument(skip(self, product), fields(product_id = %product.id, stock = product.stock), err)]
    async fn save_product(&mut self, product: &Product) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET name = $2, stock = $3, archived_at = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(stock_column(product.stock)?)
        .bind(product.archived_at)
        .bind(product.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_product", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Query(format!("no product row {}", product.id)));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn delete_product(&mut self, id: ProductId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_product", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Query(format!("no product row {id}")));
        }
        Ok(())
    }

    async fn count_movements(&mut self, kind: MovementKind, product_id: ProductId) -> Result<u64, StoreError> {
        let sql = format!(
            "SELECT COUNT(*) AS total FROM {} WHERE product_id = $1",
            movement_table(kind)
        );
        let row = sqlx::query(&sql)
            .bind(product_id.as_uuid())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("count_movements", e))?;

        let total: i64 = row
            .try_get("total")
            .map_err(|e| StoreError::Corrupt(format!("failed to read movement count: {e}")))?;
        u64::try_from(total).map_err(|_| StoreError::Corrupt(format!("negative movement count {total}")))
    }

    #[instrument(skip(self, movement), fields(kind = %movement.kind, movement_id = %movement.id), err)]
    async fn insert_movement(&mut self, movement: &Movement) -> Result<(), StoreError> {
        let sql = format!(
            r#"
            INSERT INTO {table} (id, qty, {date}, user_id, product_id, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
            table = movement_table(movement.kind),
            date = movement.kind.date_field(),
        );
        sqlx::query(&sql)
            .bind(movement.id.as_uuid())
            .bind(qty_column(movement.qty)?)
            .bind(movement.moved_at)
            .bind(movement.user_id.as_uuid())
            .bind(movement.product_id.as_uuid())
            .bind(movement.status.as_str())
            .bind(movement.created_at)
            .bind(movement.updated_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_movement", e))?;
        Ok(())
    }

    #[instrument(skip(self, movement), fields(kind = %movement.kind, movement_id = %movement.id), err)]
    async fn save_movement(&mut self, movement: &Movement) -> Result<(), StoreError> {
        let sql = format!(
            r#"
            UPDATE {table}
            SET qty = $2, {date} = $3, user_id = $4, status = $5, updated_at = $6
            WHERE id = $1
            "#,
            table = movement_table(movement.kind),
            date = movement.kind.date_field(),
        );
        let result = sqlx::query(&sql)
            .bind(movement.id.as_uuid())
            .bind(qty_column(movement.qty)?)
            .bind(movement.moved_at)
            .bind(movement.user_id.as_uuid())
            .bind(movement.status.as_str())
            .bind(movement.updated_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("save_movement", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Query(format!("no movement row {}", movement.id)));
        }
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_transaction_error("commit_transaction", e))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_transaction_error("rollback_transaction", e))
    }
}

fn stock_column(stock: u64) -> Result<i64, StoreError> {
    i64::try_from(stock).map_err(|_| StoreError::Constraint(format!("stock {stock} exceeds column range")))
}

fn qty_column(qty: Quantity) -> Result<i32, StoreError> {
    i32::try_from(qty.get()).map_err(|_| StoreError::Constraint(format!("qty {qty} exceeds column range")))
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                Some("23503") | Some("23514") => StoreError::Constraint(msg),
                _ => StoreError::Query(msg),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            StoreError::Connection(format!("connection pool unavailable in {operation}"))
        }
        sqlx::Error::Io(e) => StoreError::Connection(format!("io error in {operation}: {e}")),
        sqlx::Error::Tls(e) => StoreError::Connection(format!("tls error in {operation}: {e}")),
        other => StoreError::Query(format!("sqlx error in {operation}: {other}")),
    }
}

/// Like [`map_sqlx_error`], but failures that are not connection or
/// constraint problems are reported as transaction failures.
fn map_transaction_error(operation: &str, err: sqlx::Error) -> StoreError {
    match map_sqlx_error(operation, err) {
        StoreError::Query(msg) => StoreError::Transaction(msg),
        other => other,
    }
}

// SQLx row types

#[derive(Debug)]
struct ProductRow {
    id: Uuid,
    name: String,
    stock: i64,
    archived_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for ProductRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ProductRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            stock: row.try_get("stock")?,
            archived_at: row.try_get("archived_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<ProductRow> for Product {
    type Error = StoreError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        let stock = u64::try_from(row.stock)
            .map_err(|_| StoreError::Corrupt(format!("product {} has negative stock {}", row.id, row.stock)))?;
        Ok(Product {
            id: ProductId::from_uuid(row.id),
            name: row.name,
            stock,
            archived_at: row.archived_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug)]
struct UserRow {
    id: Uuid,
    username: String,
    email: String,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for UserRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(UserRow {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: UserId::from_uuid(row.id),
            username: row.username,
            email: row.email,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug)]
struct MovementRow {
    id: Uuid,
    qty: i32,
    moved_at: NaiveDate,
    user_id: Uuid,
    product_id: Uuid,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for MovementRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(MovementRow {
            id: row.try_get("id")?,
            qty: row.try_get("qty")?,
            moved_at: row.try_get("moved_at")?,
            user_id: row.try_get("user_id")?,
            product_id: row.try_get("product_id")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl MovementRow {
    fn into_movement(self, kind: MovementKind) -> Result<Movement, StoreError> {
        let qty = u32::try_from(self.qty)
            .ok()
            .and_then(|q| Quantity::new(q).ok())
            .ok_or_else(|| StoreError::Corrupt(format!("movement {} has invalid qty {}", self.id, self.qty)))?;
        let status = self
            .status
            .parse::<MovementStatus>()
            .map_err(|e| StoreError::Corrupt(format!("movement {}: {e}", self.id)))?;

        Ok(Movement {
            id: MovementId::from_uuid(self.id),
            kind,
            qty,
            moved_at: self.moved_at,
            user_id: UserId::from_uuid(self.user_id),
            product_id: ProductId::from_uuid(self.product_id),
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn product_from_row(row: &PgRow) -> Result<Product, StoreError> {
    ProductRow::from_row(row)
        .map_err(|e| StoreError::Corrupt(format!("failed to deserialize product row: {e}")))?
        .try_into()
}

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    UserRow::from_row(row)
        .map(User::from)
        .map_err(|e| StoreError::Corrupt(format!("failed to deserialize user row: {e}")))
}

fn movement_from_row(kind: MovementKind, row: &PgRow) -> Result<Movement, StoreError> {
    MovementRow::from_row(row)
        .map_err(|e| StoreError::Corrupt(format!("failed to deserialize movement row: {e}")))?
        .into_movement(kind)
}
