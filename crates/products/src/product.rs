use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, Entity, ProductId, ValidationErrors};

/// Which products a lookup may return.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProductScope {
    /// Only products that have not been archived.
    Active,
    /// Archived products too (historical joins).
    IncludeArchived,
}

/// A stock-carrying product.
///
/// # Invariants
/// - `name` is never blank.
/// - `stock` is a non-negative counter no larger than [`MAX_STOCK`]; it only
///   changes through
///   [`Product::with_stock_delta`] or an explicit [`ProductPatch`] correction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub stock: u64,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for product creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    /// Opening stock; defaults to zero.
    #[serde(default)]
    pub stock: u64,
}

/// Explicit name/stock correction. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub stock: Option<u64>,
}

impl ProductPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.stock.is_none()
    }
}

/// Largest stock a product can hold (the width of a signed 64-bit column).
pub const MAX_STOCK: u64 = i64::MAX as u64;

fn validate_stock(stock: u64, errors: &mut ValidationErrors) {
    if stock > MAX_STOCK {
        errors.push("stock", format!("stock must not exceed {MAX_STOCK}"));
    }
}

fn validate_name(name: &str, errors: &mut ValidationErrors) {
    if name.trim().is_empty() {
        errors.push("name", "name cannot be empty");
    }
}

impl Product {
    /// Build a new product from validated input.
    pub fn create(id: ProductId, input: NewProduct, now: DateTime<Utc>) -> DomainResult<Self> {
        let mut errors = ValidationErrors::new();
        validate_name(&input.name, &mut errors);
        validate_stock(input.stock, &mut errors);
        errors.into_result(())?;

        Ok(Self {
            id,
            name: input.name.trim().to_string(),
            stock: input.stock,
            archived_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    pub fn is_visible_in(&self, scope: ProductScope) -> bool {
        match scope {
            ProductScope::Active => !self.is_archived(),
            ProductScope::IncludeArchived => true,
        }
    }

    /// Return a copy with `delta` applied to the stock counter.
    ///
    /// Does not mutate `self`; the caller decides whether to persist.
    pub fn with_stock_delta(&self, delta: i64, now: DateTime<Utc>) -> DomainResult<Self> {
        let stock = apply_stock_delta(self.stock, delta)?;
        Ok(Self {
            stock,
            updated_at: now,
            ..self.clone()
        })
    }

    /// Return a copy with the correction applied.
    pub fn patched(&self, patch: &ProductPatch, now: DateTime<Utc>) -> DomainResult<Self> {
        let mut errors = ValidationErrors::new();
        if patch.is_empty() {
            errors.push("patch", "at least one of name or stock must be provided");
        }
        if let Some(name) = &patch.name {
            validate_name(name, &mut errors);
        }
        if let Some(stock) = patch.stock {
            validate_stock(stock, &mut errors);
        }
        errors.into_result(())?;

        let mut next = self.clone();
        if let Some(name) = &patch.name {
            next.name = name.trim().to_string();
        }
        if let Some(stock) = patch.stock {
            next.stock = stock;
        }
        next.updated_at = now;
        Ok(next)
    }

    /// Return an archived (soft-deleted) copy.
    pub fn archived(&self, now: DateTime<Utc>) -> Self {
        Self {
            archived_at: Some(now),
            updated_at: now,
            ..self.clone()
        }
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

/// Apply a signed delta to a non-negative stock counter.
///
/// Rejects results below zero or above [`MAX_STOCK`] with
/// [`DomainError::InvalidStock`].
pub fn apply_stock_delta(stock: u64, delta: i64) -> DomainResult<u64> {
    stock
        .checked_add_signed(delta)
        .filter(|next| *next <= MAX_STOCK)
        .ok_or_else(|| DomainError::invalid_stock(stock, delta))
}
