use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockledger_auth::{NewUser, User};
use stockledger_core::{MovementId, ProductId, UserId, ValidationErrors};
use stockledger_infra::{MovementRecord, ProductRemoval};
use stockledger_movements::{MovementKind, MovementRevision, MovementStatus, NewMovement, QuantityLimit};
use stockledger_products::{NewProduct, Product, ProductPatch};

/// Movement dates on the wire.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// -------------------------
// Field parsers
// -------------------------

fn required<'a, T>(errors: &mut ValidationErrors, field: &str, value: &'a Option<T>) -> Option<&'a T> {
    if value.is_none() {
        errors.push(field, format!("{field} is required"));
    }
    value.as_ref()
}

fn parse_id<T: core::str::FromStr>(field: &str, raw: &str) -> Result<T, String> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| format!("{field} must be a valid UUID"))
}

fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .map_err(|_| format!("{field} must be a date formatted YYYY-MM-DD"))
}

fn parse_stock(raw: i64) -> Result<u64, String> {
    u64::try_from(raw).map_err(|_| "stock cannot be negative".to_string())
}

pub fn parse_kind(raw: &str) -> Result<MovementKind, ValidationErrors> {
    raw.parse::<MovementKind>().map_err(|_| {
        ValidationErrors::single("kind", "kind must be one of: incoming, outgoing")
    })
}

pub fn parse_product_id(raw: &str) -> Result<ProductId, ValidationErrors> {
    parse_id("id", raw).map_err(|msg| ValidationErrors::single("id", msg))
}

pub fn parse_movement_id(raw: &str) -> Result<MovementId, ValidationErrors> {
    parse_id("id", raw).map_err(|msg| ValidationErrors::single("id", msg))
}

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateProductRequest {
    pub name: Option<String>,
    pub stock: Option<i64>,
}

impl CreateProductRequest {
    pub fn validate(&self) -> Result<NewProduct, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let name = required(&mut errors, "name", &self.name).cloned();
        if name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            errors.push("name", "name cannot be empty");
        }
        let stock = match self.stock {
            None => Some(0),
            Some(raw) => errors.check("stock", parse_stock(raw)),
        };

        match (name, stock) {
            (Some(name), Some(stock)) => errors.into_result(NewProduct { name, stock }),
            _ => Err(errors),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub stock: Option<i64>,
}

impl UpdateProductRequest {
    pub fn validate(&self) -> Result<ProductPatch, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.name.is_none() && self.stock.is_none() {
            errors.push("patch", "at least one of name or stock must be provided");
        }
        if self.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            errors.push("name", "name cannot be empty");
        }
        let stock = match self.stock {
            None => None,
            Some(raw) => errors.check("stock", parse_stock(raw)),
        };

        errors.into_result(ProductPatch {
            name: self.name.clone(),
            stock,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
}

impl ImportUserRequest {
    pub fn validate(&self) -> Result<NewUser, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let username = required(&mut errors, "username", &self.username);
        let email = required(&mut errors, "email", &self.email);

        let (Some(username), Some(email)) = (username, email) else {
            return Err(errors);
        };
        let user = NewUser {
            username: username.clone(),
            email: email.clone(),
        };
        user.validate()?;
        Ok(user)
    }
}

/// Body of a movement creation. The date may be sent as `moved_at` or under
/// the kind-specific name (`incoming_at` / `outgoing_at`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateMovementRequest {
    pub product_id: Option<String>,
    pub user_id: Option<String>,
    pub qty: Option<i64>,
    #[serde(alias = "incoming_at", alias = "outgoing_at")]
    pub moved_at: Option<String>,
}

impl CreateMovementRequest {
    pub fn validate(&self, limit: QuantityLimit) -> Result<NewMovement, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let product_id = required(&mut errors, "product_id", &self.product_id)
            .and_then(|raw| errors.check("product_id", parse_id::<ProductId>("product_id", raw)));
        let user_id = required(&mut errors, "user_id", &self.user_id)
            .and_then(|raw| errors.check("user_id", parse_id::<UserId>("user_id", raw)));
        let qty = required(&mut errors, "qty", &self.qty).and_then(|raw| errors.check("qty", limit.parse(*raw)));
        let moved_at =
            required(&mut errors, "moved_at", &self.moved_at).and_then(|raw| errors.check("moved_at", parse_date("moved_at", raw)));

        match (product_id, user_id, qty, moved_at) {
            (Some(product_id), Some(user_id), Some(qty), Some(moved_at)) => errors.into_result(NewMovement {
                product_id,
                user_id,
                qty,
                moved_at,
            }),
            _ => Err(errors),
        }
    }
}

/// Body of a movement revision. `product_id` is optional and must match the
/// recorded product when given.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateMovementRequest {
    pub user_id: Option<String>,
    pub qty: Option<i64>,
    #[serde(alias = "incoming_at", alias = "outgoing_at")]
    pub moved_at: Option<String>,
    pub product_id: Option<String>,
}

impl UpdateMovementRequest {
    pub fn validate(&self, limit: QuantityLimit) -> Result<MovementRevision, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let user_id = required(&mut errors, "user_id", &self.user_id)
            .and_then(|raw| errors.check("user_id", parse_id::<UserId>("user_id", raw)));
        let qty = required(&mut errors, "qty", &self.qty).and_then(|raw| errors.check("qty", limit.parse(*raw)));
        let moved_at =
            required(&mut errors, "moved_at", &self.moved_at).and_then(|raw| errors.check("moved_at", parse_date("moved_at", raw)));
        let product_id = match &self.product_id {
            None => None,
            Some(raw) => errors.check("product_id", parse_id::<ProductId>("product_id", raw)),
        };

        match (user_id, qty, moved_at) {
            (Some(user_id), Some(qty), Some(moved_at)) => errors.into_result(MovementRevision {
                qty,
                moved_at,
                user_id,
                product_id,
            }),
            _ => Err(errors),
        }
    }
}

// -------------------------
// Views
// -------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductView {
    pub id: ProductId,
    pub name: String,
    pub stock: u64,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Product> for ProductView {
    fn from(p: Product) -> Self {
        Self {
            id: p.id,
            name: p.name,
            stock: p.stock,
            archived_at: p.archived_at,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserView {
    pub id: UserId,
    pub username: String,
    pub email: String,
}

impl From<User> for UserView {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            email: u.email,
        }
    }
}

/// Outcome of `delete_product`: the product row is gone, or archived with history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductRemovalView {
    pub id: ProductId,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<ProductView>,
}

impl From<ProductRemoval> for ProductRemovalView {
    fn from(removal: ProductRemoval) -> Self {
        match removal {
            ProductRemoval::Deleted(id) => Self {
                id,
                outcome: "deleted",
                product: None,
            },
            ProductRemoval::Archived(product) => Self {
                id: product.id,
                outcome: "archived",
                product: Some(product.into()),
            },
        }
    }
}

/// Movement date under its kind-specific key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MovedAt {
    IncomingAt(#[serde(serialize_with = "serialize_date")] NaiveDate),
    OutgoingAt(#[serde(serialize_with = "serialize_date")] NaiveDate),
}

fn serialize_date<S: serde::Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&date.format(DATE_FORMAT))
}

impl MovedAt {
    pub fn new(kind: MovementKind, date: NaiveDate) -> Self {
        match kind {
            MovementKind::Incoming => MovedAt::IncomingAt(date),
            MovementKind::Outgoing => MovedAt::OutgoingAt(date),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MovementView {
    pub id: MovementId,
    pub kind: MovementKind,
    pub qty: u32,
    #[serde(flatten)]
    pub moved_at: MovedAt,
    pub status: MovementStatus,
    pub product_id: ProductId,
    pub user_id: UserId,
    pub product: ProductView,
    pub user: UserView,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<MovementRecord> for MovementView {
    fn from(record: MovementRecord) -> Self {
        let m = record.movement;
        Self {
            id: m.id,
            kind: m.kind,
            qty: m.qty.get(),
            moved_at: MovedAt::new(m.kind, m.moved_at),
            status: m.status,
            product_id: m.product_id,
            user_id: m.user_id,
            product: record.product.into(),
            user: record.user.into(),
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit() -> QuantityLimit {
        QuantityLimit::new(1_000).unwrap()
    }

    #[test]
    fn create_movement_collects_every_field_error() {
        let req = CreateMovementRequest {
            product_id: Some("not-a-uuid".to_string()),
            user_id: None,
            qty: Some(0),
            moved_at: Some("14/06/2024".to_string()),
        };
        let errors = req.validate(limit()).unwrap_err();
        for field in ["product_id", "user_id", "qty", "moved_at"] {
            assert!(errors.contains(field), "missing error for {field}");
        }
    }

    #[test]
    fn create_movement_accepts_kind_specific_date_key() {
        let product_id = ProductId::new();
        let user_id = UserId::new();
        let req: CreateMovementRequest = serde_json::from_value(serde_json::json!({
            "product_id": product_id.to_string(),
            "user_id": user_id.to_string(),
            "qty": 12,
            "outgoing_at": "2024-06-14",
        }))
        .unwrap();

        let intent = req.validate(limit()).unwrap();
        assert_eq!(intent.product_id, product_id);
        assert_eq!(intent.qty.get(), 12);
        assert_eq!(intent.moved_at, NaiveDate::from_ymd_opt(2024, 6, 14).unwrap());
    }

    #[test]
    fn qty_above_limit_is_a_field_error() {
        let req = UpdateMovementRequest {
            user_id: Some(UserId::new().to_string()),
            qty: Some(1_001),
            moved_at: Some("2024-01-01".to_string()),
            product_id: None,
        };
        let errors = req.validate(limit()).unwrap_err();
        assert!(errors.contains("qty"));
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn negative_opening_stock_is_rejected() {
        let req = CreateProductRequest {
            name: Some("bolt".to_string()),
            stock: Some(-1),
        };
        assert!(req.validate().unwrap_err().contains("stock"));

        let ok = CreateProductRequest {
            name: Some("bolt".to_string()),
            stock: None,
        };
        assert_eq!(ok.validate().unwrap().stock, 0);
    }

    #[test]
    fn empty_patch_is_rejected() {
        assert!(UpdateProductRequest::default().validate().unwrap_err().contains("patch"));
    }

    #[test]
    fn movement_view_uses_kind_specific_date_key() {
        let view = MovedAt::new(MovementKind::Incoming, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(
            serde_json::to_value(view).unwrap(),
            serde_json::json!({ "incoming_at": "2024-02-29" })
        );
    }
}
