use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, Entity, MovementId, ProductId, UserId};

use crate::delta::{cancellation_delta, creation_delta, update_delta};
use crate::quantity::Quantity;

/// Direction of a movement.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementKind {
    Incoming,
    Outgoing,
}

impl MovementKind {
    pub const ALL: [MovementKind; 2] = [MovementKind::Incoming, MovementKind::Outgoing];

    /// Sign of the stock effect of a live movement of this kind.
    pub fn sign(self) -> i64 {
        match self {
            MovementKind::Incoming => 1,
            MovementKind::Outgoing => -1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MovementKind::Incoming => "incoming",
            MovementKind::Outgoing => "outgoing",
        }
    }

    /// Name of the movement date field in serialized records.
    pub fn date_field(self) -> &'static str {
        match self {
            MovementKind::Incoming => "incoming_at",
            MovementKind::Outgoing => "outgoing_at",
        }
    }
}

impl core::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for MovementKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "incoming" => Ok(MovementKind::Incoming),
            "outgoing" => Ok(MovementKind::Outgoing),
            _ => Err(DomainError::field("kind", "kind must be one of: incoming, outgoing")),
        }
    }
}

/// Movement lifecycle status. `Cancelled` is terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementStatus {
    Succeed,
    Cancelled,
}

impl MovementStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementStatus::Succeed => "succeed",
            MovementStatus::Cancelled => "cancelled",
        }
    }
}

impl core::str::FromStr for MovementStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "succeed" => Ok(MovementStatus::Succeed),
            "cancelled" => Ok(MovementStatus::Cancelled),
            other => Err(DomainError::field("status", format!("unknown movement status '{other}'"))),
        }
    }
}

/// A recorded stock movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    pub kind: MovementKind,
    pub qty: Quantity,
    pub moved_at: NaiveDate,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub status: MovementStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated intent to record a movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMovement {
    pub product_id: ProductId,
    pub user_id: UserId,
    pub qty: Quantity,
    pub moved_at: NaiveDate,
}

/// Validated intent to revise a live movement.
///
/// `product_id`, when present, must match the recorded product: a movement
/// cannot be re-pointed to another product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRevision {
    pub qty: Quantity,
    pub moved_at: NaiveDate,
    pub user_id: UserId,
    pub product_id: Option<ProductId>,
}

/// The next state of a movement plus the stock delta it implies for its product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementChange {
    pub movement: Movement,
    pub delta: i64,
}

impl Movement {
    /// Record a new live movement.
    pub fn record(id: MovementId, kind: MovementKind, intent: &NewMovement, now: DateTime<Utc>) -> MovementChange {
        let movement = Movement {
            id,
            kind,
            qty: intent.qty,
            moved_at: intent.moved_at,
            user_id: intent.user_id,
            product_id: intent.product_id,
            status: MovementStatus::Succeed,
            created_at: now,
            updated_at: now,
        };

        MovementChange {
            delta: creation_delta(kind, intent.qty),
            movement,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == MovementStatus::Cancelled
    }

    /// Current contribution of this movement to its product's stock.
    pub fn stock_effect(&self) -> i64 {
        if self.is_cancelled() {
            0
        } else {
            creation_delta(self.kind, self.qty)
        }
    }

    /// Decide the revised movement and the delta against the previous quantity.
    ///
    /// Does not mutate `self`.
    pub fn revise(&self, revision: &MovementRevision, now: DateTime<Utc>) -> DomainResult<MovementChange> {
        self.ensure_live()?;

        if let Some(product_id) = revision.product_id {
            if product_id != self.product_id {
                return Err(DomainError::field(
                    "product_id",
                    "product_id cannot be changed on an existing movement",
                ));
            }
        }

        let delta = update_delta(self.kind, self.qty, revision.qty);
        let movement = Movement {
            qty: revision.qty,
            moved_at: revision.moved_at,
            user_id: revision.user_id,
            updated_at: now,
            ..self.clone()
        };

        Ok(MovementChange { movement, delta })
    }

    /// Decide the cancelled movement and the delta that reverses its full effect.
    ///
    /// Does not mutate `self`.
    pub fn cancel(&self, now: DateTime<Utc>) -> DomainResult<MovementChange> {
        self.ensure_live()?;

        let movement = Movement {
            status: MovementStatus::Cancelled,
            updated_at: now,
            ..self.clone()
        };

        Ok(MovementChange {
            delta: cancellation_delta(self.kind, self.qty),
            movement,
        })
    }

    fn ensure_live(&self) -> DomainResult<()> {
        if self.is_cancelled() {
            return Err(DomainError::AlreadyCancelled);
        }
        Ok(())
    }
}

impl Entity for Movement {
    type Id = MovementId;

    fn id(&self) -> Self::Id {
        self.id
    }
}
