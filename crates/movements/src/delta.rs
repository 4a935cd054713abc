//! Stock delta math.
//!
//! Every stock mutation is expressed as a signed delta derived from
//! magnitudes, never as an absolute overwrite:
//!
//! | operation | incoming            | outgoing            |
//! |-----------|---------------------|---------------------|
//! | create    | `+qty`              | `-qty`              |
//! | update    | `new_qty - old_qty` | `old_qty - new_qty` |
//! | cancel    | `-qty`              | `+qty`              |

use crate::movement::MovementKind;
use crate::quantity::Quantity;

/// Delta applied when a movement is recorded.
pub fn creation_delta(kind: MovementKind, qty: Quantity) -> i64 {
    kind.sign() * qty.signed()
}

/// Delta applied when a live movement's quantity changes from `previous` to `next`.
pub fn update_delta(kind: MovementKind, previous: Quantity, next: Quantity) -> i64 {
    kind.sign() * (next.signed() - previous.signed())
}

/// Delta that reverses the full effect of a live movement.
pub fn cancellation_delta(kind: MovementKind, qty: Quantity) -> i64 {
    -creation_delta(kind, qty)
}
