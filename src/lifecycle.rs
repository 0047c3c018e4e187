//! Reservation status machine and role policy.
//!
//! ```text
//! pending ──► paid ──► cancelled
//!    │                    ▲
//!    ├────────────────────┘
//!    └──► expired            (sweeper only)
//! ```
//!
//! `cancelled` and `expired` are terminal. Nothing returns to `pending`.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::ReservationStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Standard,
    Operator,
    Superoperator,
}

/// Authenticated caller, as handed over by the identity layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    pub id: Ulid,
    pub role: Role,
}

impl Requester {
    pub fn new(id: Ulid, role: Role) -> Self {
        Self { id, role }
    }

    pub fn policy(&self) -> Policy {
        policy_for(self.role)
    }
}

/// What a role may do when creating or editing reservations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// May pick the initial status and edit reservations it does not own.
    pub direct_status_allowed: bool,
    /// New reservations get a hold deadline and start pending.
    pub hold_granted: bool,
}

pub fn policy_for(role: Role) -> Policy {
    match role {
        Role::Operator | Role::Superoperator => Policy {
            direct_status_allowed: true,
            hold_granted: false,
        },
        Role::Standard => Policy {
            direct_status_allowed: false,
            hold_granted: true,
        },
    }
}

/// Who is driving a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Operator,
    Requester,
    Sweeper,
}

pub fn check_transition(
    from: ReservationStatus,
    to: ReservationStatus,
    actor: Actor,
) -> Result<(), EngineError> {
    use ReservationStatus::*;

    let invalid = || EngineError::InvalidTransition { from, to };
    if from.is_terminal() {
        return Err(invalid());
    }
    if to == Expired && actor != Actor::Sweeper {
        return Err(invalid());
    }
    match (from, to) {
        (Pending, Pending | Paid | Cancelled | Expired) => Ok(()),
        (Paid, Paid | Cancelled) => Ok(()),
        _ => Err(invalid()),
    }
}

/// Status a new reservation starts in.
pub fn initial_status(
    policy: Policy,
    requested: Option<ReservationStatus>,
) -> Result<ReservationStatus, EngineError> {
    if !policy.direct_status_allowed {
        return Ok(ReservationStatus::Pending);
    }
    match requested.unwrap_or(ReservationStatus::Pending) {
        ReservationStatus::Expired => Err(EngineError::InvalidTransition {
            from: ReservationStatus::Pending,
            to: ReservationStatus::Expired,
        }),
        status => Ok(status),
    }
}
