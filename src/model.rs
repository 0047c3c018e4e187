use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds on the canonical clock.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Pending,
    Paid,
    Cancelled,
    Expired,
}

impl ReservationStatus {
    /// Active reservations block overlapping windows.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Paid)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Expired)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the requester intends to pay. Recorded, never enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    #[serde(alias = "dp")]
    Deposit,
    Full,
}

/// A bookable facility as supplied by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub id: Ulid,
    pub name: String,
    pub location: Option<String>,
    /// Integer currency units per hour.
    pub hourly_rate: u64,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub requester_id: Ulid,
    pub span: Span,
    pub total_hours: u32,
    pub total_price: u64,
    pub status: ReservationStatus,
    pub payment_kind: PaymentKind,
    /// Created directly by an operator; never receives a hold deadline.
    pub manual_override: bool,
    pub hold_deadline: Option<Ms>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Pending with a deadline strictly before `now`.
    pub fn hold_lapsed(&self, now: Ms) -> bool {
        self.status == ReservationStatus::Pending
            && self.hold_deadline.is_some_and(|deadline| deadline < now)
    }

    /// Move to `status`, dropping the hold deadline once the reservation leaves pending.
    pub(crate) fn set_status(&mut self, status: ReservationStatus, at: Ms) {
        self.status = status;
        if status != ReservationStatus::Pending {
            self.hold_deadline = None;
        }
        self.updated_at = at;
    }
}

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub info: ResourceInfo,
    /// All reservations ever made on this resource, sorted by `span.start`.
    pub reservations: Vec<Reservation>,
}

impl ResourceState {
    pub fn new(info: ResourceInfo) -> Self {
        Self {
            info,
            reservations: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.info.id
    }

    /// Insert reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.span.start <= reservation.span.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn reservation(&self, id: &Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == *id)
    }

    pub fn reservation_mut(&mut self, id: &Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == *id)
    }

    /// Return only reservations whose span overlaps the query window.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceCreated {
        resource: ResourceInfo,
    },
    ResourceUpdated {
        resource: ResourceInfo,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationUpdated {
        id: Ulid,
        resource_id: Ulid,
        status: ReservationStatus,
        payment_kind: PaymentKind,
        at: Ms,
    },
    /// Bulk demotion of lapsed holds, as `(resource_id, reservation_id)` pairs.
    HoldsExpired {
        ids: Vec<(Ulid, Ulid)>,
        at: Ms,
    },
}
