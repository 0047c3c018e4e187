use tracing::{debug, info};
use ulid::Ulid;

use crate::lifecycle::{initial_status, Requester};
use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::timefmt::parse_timestamp;

use super::conflict::{billable_hours, check_no_conflict, validate_window};
use super::{Engine, EngineError};

/// A reservation request as it arrives from the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub resource_id: Ulid,
    /// `YYYY-MM-DD HH:mm`
    pub start: String,
    /// `YYYY-MM-DD HH:mm`
    pub end: String,
    pub payment_kind: PaymentKind,
    /// Honoured for operators only.
    pub requested_status: Option<ReservationStatus>,
}

impl Engine {
    /// Validate, conflict-check and persist a new reservation.
    ///
    /// The conflict check and the insert happen under the resource's write
    /// lock, so two overlapping requests for the same resource can never both
    /// succeed.
    pub async fn create_reservation(
        &self,
        requester: &Requester,
        request: BookingRequest,
    ) -> Result<Reservation, EngineError> {
        let result = self.try_create_reservation(requester, request).await;
        match &result {
            Ok(r) => {
                metrics::counter!(observability::RESERVATIONS_CREATED_TOTAL, "status" => r.status.as_str())
                    .increment(1);
            }
            Err(e) => {
                metrics::counter!(observability::RESERVATIONS_REJECTED_TOTAL, "reason" => e.kind())
                    .increment(1);
            }
        }
        result
    }

    async fn try_create_reservation(
        &self,
        requester: &Requester,
        request: BookingRequest,
    ) -> Result<Reservation, EngineError> {
        let start = parse_timestamp(&request.start)?;
        let end = parse_timestamp(&request.end)?;
        let span = Span { start, end };
        validate_window(&span)?;

        let policy = requester.policy();
        let status = initial_status(policy, request.requested_status)?;

        let gate = self.enter_gate().await;
        let rs = self
            .get_resource(&request.resource_id)
            .ok_or(EngineError::ResourceNotFound(request.resource_id))?;
        let guard = rs.write_owned().await;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many reservations on resource"));
        }

        if let Err(e) = check_no_conflict(&guard, &span) {
            debug!(
                resource_id = %request.resource_id,
                requester_id = %requester.id,
                "rejected {}..{}: {e}",
                request.start,
                request.end
            );
            return Err(e);
        }

        let total_hours = billable_hours(&span);
        let total_price = u64::from(total_hours)
            .checked_mul(guard.info.hourly_rate)
            .ok_or(EngineError::LimitExceeded("price overflow"))?;

        let now = self.now();
        let manual_override = policy.direct_status_allowed;
        let reservation = Reservation {
            id: Ulid::new(),
            resource_id: request.resource_id,
            requester_id: requester.id,
            span,
            total_hours,
            total_price,
            status,
            payment_kind: request.payment_kind,
            manual_override,
            hold_deadline: (policy.hold_granted && status == ReservationStatus::Pending)
                .then_some(now + HOLD_DURATION_MS),
            created_at: now,
            updated_at: now,
        };

        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        self.commit(gate, vec![guard], event).await?;

        info!(
            reservation_id = %reservation.id,
            resource_id = %reservation.resource_id,
            requester_id = %requester.id,
            status = %reservation.status,
            manual = reservation.manual_override,
            "reservation created for {}..{}",
            request.start,
            request.end
        );
        Ok(reservation)
    }
}
