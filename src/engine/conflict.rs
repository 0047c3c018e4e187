use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

/// Reject windows that are empty, inverted, shorter than the minimum booking or absurdly long.
pub fn validate_window(span: &Span) -> Result<(), EngineError> {
    if span.end <= span.start {
        return Err(EngineError::InvalidWindow("invalid time range"));
    }
    if span.duration_ms() < MIN_BOOKING_MS {
        return Err(EngineError::InvalidWindow("minimum booking is 1 hour"));
    }
    if span.duration_ms() > MAX_BOOKING_MS {
        return Err(EngineError::LimitExceeded("booking too long"));
    }
    Ok(())
}

/// Whole hours in the window, rounded down. `[10:00, 11:59)` bills one hour.
pub fn billable_hours(span: &Span) -> u32 {
    (span.duration_ms().max(0) / HOUR_MS) as u32
}

/// First active reservation on `rs` overlapping `span`, skipping `exclude`.
pub fn find_conflict(rs: &ResourceState, span: &Span, exclude: Option<Ulid>) -> Option<Ulid> {
    rs.overlapping(span)
        .filter(|r| r.is_active())
        .find(|r| Some(r.id) != exclude)
        .map(|r| r.id)
}

pub(super) fn check_no_conflict(rs: &ResourceState, span: &Span) -> Result<(), EngineError> {
    match find_conflict(rs, span, None) {
        Some(id) => Err(EngineError::SlotConflict(id)),
        None => Ok(()),
    }
}

impl Engine {
    /// True iff inserting `span` as an active reservation on `resource_id` would
    /// overlap an existing pending or paid one (other than `exclude`).
    pub async fn has_conflict(
        &self,
        resource_id: Ulid,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(find_conflict(&guard, &span, exclude).is_some())
    }
}
