use crate::model::Ms;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;

/// Grace period a self-service reservation stays pending before the sweeper may expire it.
pub const HOLD_DURATION_MS: Ms = 15 * MINUTE_MS;

/// Shortest bookable window.
pub const MIN_BOOKING_MS: Ms = HOUR_MS;

pub const MAX_RESOURCES: usize = 10_000;
pub const MAX_RESERVATIONS_PER_RESOURCE: usize = 100_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_LOCATION_LEN: usize = 512;

/// Longest single reservation (31 days).
pub const MAX_BOOKING_MS: Ms = 31 * 24 * HOUR_MS;
