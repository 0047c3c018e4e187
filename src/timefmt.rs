//! Canonical `YYYY-MM-DD HH:mm` timestamps.
//!
//! Minute precision, no seconds, no offset. Strings are read on the canonical
//! clock (UTC) and formatting truncates to the minute, so any string accepted
//! by [`parse_timestamp`] formats back to itself.

use chrono::{DateTime, NaiveDateTime};

use crate::engine::EngineError;
use crate::limits::MINUTE_MS;
use crate::model::Ms;

pub const LAYOUT: &str = "%Y-%m-%d %H:%M";

/// `YYYY-MM-DD HH:mm` with every field zero-padded.
const SHAPE: &[u8; 16] = b"dddd-dd-dd dd:dd";

pub fn parse_timestamp(raw: &str) -> Result<Ms, EngineError> {
    let malformed = || EngineError::MalformedTimestamp(raw.to_string());

    // chrono accepts unpadded fields; the layout is strict.
    let bytes = raw.as_bytes();
    if bytes.len() != SHAPE.len() {
        return Err(malformed());
    }
    let shape_ok = bytes.iter().zip(SHAPE).all(|(b, s)| match s {
        b'd' => b.is_ascii_digit(),
        other => b == other,
    });
    if !shape_ok {
        return Err(malformed());
    }

    let naive = NaiveDateTime::parse_from_str(raw, LAYOUT).map_err(|_| malformed())?;
    Ok(naive.and_utc().timestamp_millis())
}

pub fn format_timestamp(ms: Ms) -> String {
    let truncated = ms.div_euclid(MINUTE_MS) * MINUTE_MS;
    match DateTime::from_timestamp_millis(truncated) {
        Some(dt) => dt.naive_utc().format(LAYOUT).to_string(),
        // Outside chrono's range; never produced by parse_timestamp.
        None => format!("@{truncated}"),
    }
}
