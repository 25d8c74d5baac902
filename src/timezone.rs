//! Conversion of raw protocol timestamps into timezone-aware values.
//!
//! Naive values are taken to be UTC and localized once. Values that already
//! carry an offset are only converted, never localized a second time.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::Result;
use crate::error::TvError;

/// Formats accepted for naive textual timestamps.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// A timestamp as it may appear in a quote or bar payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawTimestamp {
    /// Seconds since the Unix epoch (`timestamp_ts`, `lp_time`).
    Epoch(i64),
    /// Wall-clock time without an offset.
    Naive(NaiveDateTime),
    /// Time with an explicit offset.
    Aware(DateTime<FixedOffset>),
}

impl RawTimestamp {
    /// Parses an RFC 3339 string, falling back to the naive formats.
    ///
    /// # Errors
    ///
    /// Returns [`TvError::Validation`] when no format matches.
    pub fn parse(text: &str) -> Result<Self> {
        if let Ok(aware) = DateTime::parse_from_rfc3339(text) {
            return Ok(RawTimestamp::Aware(aware));
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
            .map(RawTimestamp::Naive)
            .ok_or_else(|| TvError::Validation(format!("unrecognised timestamp {text:?}")))
    }
}

/// Resolves an IANA zone name such as `America/New_York`.
///
/// # Errors
///
/// Returns [`TvError::Validation`] for unknown names.
pub fn parse_tz(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|e| TvError::Validation(format!("unknown timezone {name:?}: {e}")))
}

/// Converts `raw` into `tz`.
///
/// # Errors
///
/// Returns [`TvError::Validation`] if an epoch value is out of range.
pub fn normalize(raw: &RawTimestamp, tz: &Tz) -> Result<DateTime<Tz>> {
    let utc = match raw {
        RawTimestamp::Epoch(secs) => DateTime::<Utc>::from_timestamp(*secs, 0)
            .ok_or_else(|| TvError::Validation(format!("epoch {secs} out of range")))?,
        RawTimestamp::Naive(naive) => Utc.from_utc_datetime(naive),
        RawTimestamp::Aware(aware) => return Ok(aware.with_timezone(tz)),
    };
    Ok(utc.with_timezone(tz))
}
