//! Quote snapshots accumulated from partial `qsd` updates.

use chrono::DateTime;
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::timezone::{self, RawTimestamp};

/// Fields requested by push-mode subscriptions when the caller names none.
pub const STREAM_FIELDS: [&str; 5] = ["lp", "ch", "lp_time", "chp", "volume"];

/// Merges `update` into `target`: nested objects merge recursively, every
/// other value overwrites. Keys absent from `update` are never dropped.
pub fn deep_merge(target: &mut Map<String, Value>, update: Map<String, Value>) {
    for (key, value) in update {
        let Value::Object(incoming) = value else {
            target.insert(key, value);
            continue;
        };

        if let Some(Value::Object(existing)) = target.get_mut(&key) {
            deep_merge(existing, incoming);
        } else {
            target.insert(key, Value::Object(incoming));
        }
    }
}

/// The merged set of field values known for one symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct QuoteSnapshot {
    fields: Map<String, Value>,
}

impl QuoteSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deep-merges a partial update into this snapshot.
    pub fn merge(&mut self, update: Map<String, Value>) {
        deep_merge(&mut self.fields, update);
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Last price (`lp`).
    pub fn price(&self) -> Option<f64> {
        self.number("lp")
    }

    /// Absolute change (`ch`).
    pub fn change(&self) -> Option<f64> {
        self.number("ch")
    }

    /// Percent change (`chp`).
    pub fn change_pct(&self) -> Option<f64> {
        self.number("chp")
    }

    pub fn volume(&self) -> Option<f64> {
        self.number("volume")
    }

    /// Epoch seconds of the last price (`lp_time`).
    pub fn timestamp_ts(&self) -> Option<i64> {
        self.timestamp(&Tz::UTC).map(|ts| ts.timestamp())
    }

    /// Time of the last price, converted to `tz`.
    ///
    /// `lp_time` is usually epoch seconds; textual values are parsed, and
    /// only those without an offset are taken as UTC.
    pub fn timestamp(&self, tz: &Tz) -> Option<DateTime<Tz>> {
        let raw = match self.get("lp_time")? {
            Value::String(text) => RawTimestamp::parse(text).ok()?,
            other => RawTimestamp::Epoch(other.as_f64()? as i64),
        };
        timezone::normalize(&raw, tz).ok()
    }

    fn number(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(Value::as_f64)
    }
}

impl From<Map<String, Value>> for QuoteSnapshot {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

/// One push-mode update delivered to a stream callback.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteUpdate {
    pub symbol: String,
    /// Fields carried by this message only.
    pub changed: Map<String, Value>,
    /// Snapshot after the change was merged.
    pub snapshot: QuoteSnapshot,
}
