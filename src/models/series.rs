//! Bar and study payloads pushed on chart sessions.

use serde_json::Value;

/// Server-side price adjustment applied to historical series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Adjustment {
    Splits,
    #[default]
    Dividends,
}

impl Adjustment {
    /// Returns the wire-format adjustment name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Adjustment::Splits => "splits",
            Adjustment::Dividends => "dividends",
        }
    }
}

/// Whether a series update carries primary bars or study values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesKind {
    /// `"s"` array: `[timestamp, open, high, low, close, volume?]`.
    Bars,
    /// `"st"` array: `[timestamp, value...]`.
    Study,
}

/// One indexed point of a series, `{"i": <index>, "v": [...]}` on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    pub index: i64,
    /// Numeric cells in wire order; the first is the epoch timestamp.
    pub values: Vec<Option<f64>>,
}

impl DataPoint {
    fn from_value(value: &Value) -> Option<Self> {
        let index = value.get("i")?.as_i64()?;
        let values = value
            .get("v")?
            .as_array()?
            .iter()
            .map(Value::as_f64)
            .collect();
        Some(Self { index, values })
    }

    /// Epoch seconds of this point.
    pub fn timestamp(&self) -> Option<i64> {
        self.values.first().copied().flatten().map(|ts| ts as i64)
    }
}

/// Points for one named series inside a `timescale_update` / `du` message.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesUpdate {
    pub series_id: String,
    pub kind: SeriesKind,
    pub points: Vec<DataPoint>,
}

impl SeriesUpdate {
    /// Parses the object stored under `series_id`.
    ///
    /// Returns `None` when the payload carries neither an `"s"` nor an
    /// `"st"` array (node metadata, index shifts and the like).
    pub fn from_payload(series_id: &str, payload: &Value) -> Option<Self> {
        let (kind, raw) = match (payload.get("s"), payload.get("st")) {
            (Some(raw), _) => (SeriesKind::Bars, raw),
            (None, Some(raw)) => (SeriesKind::Study, raw),
            (None, None) => return None,
        };

        let points = raw
            .as_array()?
            .iter()
            .filter_map(DataPoint::from_value)
            .collect();

        Some(Self {
            series_id: series_id.to_string(),
            kind,
            points,
        })
    }
}
