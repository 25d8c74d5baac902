//! Tabular results of chart sessions.
//!
//! [`SeriesFrame`] is the per-session working table: one row per epoch
//! second, joined across every series of the session. [`OhlcvTable`] is the
//! finished, symbol-tagged result handed to callers.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::DateTime;
use chrono_tz::Tz;
use serde::Serialize;

use crate::Result;
use crate::timezone::{self, RawTimestamp};

/// Columns of the primary bar series, in wire order after the timestamp.
pub const BAR_COLUMNS: [&str; 5] = ["open", "high", "low", "close", "volume"];

/// Leading columns of every [`OhlcvTable`], indicators follow.
pub const CANONICAL_COLUMNS: [&str; 7] =
    ["Date", "Symbol", "Open", "High", "Low", "Close", "Volume"];

/// Rows keyed by epoch seconds with a fixed set of named float columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesFrame {
    columns: Vec<String>,
    rows: BTreeMap<i64, Vec<Option<f64>>>,
}

impl SeriesFrame {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: BTreeMap::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Inserts a row unless `timestamp` is already present, so the first
    /// occurrence wins. Short rows are padded with `None`, long rows cut.
    ///
    /// Returns whether the row was inserted.
    pub fn insert_first(&mut self, timestamp: i64, mut values: Vec<Option<f64>>) -> bool {
        if self.rows.contains_key(&timestamp) {
            return false;
        }
        values.resize(self.columns.len(), None);
        self.rows.insert(timestamp, values);
        true
    }

    pub fn get(&self, timestamp: i64) -> Option<&[Option<f64>]> {
        self.rows.get(&timestamp).map(Vec::as_slice)
    }

    /// All values of one column in timestamp order.
    pub fn column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let position = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.values().map(|row| row[position]).collect())
    }

    /// Rows in ascending timestamp order.
    pub fn rows(&self) -> impl Iterator<Item = (i64, &[Option<f64>])> {
        self.rows.iter().map(|(ts, row)| (*ts, row.as_slice()))
    }

    /// Outer-joins `other` on the timestamp. Columns that already exist
    /// here are dropped from `other`; cells missing on either side are `None`.
    pub fn join(&mut self, other: SeriesFrame) {
        let taken: Vec<usize> = other
            .columns
            .iter()
            .enumerate()
            .filter(|(_, name)| !self.columns.contains(name))
            .map(|(i, _)| i)
            .collect();
        if taken.is_empty() {
            return;
        }

        let width = self.columns.len();
        self.columns
            .extend(taken.iter().map(|&i| other.columns[i].clone()));

        for row in self.rows.values_mut() {
            row.resize(width + taken.len(), None);
        }

        for (timestamp, values) in other.rows {
            let row = self
                .rows
                .entry(timestamp)
                .or_insert_with(|| vec![None; width + taken.len()]);
            for (offset, &i) in taken.iter().enumerate() {
                row[width + offset] = values.get(i).copied().flatten();
            }
        }
    }
}

/// One finished bar of one symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OhlcvRow {
    pub timestamp: DateTime<Tz>,
    pub timestamp_ts: i64,
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    /// Indicator cells aligned with [`OhlcvTable::indicator_columns`].
    pub indicators: Vec<Option<f64>>,
}

/// Bars of one or more symbols, one row per `(timestamp, symbol)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OhlcvTable {
    indicator_columns: Vec<String>,
    rows: Vec<OhlcvRow>,
}

impl OhlcvTable {
    /// A table with no rows but the full column set.
    pub fn empty(indicator_columns: Vec<String>) -> Self {
        Self {
            indicator_columns,
            rows: Vec::new(),
        }
    }

    /// Converts a finished session frame into symbol-tagged rows.
    ///
    /// The first five frame columns are the bar columns; the rest become
    /// indicator columns. Missing prices become `NaN`, missing volume `0`.
    ///
    /// # Errors
    ///
    /// Returns [`TvError::Validation`](crate::TvError::Validation) if a
    /// timestamp cannot be represented.
    pub fn from_frame(symbol: &str, frame: &SeriesFrame, tz: &Tz) -> Result<Self> {
        let indicator_columns = frame
            .columns()
            .iter()
            .skip(BAR_COLUMNS.len())
            .cloned()
            .collect();

        let rows = frame
            .rows()
            .map(|(timestamp_ts, values)| {
                let price = |i: usize| values.get(i).copied().flatten().unwrap_or(f64::NAN);
                Ok(OhlcvRow {
                    timestamp: timezone::normalize(&RawTimestamp::Epoch(timestamp_ts), tz)?,
                    timestamp_ts,
                    symbol: symbol.to_string(),
                    open: price(0),
                    high: price(1),
                    low: price(2),
                    close: price(3),
                    volume: values.get(4).copied().flatten().unwrap_or(0.0) as i64,
                    indicators: values.iter().skip(BAR_COLUMNS.len()).copied().collect(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            indicator_columns,
            rows,
        })
    }

    /// Concatenates per-symbol tables, keeps the first row of every
    /// `(timestamp, symbol)` pair and sorts by timestamp, then symbol.
    ///
    /// Indicator columns are the union of all inputs in order of first
    /// appearance; `fallback_columns` is used when every input is empty.
    pub fn concat(tables: Vec<OhlcvTable>, fallback_columns: Vec<String>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for table in &tables {
            for name in &table.indicator_columns {
                if !columns.contains(name) {
                    columns.push(name.clone());
                }
            }
        }

        let mut seen = HashSet::new();
        let mut rows = Vec::new();
        for table in tables {
            let positions: Vec<usize> = table
                .indicator_columns
                .iter()
                .filter_map(|name| columns.iter().position(|c| c == name))
                .collect();

            for mut row in table.rows {
                if !seen.insert((row.timestamp_ts, row.symbol.clone())) {
                    continue;
                }
                let mut indicators = vec![None; columns.len()];
                for (value, &target) in row.indicators.iter().zip(&positions) {
                    indicators[target] = *value;
                }
                row.indicators = indicators;
                rows.push(row);
            }
        }

        if rows.is_empty() {
            return Self::empty(if columns.is_empty() {
                fallback_columns
            } else {
                columns
            });
        }

        rows.sort_by(|a, b| {
            a.timestamp_ts
                .cmp(&b.timestamp_ts)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });

        Self {
            indicator_columns: columns,
            rows,
        }
    }

    /// Canonical bar columns followed by the indicator columns.
    pub fn columns(&self) -> Vec<String> {
        CANONICAL_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(self.indicator_columns.iter().cloned())
            .collect()
    }

    pub fn indicator_columns(&self) -> &[String] {
        &self.indicator_columns
    }

    pub fn rows(&self) -> &[OhlcvRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<OhlcvRow> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of indicator `name` in `row`.
    pub fn indicator(&self, row: &OhlcvRow, name: &str) -> Option<f64> {
        let position = self.indicator_columns.iter().position(|c| c == name)?;
        row.indicators.get(position).copied().flatten()
    }

    /// Rows belonging to `symbol`.
    pub fn for_symbol<'a>(&'a self, symbol: &'a str) -> impl Iterator<Item = &'a OhlcvRow> {
        self.rows.iter().filter(move |row| row.symbol == symbol)
    }
}

impl fmt::Display for OhlcvTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.columns().join(","))?;
        for row in &self.rows {
            write!(
                f,
                "{},{},{},{},{},{},{}",
                row.timestamp.to_rfc3339(),
                row.symbol,
                row.open,
                row.high,
                row.low,
                row.close,
                row.volume
            )?;
            for value in &row.indicators {
                match value {
                    Some(v) => write!(f, ",{v}")?,
                    None => write!(f, ",")?,
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
