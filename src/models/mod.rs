//! Typed protocol messages.
//!
//! Outbound traffic is modelled by [`Command`], inbound traffic by
//! [`ServerMessage`]. Inbound envelopes are routed through a dispatch table
//! keyed by their `"m"` field; names without an entry (or whose parameters
//! do not have the expected shape) are kept as [`ServerMessage::Other`].

pub mod quote;
pub mod series;
pub mod study;

use serde_json::{Map, Value, json};

use crate::Result;
use crate::codec::{self, Envelope};
use crate::session::SessionId;
use series::{Adjustment, SeriesUpdate};
use study::Study;

/// A command sent to the data service.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetAuthToken {
        token: String,
    },
    SetDataQuality {
        quality: String,
    },
    QuoteCreateSession {
        session: SessionId,
    },
    QuoteSetFields {
        session: SessionId,
        fields: Vec<String>,
    },
    QuoteAddSymbols {
        session: SessionId,
        symbol: String,
    },
    QuoteDeleteSession {
        session: SessionId,
    },
    ChartCreateSession {
        session: SessionId,
    },
    ChartDeleteSession {
        session: SessionId,
    },
    /// Binds `symbol_ref` inside the chart session to an instrument.
    ResolveSymbol {
        session: SessionId,
        symbol_ref: String,
        symbol: String,
        adjustment: Adjustment,
        currency: String,
    },
    /// Requests `bars` historical bars of the primary OHLCV series.
    CreateSeries {
        session: SessionId,
        series_id: String,
        series_number: String,
        symbol_ref: String,
        interval: String,
        bars: u32,
    },
    /// Attaches a derived indicator to an existing series.
    CreateStudy {
        session: SessionId,
        study_id: String,
        study_number: String,
        parent_series: String,
        study: Study,
    },
}

impl Command {
    /// Returns the wire-format command name.
    pub fn name(&self) -> &'static str {
        match self {
            Command::SetAuthToken { .. } => "set_auth_token",
            Command::SetDataQuality { .. } => "set_data_quality",
            Command::QuoteCreateSession { .. } => "quote_create_session",
            Command::QuoteSetFields { .. } => "quote_set_fields",
            Command::QuoteAddSymbols { .. } => "quote_add_symbols",
            Command::QuoteDeleteSession { .. } => "quote_delete_session",
            Command::ChartCreateSession { .. } => "chart_create_session",
            Command::ChartDeleteSession { .. } => "chart_delete_session",
            Command::ResolveSymbol { .. } => "resolve_symbol",
            Command::CreateSeries { .. } => "create_series",
            Command::CreateStudy { .. } => "create_study",
        }
    }

    /// Builds the positional `"p"` array for this command.
    ///
    /// # Errors
    ///
    /// Returns [`TvError::Json`](crate::TvError::Json) if the embedded
    /// symbol descriptor of a `resolve_symbol` cannot be serialized.
    pub fn params(&self) -> Result<Vec<Value>> {
        let params = match self {
            Command::SetAuthToken { token } => vec![json!(token)],
            Command::SetDataQuality { quality } => vec![json!(quality)],
            Command::QuoteCreateSession { session }
            | Command::QuoteDeleteSession { session }
            | Command::ChartDeleteSession { session } => vec![json!(session.as_str())],
            Command::QuoteSetFields { session, fields } => std::iter::once(json!(session.as_str()))
                .chain(fields.iter().map(|f| json!(f)))
                .collect(),
            Command::QuoteAddSymbols { session, symbol } => {
                vec![json!(session.as_str()), json!(symbol)]
            }
            Command::ChartCreateSession { session } => vec![json!(session.as_str()), json!("")],
            Command::ResolveSymbol {
                session,
                symbol_ref,
                symbol,
                adjustment,
                currency,
            } => {
                let descriptor = codec::to_ascii_json(&json!({
                    "adjustment": adjustment.as_str(),
                    "currency-id": currency,
                    "symbol": symbol,
                }))?;
                vec![
                    json!(session.as_str()),
                    json!(symbol_ref),
                    json!(format!("={descriptor}")),
                ]
            }
            Command::CreateSeries {
                session,
                series_id,
                series_number,
                symbol_ref,
                interval,
                bars,
            } => vec![
                json!(session.as_str()),
                json!(series_id),
                json!(series_number),
                json!(symbol_ref),
                json!(interval),
                json!(bars),
                json!(""),
            ],
            Command::CreateStudy {
                session,
                study_id,
                study_number,
                parent_series,
                study,
            } => vec![
                json!(session.as_str()),
                json!(study_id),
                json!(study_number),
                json!(parent_series),
                json!(study.script_id),
                study.settings.clone(),
            ],
        };
        Ok(params)
    }

    /// Encodes this command as a single wire frame.
    ///
    /// # Errors
    ///
    /// Returns [`TvError::Json`](crate::TvError::Json) if serialization fails.
    pub fn to_frame(&self) -> Result<String> {
        codec::encode(self.name(), &self.params()?)
    }
}

/// Partial field update for one symbol of a quote session (`qsd`).
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteData {
    pub session: String,
    pub symbol: String,
    /// `"ok"` when the values are usable.
    pub status: String,
    pub values: Map<String, Value>,
}

impl QuoteData {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// A message received from the data service.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// `qsd`: quote symbol data.
    QuoteData(QuoteData),
    /// `quote_completed`: the initial snapshot for `symbol` is complete.
    QuoteCompleted { session: String, symbol: String },
    /// `symbol_resolved`: instrument metadata for a chart session.
    SymbolResolved {
        session: String,
        symbol_ref: String,
        info: Value,
    },
    /// `timescale_update` / `du`: bars or study points for one or more series.
    SeriesData {
        session: String,
        updates: Vec<SeriesUpdate>,
    },
    /// `series_completed`: the primary series finished loading.
    SeriesCompleted { session: String, series_id: String },
    /// `study_completed`: a study finished loading.
    StudyCompleted { session: String, study_id: String },
    /// Any other message, kept verbatim.
    Other { name: String, params: Vec<Value> },
}

type Parser = fn(&[Value]) -> Option<ServerMessage>;

/// Inbound message names and their parsers.
const DISPATCH: &[(&str, Parser)] = &[
    ("qsd", parse_quote_data),
    ("quote_completed", parse_quote_completed),
    ("symbol_resolved", parse_symbol_resolved),
    ("timescale_update", parse_series_data),
    ("du", parse_series_data),
    ("series_completed", parse_series_completed),
    ("study_completed", parse_study_completed),
];

impl ServerMessage {
    /// Routes a raw envelope through the dispatch table.
    pub fn from_envelope(envelope: Envelope) -> Self {
        let parsed = DISPATCH
            .iter()
            .find(|(name, _)| *name == envelope.m)
            .and_then(|(_, parse)| parse(&envelope.p));

        parsed.unwrap_or(ServerMessage::Other {
            name: envelope.m,
            params: envelope.p,
        })
    }

    /// Returns the session id this message belongs to, if any.
    pub fn session(&self) -> Option<&str> {
        match self {
            ServerMessage::QuoteData(data) => Some(&data.session),
            ServerMessage::QuoteCompleted { session, .. }
            | ServerMessage::SymbolResolved { session, .. }
            | ServerMessage::SeriesData { session, .. }
            | ServerMessage::SeriesCompleted { session, .. }
            | ServerMessage::StudyCompleted { session, .. } => Some(session),
            ServerMessage::Other { params, .. } => params.first().and_then(Value::as_str),
        }
    }
}

fn str_at(params: &[Value], index: usize) -> Option<String> {
    params.get(index).and_then(Value::as_str).map(String::from)
}

fn parse_quote_data(params: &[Value]) -> Option<ServerMessage> {
    let session = str_at(params, 0)?;
    let body = params.get(1)?.as_object()?;

    Some(ServerMessage::QuoteData(QuoteData {
        session,
        symbol: body.get("n")?.as_str()?.to_string(),
        status: body
            .get("s")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        values: body
            .get("v")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
    }))
}

fn parse_quote_completed(params: &[Value]) -> Option<ServerMessage> {
    Some(ServerMessage::QuoteCompleted {
        session: str_at(params, 0)?,
        symbol: str_at(params, 1)?,
    })
}

fn parse_symbol_resolved(params: &[Value]) -> Option<ServerMessage> {
    Some(ServerMessage::SymbolResolved {
        session: str_at(params, 0)?,
        symbol_ref: str_at(params, 1)?,
        info: params.get(2).cloned().unwrap_or(Value::Null),
    })
}

fn parse_series_data(params: &[Value]) -> Option<ServerMessage> {
    let session = str_at(params, 0)?;
    let body = params.get(1)?.as_object()?;

    let updates = body
        .iter()
        .filter_map(|(series_id, payload)| SeriesUpdate::from_payload(series_id, payload))
        .collect();

    Some(ServerMessage::SeriesData { session, updates })
}

fn parse_series_completed(params: &[Value]) -> Option<ServerMessage> {
    Some(ServerMessage::SeriesCompleted {
        session: str_at(params, 0)?,
        series_id: str_at(params, 1)?,
    })
}

fn parse_study_completed(params: &[Value]) -> Option<ServerMessage> {
    Some(ServerMessage::StudyCompleted {
        session: str_at(params, 0)?,
        study_id: str_at(params, 1)?,
    })
}
