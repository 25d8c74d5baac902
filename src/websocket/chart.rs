//! Bar series reader.
//!
//! A chart session resolves one symbol, creates the primary OHLCV series
//! and attaches up to [`MAX_STUDIES_PER_SESSION`] studies to it. Points are
//! collected per series until every series has sent its completion marker,
//! then joined by timestamp into a [`SeriesFrame`].

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, trace};

use super::{Connection, ReadState, SessionAuth, Transport};
use crate::Result;
use crate::error::TvError;
use crate::models::series::{Adjustment, DataPoint};
use crate::models::study::Study;
use crate::models::{Command, ServerMessage};
use crate::session::{SessionId, SessionRegistry, SessionRole};
use crate::table::{BAR_COLUMNS, SeriesFrame};

/// Studies the service accepts on one chart session.
pub const MAX_STUDIES_PER_SESSION: usize = 3;

/// Id of the primary series inside every chart session.
pub const PRIMARY_SERIES: &str = "s_ohlcv";

const SYMBOL_REF: &str = "sds_sym_1";

/// Parameters shared by every chart session of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartRequest {
    /// Resolution such as `1D`, `60` or `1W`.
    pub interval: String,
    /// Bars asked from the server, sent as-is.
    pub bars: u32,
    pub studies: Vec<Study>,
    pub adjustment: Adjustment,
    pub currency: String,
    /// Deadline for one chart session.
    pub timeout: Duration,
}

impl ChartRequest {
    pub fn new(interval: impl Into<String>, bars: u32) -> Self {
        Self {
            interval: interval.into(),
            bars,
            studies: Vec::new(),
            adjustment: Adjustment::default(),
            currency: "USD".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Fetches bars for `symbol` with every study of `request`, spreading the
/// studies over as many sequential sessions on `conn` as needed.
///
/// Chunk results are joined on the timestamp; columns already present from
/// an earlier chunk (such as the bar columns) are not repeated.
///
/// # Errors
///
/// Returns the first error of any chunk; see [`fetch_chart`].
pub async fn fetch_chart_chunked<T: Transport>(
    conn: &mut Connection<T>,
    auth: &SessionAuth,
    symbol: &str,
    request: &ChartRequest,
) -> Result<SeriesFrame> {
    if request.studies.len() <= MAX_STUDIES_PER_SESSION {
        return fetch_chart(conn, auth, symbol, request, &request.studies).await;
    }

    let mut joined: Option<SeriesFrame> = None;
    for (n, chunk) in request.studies.chunks(MAX_STUDIES_PER_SESSION).enumerate() {
        debug!(symbol, chunk = n + 1, studies = chunk.len(), "Fetching study chunk");
        let frame = fetch_chart(conn, auth, symbol, request, chunk).await?;
        match joined.as_mut() {
            Some(joined) => joined.join(frame),
            None => joined = Some(frame),
        }
    }

    Ok(joined.unwrap_or_default())
}

/// Runs one chart session for `symbol` with the given `studies`.
///
/// # Errors
///
/// - [`TvError::Validation`] if more than [`MAX_STUDIES_PER_SESSION`] studies are passed
/// - [`TvError::Timeout`] if a series is still incomplete after `request.timeout`
/// - [`TvError::Protocol`] if the remote reports an error
/// - [`TvError::ConnectionClosed`] / [`TvError::WebSocket`] on transport loss
pub async fn fetch_chart<T: Transport>(
    conn: &mut Connection<T>,
    auth: &SessionAuth,
    symbol: &str,
    request: &ChartRequest,
    studies: &[Study],
) -> Result<SeriesFrame> {
    if studies.len() > MAX_STUDIES_PER_SESSION {
        return Err(TvError::Validation(format!(
            "at most {MAX_STUDIES_PER_SESSION} studies per chart session, got {}",
            studies.len()
        )));
    }

    let deadline = Instant::now() + request.timeout;
    let session = open_session(conn, auth, symbol, request, studies).await?;

    let mut collected: HashMap<String, Vec<DataPoint>> = HashMap::new();
    let state = conn
        .drain(Some(deadline), |registry, message| {
            apply(registry, &session, message, &mut collected)
        })
        .await;

    let pending = conn.sessions().pending(&session);
    conn.sessions_mut().close(&session);

    match state {
        ReadState::Completed => {
            conn.send(&Command::ChartDeleteSession { session }).await?;
        }
        ReadState::TimedOut => {
            return Err(TvError::Timeout {
                what: format!(
                    "chart session for {symbol} (pending: {})",
                    pending.join(", ")
                ),
                limit: request.timeout,
            });
        }
        ReadState::Failed(e) => return Err(e),
        ReadState::AwaitingData => return Err(TvError::ConnectionClosed),
    }

    let frame = assemble(&mut collected, studies);
    info!(symbol, rows = frame.len(), studies = studies.len(), "Chart session complete");
    Ok(frame)
}

async fn open_session<T: Transport>(
    conn: &mut Connection<T>,
    auth: &SessionAuth,
    symbol: &str,
    request: &ChartRequest,
    studies: &[Study],
) -> Result<SessionId> {
    conn.authenticate(auth).await?;

    let session = conn.sessions_mut().open(SessionRole::Create);
    conn.sessions_mut().register_series(&session, PRIMARY_SERIES);
    for study in studies {
        conn.sessions_mut()
            .register_series(&session, study.series_id());
    }

    conn.send(&Command::ChartCreateSession {
        session: session.clone(),
    })
    .await?;
    conn.send(&Command::ResolveSymbol {
        session: session.clone(),
        symbol_ref: SYMBOL_REF.to_string(),
        symbol: symbol.to_string(),
        adjustment: request.adjustment,
        currency: request.currency.clone(),
    })
    .await?;
    conn.send(&Command::CreateSeries {
        session: session.clone(),
        series_id: PRIMARY_SERIES.to_string(),
        series_number: "s1".to_string(),
        symbol_ref: SYMBOL_REF.to_string(),
        interval: request.interval.clone(),
        bars: request.bars,
    })
    .await?;

    for (n, study) in studies.iter().enumerate() {
        conn.send(&Command::CreateStudy {
            session: session.clone(),
            study_id: study.series_id(),
            study_number: format!("st{}", n + 1),
            parent_series: PRIMARY_SERIES.to_string(),
            study: study.clone(),
        })
        .await?;
    }

    debug!(%session, symbol, interval = %request.interval, bars = request.bars, "Chart session opened");
    Ok(session)
}

fn apply(
    registry: &mut SessionRegistry,
    session: &SessionId,
    message: ServerMessage,
    collected: &mut HashMap<String, Vec<DataPoint>>,
) -> ReadState {
    if message.session() != Some(session.as_str()) {
        trace!(?message, "Message for another session");
        return ReadState::AwaitingData;
    }

    match message {
        ServerMessage::SeriesData { updates, .. } => {
            for update in updates {
                let points = collected.entry(update.series_id).or_default();
                // Index 0 and below are placeholders, not bars.
                points.extend(update.points.into_iter().filter(|p| p.index > 0));
            }
        }
        ServerMessage::SeriesCompleted { series_id, .. }
        | ServerMessage::StudyCompleted {
            study_id: series_id,
            ..
        } => {
            if registry.mark_completed(session.as_str(), &series_id) {
                debug!(%session, %series_id, "Series completed");
            }
            if registry.is_complete(session) {
                return ReadState::Completed;
            }
        }
        ServerMessage::SymbolResolved { info, .. } => {
            let name = info.get("pro_name").and_then(|v| v.as_str()).unwrap_or_default();
            debug!(%session, pro_name = name, "Symbol resolved");
        }
        other => trace!(?other, "Unhandled chart session message"),
    }

    ReadState::AwaitingData
}

/// Joins the collected points of every series by timestamp.
fn assemble(collected: &mut HashMap<String, Vec<DataPoint>>, studies: &[Study]) -> SeriesFrame {
    let mut frame = SeriesFrame::new(BAR_COLUMNS.iter().map(|c| c.to_string()).collect());

    for point in collected.remove(PRIMARY_SERIES).unwrap_or_default() {
        let Some(timestamp) = point.timestamp() else {
            continue;
        };
        let mut values: Vec<Option<f64>> = point.values.into_iter().skip(1).collect();
        values.resize(BAR_COLUMNS.len(), None);
        if values[4].is_none() {
            values[4] = Some(0.0);
        }
        frame.insert_first(timestamp, values);
    }

    for study in studies {
        let points = collected.remove(&study.series_id()).unwrap_or_default();
        let width = points
            .iter()
            .map(|p| p.values.len().saturating_sub(1))
            .max()
            .unwrap_or(0)
            .max(1);

        let mut study_frame = SeriesFrame::new(study.column_names(width));
        for point in points {
            if let Some(timestamp) = point.timestamp() {
                study_frame.insert_first(timestamp, point.values.into_iter().skip(1).collect());
            }
        }
        frame.join(study_frame);
    }

    frame
}
