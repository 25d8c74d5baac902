//! Quote session reader.
//!
//! A quote session is created, optionally restricted to a field list, and
//! then fed one `quote_add_symbols` per symbol. The remote answers with
//! partial `qsd` updates that are deep-merged per symbol, followed by a
//! `quote_completed` marker once the initial snapshot of a symbol is sent.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, trace};

use super::{Connection, ReadState, SessionAuth, Transport};
use crate::Result;
use crate::error::TvError;
use crate::models::quote::{QuoteSnapshot, QuoteUpdate};
use crate::models::{Command, QuoteData, ServerMessage};
use crate::session::{SessionId, SessionRegistry, SessionRole};

/// Time allowed per requested symbol before a snapshot request fails.
pub const QUOTE_TIMEOUT_PER_SYMBOL: Duration = Duration::from_secs(3);

/// Final snapshots keyed by symbol.
pub type Quotes = BTreeMap<String, QuoteSnapshot>;

/// Fetches one snapshot per symbol.
///
/// Waits until every symbol has reported `quote_completed`, for at most
/// [`QUOTE_TIMEOUT_PER_SYMBOL`] times the number of symbols, measured from
/// the start of the call. An empty `fields` list requests every field.
///
/// # Errors
///
/// - [`TvError::Validation`] if `symbols` is empty
/// - [`TvError::Timeout`] if a symbol never completes
/// - [`TvError::Protocol`] if the remote reports an error
/// - [`TvError::ConnectionClosed`] / [`TvError::WebSocket`] on transport loss
pub async fn fetch_quotes<T: Transport>(
    conn: &mut Connection<T>,
    auth: &SessionAuth,
    symbols: &[String],
    fields: &[String],
) -> Result<Quotes> {
    if symbols.is_empty() {
        return Err(TvError::Validation("no symbols requested".into()));
    }

    let limit = QUOTE_TIMEOUT_PER_SYMBOL * symbols.len() as u32;
    let deadline = Instant::now() + limit;

    let session = open_session(conn, auth, SessionRole::Create, symbols, fields).await?;
    for symbol in symbols {
        conn.sessions_mut().register_series(&session, symbol.as_str());
    }

    let mut quotes: Quotes = symbols
        .iter()
        .map(|symbol| (symbol.clone(), QuoteSnapshot::new()))
        .collect();

    let state = conn
        .drain(Some(deadline), |registry, message| {
            apply(registry, &session, message, |data| {
                if let Some(snapshot) = quotes.get_mut(&data.symbol) {
                    snapshot.merge(data.values);
                } else {
                    trace!(symbol = %data.symbol, "Ignoring unrequested symbol");
                }
            })
        })
        .await;

    let pending = conn.sessions().pending(&session);
    conn.sessions_mut().close(&session);

    match state {
        ReadState::Completed => {
            conn.send(&Command::QuoteDeleteSession { session }).await?;
            info!(symbols = quotes.len(), "Quote snapshot complete");
            Ok(quotes)
        }
        ReadState::TimedOut => Err(TvError::Timeout {
            what: format!("quote session {session} (pending: {})", pending.join(", ")),
            limit,
        }),
        ReadState::Failed(e) => Err(e),
        ReadState::AwaitingData => Err(TvError::ConnectionClosed),
    }
}

/// Subscribes to `symbols` and forwards every merged update to `on_update`.
///
/// Runs until the connection fails; the returned error is the reason.
/// Reconnecting is the caller's decision.
///
/// # Errors
///
/// Always returns the error that ended the stream.
pub async fn stream_quotes<T, F>(
    conn: &mut Connection<T>,
    auth: &SessionAuth,
    symbols: &[String],
    fields: &[String],
    mut on_update: F,
) -> Result<Infallible>
where
    T: Transport,
    F: FnMut(&QuoteUpdate),
{
    if symbols.is_empty() {
        return Err(TvError::Validation("no symbols requested".into()));
    }

    let session = open_session(conn, auth, SessionRole::Subscribe, symbols, fields).await?;
    info!(%session, symbols = symbols.len(), "Streaming quotes");

    let mut snapshots: BTreeMap<String, QuoteSnapshot> = BTreeMap::new();

    let state = conn
        .drain(None, |registry, message| {
            apply(registry, &session, message, |data| {
                let snapshot = snapshots.entry(data.symbol.clone()).or_default();
                snapshot.merge(data.values.clone());
                on_update(&QuoteUpdate {
                    symbol: data.symbol,
                    changed: data.values,
                    snapshot: snapshot.clone(),
                });
            })
        })
        .await;

    conn.sessions_mut().close(&session);

    match state {
        ReadState::Failed(e) => Err(e),
        _ => Err(TvError::ConnectionClosed),
    }
}

async fn open_session<T: Transport>(
    conn: &mut Connection<T>,
    auth: &SessionAuth,
    role: SessionRole,
    symbols: &[String],
    fields: &[String],
) -> Result<SessionId> {
    conn.authenticate(auth).await?;

    let session = conn.sessions_mut().open(role);
    conn.send(&Command::QuoteCreateSession {
        session: session.clone(),
    })
    .await?;

    if !fields.is_empty() {
        conn.send(&Command::QuoteSetFields {
            session: session.clone(),
            fields: fields.to_vec(),
        })
        .await?;
    }

    for symbol in symbols {
        conn.send(&Command::QuoteAddSymbols {
            session: session.clone(),
            symbol: symbol.clone(),
        })
        .await?;
    }

    debug!(%session, symbols = symbols.len(), "Quote session opened");
    Ok(session)
}

/// Handles one message addressed to a quote session. Usable `qsd` data is
/// passed to `on_data`; completion markers are recorded in `registry`.
fn apply(
    registry: &mut SessionRegistry,
    session: &SessionId,
    message: ServerMessage,
    on_data: impl FnOnce(QuoteData),
) -> ReadState {
    if message.session() != Some(session.as_str()) {
        trace!(?message, "Message for another session");
        return ReadState::AwaitingData;
    }

    match message {
        ServerMessage::QuoteData(data) if data.is_ok() => on_data(data),
        ServerMessage::QuoteData(data) => {
            debug!(symbol = %data.symbol, status = %data.status, "Skipping quote data");
        }
        ServerMessage::QuoteCompleted { symbol, .. } => {
            if registry.mark_completed(session.as_str(), &symbol) && registry.is_complete(session)
            {
                return ReadState::Completed;
            }
        }
        other => trace!(?other, "Unhandled quote session message"),
    }

    ReadState::AwaitingData
}
