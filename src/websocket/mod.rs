//! Async WebSocket transport for the TradingView data service.
//!
//! This module is organized by layer:
//! - [`connection`] - Framed command sending, keepalive echo and inbound demultiplexing
//! - [`quote`] - Quote session reader (snapshot and push mode)
//! - [`chart`] - Bar series reader with study chunking
//!
//! The physical socket sits behind the [`Transport`] trait so the readers
//! can be driven by any text-message stream.

pub mod chart;
pub mod connection;
pub mod quote;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use tungstenite::Message;
use tungstenite::client::IntoClientRequest;
use tungstenite::http::HeaderValue;
use tungstenite::http::header::ORIGIN;

use crate::Result;
use crate::config::TradingViewConfig;
use crate::error::TvError;

pub use chart::{ChartRequest, MAX_STUDIES_PER_SESSION, fetch_chart, fetch_chart_chunked};
pub use connection::Connection;
pub use quote::{Quotes, fetch_quotes, stream_quotes};

/// Write half of a TradingView WebSocket connection.
pub type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Read half of a TradingView WebSocket connection.
pub type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Establishes a WebSocket connection to `url`, sending `origin` as the
/// `Origin` header of the upgrade request.
///
/// # Errors
///
/// Returns a [`TvError`] if the origin is not a valid header value, or if
/// the connection or TLS handshake fails.
pub async fn connect(url: &str, origin: &str) -> Result<(WsWriter, WsReader)> {
    let mut request = url.into_client_request()?;
    let origin = HeaderValue::from_str(origin)
        .map_err(|e| TvError::Config(format!("invalid origin {origin:?}: {e}")))?;
    request.headers_mut().insert(ORIGIN, origin);

    let (ws_stream, _) = connect_async(request).await?;
    info!(url, "WebSocket handshake completed");

    Ok(ws_stream.split())
}

/// A bidirectional stream of text packets.
#[async_trait]
pub trait Transport: Send {
    /// Writes one text packet.
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Reads the next text packet; `None` once the remote has closed.
    async fn recv_text(&mut self) -> Result<Option<String>>;

    async fn close(&mut self) -> Result<()>;
}

/// Opens fresh transports to the data service.
#[async_trait]
pub trait Connector: Send + Sync {
    type Transport: Transport + 'static;

    /// # Errors
    ///
    /// Returns a [`TvError`] if the transport cannot be established.
    async fn open(&self) -> Result<Self::Transport>;
}

/// [`Transport`] over a real WebSocket.
pub struct WsTransport {
    writer: WsWriter,
    reader: WsReader,
}

impl WsTransport {
    pub fn new(writer: WsWriter, reader: WsReader) -> Self {
        Self { writer, reader }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.writer.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn recv_text(&mut self) -> Result<Option<String>> {
        while let Some(msg) = self.reader.next().await {
            match msg? {
                Message::Text(text) => return Ok(Some(text.to_string())),
                Message::Binary(bytes) => {
                    return Ok(Some(String::from_utf8_lossy(&bytes).into_owned()));
                }
                Message::Close(frame) => {
                    debug!(?frame, "Received close frame");
                    return Ok(None);
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
        Ok(None)
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.close().await?;
        Ok(())
    }
}

/// [`Connector`] dialing the configured endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    origin: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            origin: origin.into(),
        }
    }

    pub fn from_config(config: &TradingViewConfig) -> Self {
        Self::new(&config.websocket_url, &config.origin)
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn open(&self) -> Result<WsTransport> {
        let (writer, reader) = connect(&self.url, &self.origin).await?;
        Ok(WsTransport::new(writer, reader))
    }
}

/// Values sent at the start of every session-bearing command sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionAuth {
    pub token: String,
    /// Sent via `set_data_quality` when present, e.g. `"high"`.
    pub data_quality: Option<String>,
}

impl SessionAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            data_quality: None,
        }
    }
}

/// Progress of a reader draining a connection.
#[derive(Debug)]
pub enum ReadState {
    /// More messages are needed.
    AwaitingData,
    /// Every expected series or symbol has completed.
    Completed,
    /// The deadline passed first.
    TimedOut,
    /// The connection or the remote failed.
    Failed(TvError),
}

impl ReadState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReadState::AwaitingData)
    }
}
