//! Shared test utilities: an in-memory data service and packet builders.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use tvfeed::auth::TokenCache;
use tvfeed::codec::{self, Envelope};
use tvfeed::websocket::{Connector, Transport};
use tvfeed::{Result, TradingView};

/// TradingView data endpoint used by live tests.
pub const TRADINGVIEW_WS_URL: &str = tvfeed::config::DEFAULT_WEBSOCKET_URL;

/// Origin header used by live tests.
pub const TRADINGVIEW_ORIGIN: &str = tvfeed::config::DEFAULT_ORIGIN;

/// Builds the packets the fake service answers a command with. Receives the
/// 1-based number of the connection the command arrived on.
pub type Responder = dyn Fn(usize, &Envelope) -> Vec<String> + Send + Sync;

/// What a fake connection does once every queued packet has been read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhenDrained {
    /// Block forever, like an idle socket.
    Hang,
    /// Report the socket as closed.
    Close,
}

/// Everything written by the client, per connection.
#[derive(Debug, Default)]
pub struct SentLog {
    frames: Mutex<Vec<(usize, String)>>,
}

impl SentLog {
    /// Decoded commands in send order, keepalive echoes excluded.
    pub fn commands(&self) -> Vec<(usize, Envelope)> {
        let frames = self.frames.lock().unwrap();
        frames
            .iter()
            .flat_map(|(conn, text)| {
                codec::split_frames(text)
                    .into_iter()
                    .filter_map(|payload| serde_json::from_str::<Envelope>(payload).ok())
                    .map(|envelope| (*conn, envelope))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Commands named `name`, in send order.
    pub fn named(&self, name: &str) -> Vec<Envelope> {
        self.commands()
            .into_iter()
            .filter(|(_, envelope)| envelope.m == name)
            .map(|(_, envelope)| envelope)
            .collect()
    }

    /// Raw frames in send order.
    pub fn raw(&self) -> Vec<String> {
        let frames = self.frames.lock().unwrap();
        frames.iter().map(|(_, text)| text.clone()).collect()
    }
}

pub struct FakeTransport {
    conn: usize,
    inbound: VecDeque<String>,
    responder: Arc<Responder>,
    when_drained: WhenDrained,
    sent: Arc<SentLog>,
    live: Arc<AtomicUsize>,
}

impl Drop for FakeTransport {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send_text(&mut self, text: String) -> Result<()> {
        for payload in codec::split_frames(&text) {
            if let Ok(envelope) = serde_json::from_str::<Envelope>(payload) {
                self.inbound.extend((self.responder)(self.conn, &envelope));
            }
        }
        self.sent.frames.lock().unwrap().push((self.conn, text));
        Ok(())
    }

    async fn recv_text(&mut self) -> Result<Option<String>> {
        if let Some(packet) = self.inbound.pop_front() {
            // Hand control back like a real socket read would, so other
            // connections make progress in between.
            tokio::task::yield_now().await;
            return Ok(Some(packet));
        }
        match self.when_drained {
            WhenDrained::Close => Ok(None),
            WhenDrained::Hang => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Connector handing out scripted in-memory connections.
pub struct FakeConnector {
    responder: Arc<Responder>,
    when_drained: WhenDrained,
    greeting: Vec<String>,
    pub opened: AtomicUsize,
    pub opened_at: Mutex<Vec<tokio::time::Instant>>,
    pub sent: Arc<SentLog>,
    live: Arc<AtomicUsize>,
    peak_live: AtomicUsize,
}

impl FakeConnector {
    pub fn new<F>(when_drained: WhenDrained, responder: F) -> Self
    where
        F: Fn(usize, &Envelope) -> Vec<String> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            when_drained,
            greeting: vec![codec::frame(
                r#"{"session_id":"<0.123.456>_fake","timestamp":1700000000,"release":"test"}"#,
            )],
            opened: AtomicUsize::new(0),
            opened_at: Mutex::new(Vec::new()),
            sent: Arc::new(SentLog::default()),
            live: Arc::new(AtomicUsize::new(0)),
            peak_live: AtomicUsize::new(0),
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Most transports that were open at the same time.
    pub fn peak_concurrent(&self) -> usize {
        self.peak_live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Transport = FakeTransport;

    async fn open(&self) -> Result<FakeTransport> {
        let conn = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        self.opened_at
            .lock()
            .unwrap()
            .push(tokio::time::Instant::now());
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_live.fetch_max(live, Ordering::SeqCst);
        Ok(FakeTransport {
            conn,
            inbound: self.greeting.iter().cloned().collect(),
            responder: self.responder.clone(),
            when_drained: self.when_drained,
            sent: self.sent.clone(),
            live: self.live.clone(),
        })
    }
}

/// Anonymous client over `connector`.
pub fn client(connector: FakeConnector) -> TradingView<FakeConnector> {
    TradingView::new(connector, TokenCache::anonymous())
}

// Packet builders.

pub fn packet(name: &str, params: Value) -> String {
    let params = params.as_array().cloned().unwrap_or_default();
    codec::encode(name, &params).unwrap()
}

pub fn session_of(envelope: &Envelope) -> String {
    envelope.p[0].as_str().unwrap().to_string()
}

pub fn qsd(session: &str, symbol: &str, values: Value) -> String {
    packet("qsd", json!([session, {"n": symbol, "s": "ok", "v": values}]))
}

pub fn quote_completed(session: &str, symbol: &str) -> String {
    packet("quote_completed", json!([session, symbol]))
}

/// A primary-series update; each bar is `[ts, open, high, low, close, volume]`.
/// Indices start at 1.
pub fn bars(session: &str, series_id: &str, rows: &[[f64; 6]]) -> String {
    let points: Vec<Value> = rows
        .iter()
        .enumerate()
        .map(|(i, row)| json!({"i": i + 1, "v": row}))
        .collect();
    packet(
        "timescale_update",
        json!([session, {series_id: {"node": "fake", "s": points}}]),
    )
}

/// A study update; each row is `[ts, value...]`.
pub fn study_points(session: &str, study_id: &str, rows: &[Vec<f64>]) -> String {
    let points: Vec<Value> = rows
        .iter()
        .enumerate()
        .map(|(i, row)| json!({"i": i + 1, "v": row}))
        .collect();
    packet("du", json!([session, {study_id: {"st": points}}]))
}

pub fn series_completed(session: &str, series_id: &str) -> String {
    packet("series_completed", json!([session, series_id, "streaming"]))
}

pub fn study_completed(session: &str, study_id: &str) -> String {
    packet("study_completed", json!([session, study_id]))
}

/// Symbol embedded in a `resolve_symbol` descriptor.
pub fn resolved_symbol(envelope: &Envelope) -> String {
    let descriptor = envelope.p[2].as_str().unwrap().trim_start_matches('=');
    let descriptor: Value = serde_json::from_str(descriptor).unwrap();
    descriptor["symbol"].as_str().unwrap().to_string()
}

/// Daily bars `[ts, o, h, l, c, v]` starting at `start`.
pub fn daily_bars(start: i64, closes: &[f64]) -> Vec<[f64; 6]> {
    closes
        .iter()
        .enumerate()
        .map(|(i, close)| {
            let ts = (start + i as i64 * 86_400) as f64;
            [ts, close - 1.0, close + 1.0, close - 2.0, *close, 1_000.0]
        })
        .collect()
}

/// A responder behaving like the chart service.
///
/// Bars come from `source(symbol)`; every study gets one point per bar
/// whose value is the close plus the study's position, three values for
/// band studies.
pub fn chart_service<F>(source: F) -> impl Fn(usize, &Envelope) -> Vec<String> + Send + Sync + 'static
where
    F: Fn(&str) -> Vec<[f64; 6]> + Send + Sync + 'static,
{
    let resolved: Mutex<HashMap<String, String>> = Mutex::new(HashMap::new());

    move |_conn: usize, envelope: &Envelope| -> Vec<String> {
        match envelope.m.as_str() {
            "resolve_symbol" => {
                let session = session_of(envelope);
                let symbol = resolved_symbol(envelope);
                resolved.lock().unwrap().insert(session.clone(), symbol.clone());
                vec![packet(
                    "symbol_resolved",
                    json!([session, "sds_sym_1", {"pro_name": symbol}]),
                )]
            }
            "create_series" => {
                let session = session_of(envelope);
                let series_id = envelope.p[1].as_str().unwrap();
                let symbol = resolved.lock().unwrap()[&session].clone();
                vec![
                    bars(&session, series_id, &source(&symbol)),
                    series_completed(&session, series_id),
                ]
            }
            "create_study" => {
                let session = session_of(envelope);
                let study_id = envelope.p[1].as_str().unwrap();
                let offset: f64 = envelope.p[2]
                    .as_str()
                    .unwrap()
                    .trim_start_matches("st")
                    .parse()
                    .unwrap();
                let symbol = resolved.lock().unwrap()[&session].clone();
                let rows: Vec<Vec<f64>> = source(&symbol)
                    .iter()
                    .map(|bar| {
                        let value = bar[4] + offset;
                        if study_id.contains("bbands") {
                            vec![bar[0], value, value + 1.0, value - 1.0]
                        } else {
                            vec![bar[0], value]
                        }
                    })
                    .collect();
                vec![
                    study_points(&session, study_id, &rows),
                    study_completed(&session, study_id),
                ]
            }
            _ => Vec::new(),
        }
    }
}
