//! TradingView WebSocket client library.
//!
//! Provides the wire codec, typed protocol messages and async readers for
//! quote snapshots, streaming quotes and OHLCV bar history with attached
//! studies, plus a [`TradingView`] client that fans multi-symbol requests
//! out over a bounded pool of connections.

pub mod auth;
pub mod client;
pub mod codec;
pub mod config;
pub mod credentials;
pub mod error;
pub mod models;
pub mod session;
pub mod table;
pub mod timezone;
pub mod websocket;

pub use client::{OhlcvRequest, RetryPolicy, TradingView};
pub use error::{Result, TvError};
