//! High-level client fanning requests out over independent connections.
//!
//! [`TradingView`] owns the connector, the shared token cache and the pool
//! size. Each symbol of an OHLCV request runs on its own connection; at
//! most `workers` of them are in flight at once. Results are tagged with
//! their symbol and merged into a single [`OhlcvTable`].

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use futures_util::{StreamExt, TryStreamExt, stream};
use tracing::{debug, info, warn};

use crate::Result;
use crate::auth::{CredentialProvider, TokenCache};
use crate::config::TradingViewConfig;
use crate::error::TvError;
use crate::models::quote::{QuoteSnapshot, QuoteUpdate, STREAM_FIELDS};
use crate::models::series::Adjustment;
use crate::models::study::Study;
use crate::table::OhlcvTable;
use crate::websocket::{
    self, ChartRequest, Connection, Connector, Quotes, SessionAuth, WsConnector,
};

/// Wait between reconnect attempts of a quote stream.
pub const STREAM_BACKOFF: Duration = Duration::from_secs(30);

/// Data quality requested by [`TradingView::from_config`].
const HIGH_QUALITY: &str = "high";

/// How a quote stream recovers from transport loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff: Duration,
    /// Consecutive failed attempts before giving up; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: STREAM_BACKOFF,
            max_attempts: None,
        }
    }
}

/// A multi-symbol historical bar request.
#[derive(Debug, Clone, PartialEq)]
pub struct OhlcvRequest {
    pub symbols: Vec<String>,
    pub interval: String,
    /// Bars wanted per symbol.
    pub candles: u32,
    pub studies: Vec<Study>,
    pub adjustment: Adjustment,
    pub currency: String,
    /// Zone of the `timestamp` column of the result.
    pub timezone: Tz,
}

impl OhlcvRequest {
    pub fn new<I, S>(symbols: I, interval: impl Into<String>, candles: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            symbols: symbols.into_iter().map(Into::into).collect(),
            interval: interval.into(),
            candles,
            studies: Vec::new(),
            adjustment: Adjustment::default(),
            currency: "USD".to_string(),
            timezone: Tz::UTC,
        }
    }

    /// Adds studies from the built-in catalogue by name.
    ///
    /// # Errors
    ///
    /// Returns [`TvError::Validation`] for names outside
    /// [`BUILTIN_STUDIES`](crate::models::study::BUILTIN_STUDIES).
    pub fn with_builtin_studies(mut self, names: &[&str]) -> Result<Self> {
        for name in names {
            let study = Study::builtin(name)
                .ok_or_else(|| TvError::Validation(format!("unknown study {name:?}")))?;
            self.studies.push(study);
        }
        Ok(self)
    }

    #[must_use]
    pub fn with_study(mut self, study: Study) -> Self {
        self.studies.push(study);
        self
    }

    #[must_use]
    pub fn with_adjustment(mut self, adjustment: Adjustment) -> Self {
        self.adjustment = adjustment;
        self
    }

    #[must_use]
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            return Err(TvError::Validation("no symbols requested".into()));
        }
        if self.candles == 0 {
            return Err(TvError::Validation("candle count must be at least 1".into()));
        }
        if self.interval.is_empty() {
            return Err(TvError::Validation("interval must not be empty".into()));
        }
        Ok(())
    }

    /// Indicator columns of the result when no bars arrive.
    fn indicator_columns(&self) -> Vec<String> {
        self.studies
            .iter()
            .flat_map(|study| study.column_names(study.outputs.len().max(1)))
            .collect()
    }
}

/// Client for TradingView quotes and bar history.
pub struct TradingView<C: Connector = WsConnector> {
    connector: C,
    tokens: TokenCache,
    workers: usize,
    chart_timeout: Duration,
    data_quality: Option<String>,
    stream_retry: RetryPolicy,
}

impl TradingView<WsConnector> {
    /// Builds a client for the configured endpoint. `provider` performs the
    /// login when a username and password are configured.
    pub fn from_config(
        config: &TradingViewConfig,
        provider: Option<Arc<dyn CredentialProvider>>,
    ) -> Self {
        Self::new(
            WsConnector::from_config(config),
            TokenCache::from_config(config, provider),
        )
        .with_workers(config.workers)
        .with_chart_timeout(config.chart_timeout)
        .with_data_quality(Some(HIGH_QUALITY.to_string()))
    }
}

impl<C: Connector> TradingView<C> {
    pub fn new(connector: C, tokens: TokenCache) -> Self {
        Self {
            connector,
            tokens,
            workers: 1,
            chart_timeout: Duration::from_secs(60),
            data_quality: None,
            stream_retry: RetryPolicy::default(),
        }
    }

    /// Symbols fetched concurrently; values below 1 are treated as 1.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    #[must_use]
    pub fn with_chart_timeout(mut self, timeout: Duration) -> Self {
        self.chart_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_data_quality(mut self, quality: Option<String>) -> Self {
        self.data_quality = quality;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.stream_retry = policy;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    async fn open(&self) -> Result<(Connection<C::Transport>, SessionAuth)> {
        let auth = SessionAuth {
            token: self.tokens.token().await?,
            data_quality: self.data_quality.clone(),
        };
        let transport = self.connector.open().await?;
        Ok((Connection::new(transport), auth))
    }

    /// Fetches one snapshot per symbol over a single connection.
    ///
    /// # Errors
    ///
    /// See [`websocket::fetch_quotes`].
    pub async fn quotes(&self, symbols: &[String], fields: &[String]) -> Result<Quotes> {
        if symbols.is_empty() {
            return Err(TvError::Validation("no symbols requested".into()));
        }

        let (mut conn, auth) = self.open().await?;
        let result = websocket::fetch_quotes(&mut conn, &auth, symbols, fields).await;
        close_quietly(conn).await;
        result
    }

    /// Fetches the snapshot of a single symbol.
    ///
    /// # Errors
    ///
    /// See [`websocket::fetch_quotes`].
    pub async fn quote(&self, symbol: &str, fields: &[String]) -> Result<QuoteSnapshot> {
        let mut quotes = self.quotes(&[symbol.to_string()], fields).await?;
        quotes.remove(symbol).ok_or(TvError::ConnectionClosed)
    }

    /// Fetches bars and studies for every symbol of `request`.
    ///
    /// One extra bar per symbol is requested, since the server answers with
    /// one fewer than asked. Symbols run on separate connections, at most
    /// [`workers`](Self::workers) at a time. When no symbol yields any row
    /// the result is an empty table with the full column set.
    ///
    /// # Errors
    ///
    /// Returns [`TvError::Validation`] for an invalid request, otherwise the
    /// first error of any symbol; see [`websocket::fetch_chart`].
    pub async fn ohlcv(&self, request: &OhlcvRequest) -> Result<OhlcvTable> {
        request.validate()?;

        let chart = ChartRequest {
            interval: request.interval.clone(),
            bars: request.candles.saturating_add(1),
            studies: request.studies.clone(),
            adjustment: request.adjustment,
            currency: request.currency.clone(),
            timeout: self.chart_timeout,
        };

        info!(
            symbols = request.symbols.len(),
            interval = %chart.interval,
            bars = chart.bars,
            studies = chart.studies.len(),
            workers = self.workers,
            "Fetching bar history"
        );

        let chart = &chart;
        let tables: Vec<OhlcvTable> = stream::iter(&request.symbols)
            .map(|symbol| async move {
                let (mut conn, auth) = self.open().await?;
                let frame = websocket::fetch_chart_chunked(&mut conn, &auth, symbol, chart).await;
                close_quietly(conn).await;
                OhlcvTable::from_frame(symbol, &frame?, &request.timezone)
            })
            .buffer_unordered(self.workers)
            .try_collect()
            .await?;

        let table = OhlcvTable::concat(tables, request.indicator_columns());
        debug!(rows = table.len(), "Bar history merged");
        Ok(table)
    }

    /// Streams quote updates for `symbols` to `on_update` until cancelled.
    ///
    /// Retryable failures reconnect after the retry policy's backoff and
    /// subscribe again. The attempt counter resets whenever a connection
    /// delivers at least one update. With no `fields`, [`STREAM_FIELDS`]
    /// are requested.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error, or the last error once
    /// `max_attempts` consecutive attempts have failed.
    pub async fn stream_quotes<F>(
        &self,
        symbols: &[String],
        fields: &[String],
        mut on_update: F,
    ) -> Result<Infallible>
    where
        F: FnMut(&QuoteUpdate),
    {
        if symbols.is_empty() {
            return Err(TvError::Validation("no symbols requested".into()));
        }

        let fields: Vec<String> = if fields.is_empty() {
            STREAM_FIELDS.iter().map(|f| f.to_string()).collect()
        } else {
            fields.to_vec()
        };

        let mut attempts: u32 = 0;
        loop {
            let mut delivered = false;
            let err = match self.open().await {
                Ok((mut conn, auth)) => {
                    let outcome =
                        websocket::stream_quotes(&mut conn, &auth, symbols, &fields, |update| {
                            delivered = true;
                            on_update(update);
                        })
                        .await;
                    close_quietly(conn).await;
                    match outcome {
                        Ok(never) => match never {},
                        Err(e) => e,
                    }
                }
                Err(e) => e,
            };

            if !err.is_retryable() {
                return Err(err);
            }

            attempts = if delivered { 1 } else { attempts + 1 };
            if self
                .stream_retry
                .max_attempts
                .is_some_and(|max| attempts >= max)
            {
                return Err(err);
            }

            warn!(
                error = %err,
                attempt = attempts,
                backoff_secs = self.stream_retry.backoff.as_secs(),
                "Quote stream interrupted, reconnecting"
            );
            tokio::time::sleep(self.stream_retry.backoff).await;
        }
    }
}

async fn close_quietly<T: websocket::Transport>(conn: Connection<T>) {
    if let Err(e) = conn.close().await {
        debug!(error = %e, "Error while closing connection");
    }
}
