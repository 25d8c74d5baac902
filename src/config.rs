//! Application configuration loaded from environment variables.
//!
//! Login credentials are optional and read from:
//! - `TV_USERNAME`: account name passed to the credential provider
//! - `TV_PASSWORD`: account password passed to the credential provider
//!
//! A pre-issued `TV_AUTH_TOKEN` skips the credential provider entirely.
//! Without any of them the client connects as an unauthorized user.
//!
//! Optional overrides: `TV_WEBSOCKET_URL`, `TV_ORIGIN`, `TV_WORKERS`
//! and `TV_CHART_TIMEOUT_SECS`.

use std::time::Duration;

use zeroize::Zeroizing;

/// Default data endpoint.
pub const DEFAULT_WEBSOCKET_URL: &str =
    "wss://prodata.tradingview.com/socket.io/websocket?&type=chart";

/// `Origin` header the data endpoint expects on the upgrade request.
pub const DEFAULT_ORIGIN: &str = "https://data.tradingview.com";

/// Default number of symbols fetched concurrently.
const DEFAULT_WORKERS: usize = 1;

/// Default deadline for one chart session.
const DEFAULT_CHART_TIMEOUT: Duration = Duration::from_secs(60);

/// Top-level application configuration.
#[derive(Debug)]
pub struct AppConfig {
    pub tradingview: TradingViewConfig,
}

/// TradingView-specific configuration values.
#[derive(Debug)]
pub struct TradingViewConfig {
    pub websocket_url: String,
    pub origin: String,
    pub username: Option<String>,
    pub password: Option<Zeroizing<String>>,
    pub auth_token: Option<String>,
    pub workers: usize,
    pub chart_timeout: Duration,
}

impl Default for TradingViewConfig {
    fn default() -> Self {
        Self {
            websocket_url: DEFAULT_WEBSOCKET_URL.to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            username: None,
            password: None,
            auth_token: None,
            workers: DEFAULT_WORKERS,
            chart_timeout: DEFAULT_CHART_TIMEOUT,
        }
    }
}

/// Loads the application configuration from environment variables.
///
/// # Errors
///
/// Returns [`TvError::Config`](crate::TvError::Config) if only one of
/// the two credential variables is set, or if a numeric override does not
/// parse as a positive integer.
pub fn fetch_config() -> crate::Result<AppConfig> {
    let defaults = TradingViewConfig::default();

    let websocket_url = non_empty_var("TV_WEBSOCKET_URL").unwrap_or(defaults.websocket_url);
    let origin = non_empty_var("TV_ORIGIN").unwrap_or(defaults.origin);

    let username = non_empty_var("TV_USERNAME");
    let password = non_empty_var("TV_PASSWORD").map(Zeroizing::new);

    match (&username, &password) {
        (Some(_), None) => {
            return Err(crate::TvError::Config(
                "TV_USERNAME is set but TV_PASSWORD is missing".to_string(),
            ));
        }
        (None, Some(_)) => {
            return Err(crate::TvError::Config(
                "TV_PASSWORD is set but TV_USERNAME is missing".to_string(),
            ));
        }
        _ => {}
    }

    let workers = match non_empty_var("TV_WORKERS") {
        Some(raw) => positive_int("TV_WORKERS", &raw)? as usize,
        None => defaults.workers,
    };

    let chart_timeout = match non_empty_var("TV_CHART_TIMEOUT_SECS") {
        Some(raw) => Duration::from_secs(positive_int("TV_CHART_TIMEOUT_SECS", &raw)?),
        None => defaults.chart_timeout,
    };

    Ok(AppConfig {
        tradingview: TradingViewConfig {
            websocket_url,
            origin,
            username,
            password,
            auth_token: non_empty_var("TV_AUTH_TOKEN"),
            workers,
            chart_timeout,
        },
    })
}

/// Returns the value of an environment variable if it exists and is non-empty.
fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn positive_int(name: &str, raw: &str) -> crate::Result<u64> {
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(crate::TvError::Config(format!(
            "{name} must be a positive integer, got {raw:?}"
        ))),
    }
}
