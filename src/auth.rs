//! Authentication token retrieval and caching.
//!
//! Every session-bearing command sequence starts with `set_auth_token`.
//! The token is obtained at most once per [`TokenCache`] through a
//! [`CredentialProvider`]; without credentials the service accepts the
//! literal [`UNAUTHORIZED_TOKEN`] for delayed, anonymous data.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::Result;
use crate::config::TradingViewConfig;
use crate::error::TvError;

/// Token sent when no credentials are configured.
pub const UNAUTHORIZED_TOKEN: &str = "unauthorized_user_token";

/// Tokens issued by a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Exchanges a login pair for tokens.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// # Errors
    ///
    /// Returns [`TvError::Credential`](crate::TvError::Credential) if the
    /// login is rejected or the provider cannot be reached.
    async fn fetch_token(&self, username: &str, password: &str) -> Result<AuthTokens>;
}

/// Provider that hands out a token issued ahead of time.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn fetch_token(&self, _username: &str, _password: &str) -> Result<AuthTokens> {
        Ok(AuthTokens {
            access_token: self.0.clone(),
            refresh_token: None,
        })
    }
}

struct Login {
    username: String,
    password: Zeroizing<String>,
    provider: Arc<dyn CredentialProvider>,
}

/// Lazily fetched, shared auth token.
///
/// Concurrent first callers of [`token`](Self::token) wait on a single
/// fetch. Clones share the same cell.
#[derive(Clone)]
pub struct TokenCache {
    cell: Arc<OnceCell<String>>,
    login: Option<Arc<Login>>,
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("initialized", &self.cell.initialized())
            .field("has_login", &self.login.is_some())
            .finish()
    }
}

impl TokenCache {
    /// Always resolves to [`UNAUTHORIZED_TOKEN`].
    pub fn anonymous() -> Self {
        Self {
            cell: Arc::new(OnceCell::new()),
            login: None,
        }
    }

    /// Resolves to `token` without contacting any provider.
    pub fn preset(token: impl Into<String>) -> Self {
        Self {
            cell: Arc::new(OnceCell::new_with(Some(token.into()))),
            login: None,
        }
    }

    /// Logs in through `provider` on first use.
    pub fn login(
        username: impl Into<String>,
        password: Zeroizing<String>,
        provider: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            cell: Arc::new(OnceCell::new()),
            login: Some(Arc::new(Login {
                username: username.into(),
                password,
                provider,
            })),
        }
    }

    /// Picks the cache matching the configuration: a pre-issued token wins,
    /// then a login pair through `provider`, then anonymous access.
    pub fn from_config(
        config: &TradingViewConfig,
        provider: Option<Arc<dyn CredentialProvider>>,
    ) -> Self {
        if let Some(token) = &config.auth_token {
            return Self::preset(token.clone());
        }

        match (&config.username, &config.password, provider) {
            (Some(username), Some(password), Some(provider)) => {
                Self::login(username.clone(), password.clone(), provider)
            }
            (Some(_), Some(_), None) => {
                warn!("Login configured but no credential provider available, connecting anonymously");
                Self::anonymous()
            }
            _ => Self::anonymous(),
        }
    }

    /// Returns the cached token, fetching it first if needed.
    ///
    /// # Errors
    ///
    /// Propagates the provider's error. A failed fetch leaves the cache
    /// empty so the next call tries again.
    pub async fn token(&self) -> Result<String> {
        let token = self
            .cell
            .get_or_try_init(|| async {
                let Some(login) = &self.login else {
                    info!("No credentials configured, using unauthorized token");
                    return Ok::<_, TvError>(UNAUTHORIZED_TOKEN.to_string());
                };
                let tokens = login
                    .provider
                    .fetch_token(&login.username, &login.password)
                    .await?;
                info!(username = %login.username, "Obtained authentication token");
                Ok(tokens.access_token)
            })
            .await?;
        Ok(token.clone())
    }
}
