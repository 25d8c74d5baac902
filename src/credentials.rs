//! Login storage in the OS keychain.
//!
//! At startup, [`populate_env_from_keychain`] copies any stored values into
//! environment variables so [`fetch_config`](crate::config::fetch_config)
//! picks them up without the user exporting secrets in their shell.

use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Keychain service name used for all stored credentials.
const SERVICE: &str = "tvfeed";

/// Credential entries managed by this module.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialKey {
    Username,
    Password,
    AuthToken,
}

impl CredentialKey {
    /// Returns the keychain entry identifier.
    pub fn keyring_id(self) -> &'static str {
        match self {
            Self::Username => "tradingview_username",
            Self::Password => "tradingview_password",
            Self::AuthToken => "tradingview_auth_token",
        }
    }

    /// Returns the environment variable this entry populates.
    pub fn env_var(self) -> &'static str {
        match self {
            Self::Username => "TV_USERNAME",
            Self::Password => "TV_PASSWORD",
            Self::AuthToken => "TV_AUTH_TOKEN",
        }
    }

    pub const ALL: [CredentialKey; 3] = [Self::Username, Self::Password, Self::AuthToken];
}

/// Loads a credential from the keychain, returning `None` if not set.
pub fn load(key: CredentialKey) -> Option<Zeroizing<String>> {
    let entry = keyring::Entry::new(SERVICE, key.keyring_id()).ok()?;
    match entry.get_password() {
        Ok(password) => Some(Zeroizing::new(password)),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key = key.keyring_id(), error = %e, "failed to read keychain entry");
            None
        }
    }
}

/// Saves a credential to the keychain.
///
/// # Errors
///
/// Returns [`TvError::Credential`](crate::TvError::Credential) if the
/// keychain rejects the entry.
pub fn save(key: CredentialKey, value: &str) -> crate::Result<()> {
    let entry = keyring::Entry::new(SERVICE, key.keyring_id())
        .map_err(|e| crate::TvError::Credential(format!("keyring entry error: {e}")))?;
    entry
        .set_password(value)
        .map_err(|e| crate::TvError::Credential(format!("failed to save to keychain: {e}")))
}

/// Removes a credential from the keychain. Missing entries are not an error.
///
/// # Errors
///
/// Returns [`TvError::Credential`](crate::TvError::Credential) if the
/// keychain cannot be accessed.
pub fn delete(key: CredentialKey) -> crate::Result<()> {
    let entry = keyring::Entry::new(SERVICE, key.keyring_id())
        .map_err(|e| crate::TvError::Credential(format!("keyring entry error: {e}")))?;
    match entry.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(crate::TvError::Credential(format!(
            "failed to delete keychain entry: {e}"
        ))),
    }
}

/// Populates environment variables from the keychain for any
/// credentials not already set in the environment.
///
/// Call this at startup before [`crate::config::fetch_config`].
pub fn populate_env_from_keychain() {
    for key in CredentialKey::ALL {
        if std::env::var(key.env_var()).is_err()
            && let Some(value) = load(key)
        {
            debug!(key = key.env_var(), "loaded credential from keychain");
            // SAFETY: single-threaded at this point (before tokio runtime starts tasks)
            unsafe {
                std::env::set_var(key.env_var(), value.as_str());
            }
        }
    }
}
