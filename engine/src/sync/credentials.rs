//! Cloud token lookup
//!
//! The token is never stored in config or in queue rows. It comes from the
//! `HUB_CLOUD_TOKEN` environment variable or, failing that, the OS keychain.

use keyring::Entry;
use sdk::errors::HubError;

pub const TOKEN_ENV: &str = "HUB_CLOUD_TOKEN";

const KEYRING_SERVICE: &str = "cpos-hub";
const KEYRING_USER: &str = "cloud_token";

/// Current cloud token, if any
pub fn cloud_token() -> Option<String> {
    if let Ok(token) = std::env::var(TOKEN_ENV) {
        let token = token.trim().to_string();
        if !token.is_empty() {
            tracing::debug!("Using cloud token from {}", TOKEN_ENV);
            return Some(token);
        }
    }

    let entry = match Entry::new(KEYRING_SERVICE, KEYRING_USER) {
        Ok(entry) => entry,
        Err(e) => {
            tracing::debug!("Keychain unavailable: {}", e);
            return None;
        }
    };

    match entry.get_password() {
        Ok(token) => Some(token),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            tracing::warn!("Failed to read cloud token from keychain: {}", e);
            None
        }
    }
}

/// Store the cloud token in the OS keychain
pub fn store_cloud_token(token: &str) -> Result<(), HubError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(HubError::Keyring("cloud token is empty".to_string()));
    }

    let entry = Entry::new(KEYRING_SERVICE, KEYRING_USER)
        .map_err(|e| HubError::Keyring(format!("Failed to create keyring entry: {}", e)))?;
    entry
        .set_password(token)
        .map_err(|e| HubError::Keyring(format!("Failed to store cloud token: {}", e)))?;

    tracing::info!("Stored cloud token in keychain");
    Ok(())
}

/// Remove the cloud token from the OS keychain
pub fn delete_cloud_token() -> Result<(), HubError> {
    let entry = Entry::new(KEYRING_SERVICE, KEYRING_USER)
        .map_err(|e| HubError::Keyring(format!("Failed to create keyring entry: {}", e)))?;

    match entry.delete_password() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(HubError::Keyring(format!("Failed to delete cloud token: {}", e))),
    }
}
