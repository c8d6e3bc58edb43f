//! Session storage in the OS keyring.
//!
//! # Storage
//!
//! Production: single OS keyring entry `gto/credentials` containing JSON.
//! Test mode: file at `{config_dir}/credentials.json`.
//!
//! A keychain that is locked or refuses access degrades to "not logged in"
//! instead of failing the command; the user can log in again.

use anyhow::Result;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

/// Keyring service name.
const KEYRING_SERVICE: &str = "gto";
/// Keyring entry name.
const KEYRING_CREDENTIALS: &str = "credentials";

/// Number of attempts for keyring access.
const KEYRING_RETRY_ATTEMPTS: u32 = 2;
/// Delay between attempts in milliseconds.
const KEYRING_RETRY_DELAY_MS: u64 = 500;

/// Categorized keyring access errors.
#[derive(Debug)]
pub enum KeyringAccessError {
    /// Keyring is locked and requires user interaction.
    Locked(String),
    /// Entry does not exist (first run).
    NotFound,
    /// Access denied by the OS.
    AccessDenied(String),
    /// Data exists but does not parse.
    Corrupted(String),
    /// Anything else.
    Other(String),
}

impl std::fmt::Display for KeyringAccessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Locked(msg) => write!(f, "Keyring locked: {msg}"),
            Self::NotFound => write!(f, "Keyring entry not found"),
            Self::AccessDenied(msg) => write!(f, "Keyring access denied: {msg}"),
            Self::Corrupted(msg) => write!(f, "Keyring data corrupted: {msg}"),
            Self::Other(msg) => write!(f, "Keyring error: {msg}"),
        }
    }
}

impl std::error::Error for KeyringAccessError {}

fn categorize_keyring_error(err: &keyring::Error) -> KeyringAccessError {
    match err {
        keyring::Error::NoEntry => KeyringAccessError::NotFound,
        keyring::Error::BadEncoding(_) => {
            KeyringAccessError::Corrupted("stored value is not UTF-8".to_string())
        }
        other => {
            let msg = format!("{other:?}");
            let lower = msg.to_lowercase();
            if lower.contains("user interaction") || lower.contains("user canceled") {
                KeyringAccessError::Locked(msg)
            } else if lower.contains("denied") || lower.contains("not allowed") {
                KeyringAccessError::AccessDenied(msg)
            } else {
                KeyringAccessError::Other(msg)
            }
        }
    }
}

fn should_skip_keyring() -> bool {
    #[cfg(test)]
    {
        true
    }

    #[cfg(not(test))]
    {
        crate::env::should_skip_keyring()
    }
}

fn credentials_file_path() -> Result<PathBuf> {
    crate::config::Config::config_dir().map(|d| d.join("credentials.json"))
}

/// Secrets kept outside `config.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    /// Value of the server's session cookie.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,

    /// Schema version.
    #[serde(default = "default_version")]
    pub version: u8,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            session_token: None,
            version: default_version(),
        }
    }
}

fn default_version() -> u8 {
    1
}

impl Credentials {
    /// Load credentials from the keyring (or file in test mode).
    ///
    /// Keyring failures yield empty credentials after a retry.
    pub fn load() -> Result<Self> {
        if should_skip_keyring() {
            return Self::load_from_file();
        }
        Ok(Self::load_from_keyring_with_retry())
    }

    fn load_from_keyring_with_retry() -> Self {
        let mut last_error: Option<KeyringAccessError> = None;

        for attempt in 0..KEYRING_RETRY_ATTEMPTS {
            if attempt > 0 {
                log::debug!(
                    "[credentials] Retrying keyring access (attempt {}/{})",
                    attempt + 1,
                    KEYRING_RETRY_ATTEMPTS
                );
                thread::sleep(Duration::from_millis(KEYRING_RETRY_DELAY_MS));
            }

            match Self::try_load_from_keyring() {
                Ok(creds) => return creds,
                Err(KeyringAccessError::NotFound) => {
                    log::debug!("[credentials] No credentials in keyring");
                    return Self::default();
                }
                Err(err @ KeyringAccessError::Corrupted(_)) => {
                    log::warn!("[credentials] {err}; ignoring stored session");
                    return Self::default();
                }
                Err(err) => {
                    log::debug!("[credentials] Keyring attempt {} failed: {err}", attempt + 1);
                    last_error = Some(err);
                }
            }
        }

        if let Some(err) = last_error {
            log::warn!(
                "[credentials] Keyring access failed after {KEYRING_RETRY_ATTEMPTS} attempts: {err}. \
                 You may need to log in again."
            );
        }
        Self::default()
    }

    fn try_load_from_keyring() -> std::result::Result<Self, KeyringAccessError> {
        let entry = Entry::new(KEYRING_SERVICE, KEYRING_CREDENTIALS)
            .map_err(|e| KeyringAccessError::Other(format!("Failed to create entry: {e:?}")))?;

        let json = entry
            .get_password()
            .map_err(|e| categorize_keyring_error(&e))?;
        serde_json::from_str(&json)
            .map_err(|e| KeyringAccessError::Corrupted(format!("JSON parse error: {e}")))
    }

    fn load_from_file() -> Result<Self> {
        let path = credentials_file_path()?;
        if path.exists() {
            let content = fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Save credentials to the keyring (or file in test mode).
    pub fn save(&self) -> Result<()> {
        if should_skip_keyring() {
            return self.save_to_file();
        }

        let entry = Entry::new(KEYRING_SERVICE, KEYRING_CREDENTIALS)
            .map_err(|e| anyhow::anyhow!("Failed to create keyring entry: {e:?}"))?;
        let json = serde_json::to_string(self)?;
        entry
            .set_password(&json)
            .map_err(|e| anyhow::anyhow!("Failed to store credentials in keyring: {e:?}"))?;

        log::debug!("[credentials] Saved credentials to OS keyring");
        Ok(())
    }

    fn save_to_file(&self) -> Result<()> {
        let path = credentials_file_path()?;
        fs::write(&path, serde_json::to_string_pretty(self)?)?;

        #[cfg(unix)]
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Delete stored credentials. Missing entries are not an error.
    pub fn delete() -> Result<()> {
        if should_skip_keyring() {
            let path = credentials_file_path()?;
            if path.exists() {
                fs::remove_file(&path)?;
            }
            return Ok(());
        }

        let entry = Entry::new(KEYRING_SERVICE, KEYRING_CREDENTIALS)
            .map_err(|e| anyhow::anyhow!("Failed to create keyring entry: {e:?}"))?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {}
            Err(e) => log::warn!("[credentials] Could not delete keyring entry: {e:?}"),
        }
        Ok(())
    }

    /// Session cookie value, if logged in.
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    /// Remember a session cookie value.
    pub fn set_session_token(&mut self, token: String) {
        self.session_token = Some(token);
    }

    /// Forget the session.
    pub fn clear_session_token(&mut self) {
        self.session_token = None;
    }
}
