//! Configuration loading and persistence.
//!
//! Reads and writes `config.json`. The session cookie is stored in the OS
//! keyring via the credentials module, never in the config file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{fs, path::PathBuf};

use crate::constants::{DEV_API_URL, PROD_API_URL};
use crate::credentials::Credentials;
use crate::endpoints::Endpoints;
use crate::env::Environment;
use crate::ws::http_to_ws_scheme;

/// Configuration for the gto client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Base URL of the HTTP API.
    pub api_url: String,
    /// Base URL for room sockets.
    pub ws_url: String,
    /// Last username used to log in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Session cookie value - NOT serialized to disk (stored in keyring).
    #[serde(skip)]
    pub session: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self::for_environment(Environment::current())
    }
}

impl Config {
    /// Defaults for `env`: a local server in development, the public one otherwise.
    pub fn for_environment(env: Environment) -> Self {
        let api_url = if env.is_development() {
            DEV_API_URL
        } else {
            PROD_API_URL
        };
        Self {
            api_url: api_url.to_string(),
            ws_url: http_to_ws_scheme(api_url),
            username: None,
            session: None,
        }
    }

    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `#[cfg(test)]` (unit tests): `tmp/gto-test`
    /// 2. `GTO_CONFIG_DIR` env var
    /// 3. Platform config dir (Linux: `~/.config/gto`)
    pub fn config_dir() -> Result<PathBuf> {
        let dir = {
            #[cfg(test)]
            {
                PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/gto-test")
            }

            #[cfg(not(test))]
            {
                if let Ok(dir) = std::env::var("GTO_CONFIG_DIR") {
                    PathBuf::from(dir)
                } else {
                    dirs::config_dir()
                        .context("Could not determine config directory")?
                        .join("gto")
                }
            }
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from file with environment variable overrides,
    /// then the session from credentials storage.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?.unwrap_or_default();
        config.apply_env_overrides();

        match Credentials::load() {
            Ok(creds) => config.session = creds.session_token().map(str::to_string),
            Err(e) => log::warn!("[config] Could not load credentials: {e}"),
        }

        Ok(config)
    }

    fn load_from_file() -> Result<Option<Self>> {
        let config_path = Self::config_dir()?.join("config.json");
        if !config_path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", config_path.display()))?;
        Ok(Some(config))
    }

    fn apply_env_overrides(&mut self) {
        let api_override = std::env::var("GTO_API_URL").ok();
        if let Some(api_url) = &api_override {
            self.api_url = api_url.clone();
        }

        if let Ok(ws_url) = std::env::var("GTO_WS_URL") {
            self.ws_url = ws_url;
        } else if let Some(api_url) = &api_override {
            self.ws_url = http_to_ws_scheme(api_url);
        }
    }

    /// Persists the configuration to disk. The session is NOT saved here.
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_dir()?.join("config.json");
        fs::write(&config_path, serde_json::to_string_pretty(self)?)?;

        #[cfg(unix)]
        fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Endpoints for the configured server.
    pub fn endpoints(&self) -> Endpoints {
        Endpoints::new(&self.api_url, &self.ws_url)
    }

    /// Returns `true` if a session cookie is available.
    pub fn has_session(&self) -> bool {
        self.session.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Store a new session cookie.
    pub fn save_session(&mut self, token: &str) -> Result<()> {
        self.session = Some(token.to_string());

        let mut creds = Credentials::load().unwrap_or_default();
        creds.set_session_token(token.to_string());
        creds.save()
    }

    /// Forget the session cookie.
    pub fn clear_session(&mut self) -> Result<()> {
        self.session = None;

        let mut creds = Credentials::load().unwrap_or_default();
        creds.clear_session_token();
        creds.save()
    }
}
