//! Client configuration file.
//!
//! ```toml
//! [server]
//! url = "http://localhost:5984"
//! username = "admin"
//! password-env = "COUCHDB_PASSWORD"
//! auth = "cookie"
//! timeout-secs = 30
//! idle-timeout = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::session::{AuthMode, Credentials, DEFAULT_URL, SessionBuilder};
use crate::transport::TimeoutMode;

/// Default config filename.
const CONFIG_FILE: &str = "config.toml";

// ─────────────────────────────────────────────────────────────────────────────
// Client Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ClientConfig {
    pub server: ServerConfig,
}

/// Connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ServerConfig {
    /// Server URL.
    pub url: String,

    pub username: Option<String>,

    /// Password in clear text. Prefer `password-env`.
    pub password: Option<String>,

    /// Environment variable holding the password.
    pub password_env: Option<String>,

    pub auth: AuthMode,

    /// Request timeout in seconds. Unset means no timeout.
    pub timeout_secs: Option<u64>,

    /// Apply the timeout to stream silence instead of whole exchanges.
    pub idle_timeout: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            username: None,
            password: None,
            password_env: None,
            auth: AuthMode::None,
            timeout_secs: None,
            idle_timeout: false,
        }
    }
}

impl ClientConfig {
    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Resolve the credentials, reading `password-env` when no clear-text
    /// password is configured.
    pub fn credentials(&self) -> Option<Credentials> {
        let username = self.server.username.as_ref()?;
        let password = match (&self.server.password, &self.server.password_env) {
            (Some(password), _) => password.clone(),
            (None, Some(var)) => std::env::var(var).unwrap_or_default(),
            (None, None) => String::new(),
        };
        Some(Credentials::new(username.clone(), password))
    }

    /// A session builder preloaded with these settings.
    pub fn session_builder(&self) -> Result<SessionBuilder> {
        if self.server.auth != AuthMode::None && self.server.username.is_none() {
            return Err(Error::Config(format!(
                "auth = \"{}\" requires a username",
                self.server.auth.to_string().to_lowercase()
            )));
        }

        let mut builder = SessionBuilder::new()
            .base_url(self.server.url.clone())
            .auth_mode(self.server.auth)
            .timeout_mode(if self.server.idle_timeout {
                TimeoutMode::Idle
            } else {
                TimeoutMode::Total
            });

        if let Some(credentials) = self.credentials() {
            builder = builder.credentials(credentials);
        }
        if let Some(secs) = self.server.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(builder)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

/// Default config location, e.g. `~/.config/recliner/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("recliner").join(CONFIG_FILE))
}

/// Load the configuration from the default location.
///
/// Returns a default config if the file doesn't exist.
pub fn load_config() -> Result<ClientConfig> {
    load_config_from(config_path().as_deref())
}

/// Load the configuration from a specific path.
pub fn load_config_from(path: Option<&Path>) -> Result<ClientConfig> {
    let Some(path) = path else {
        return Ok(ClientConfig::default());
    };

    if !path.exists() {
        return Ok(ClientConfig::default());
    }

    let contents = std::fs::read_to_string(path)?;
    ClientConfig::from_toml(&contents)
}
