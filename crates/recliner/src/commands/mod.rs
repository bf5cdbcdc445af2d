//! CLI command handlers.

pub mod get;
pub mod login;
pub mod watch;

use anyhow::Result;
use recliner_client::{ClientConfig, Session};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Effective configuration (file plus command-line overrides).
    pub config: ClientConfig,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Build a session from the configuration, logging in first when cookie
    /// auth is configured.
    pub fn session(&self) -> Result<Session> {
        let mut session = self.config.session_builder()?.build()?;
        session.login()?;
        Ok(session)
    }
}
