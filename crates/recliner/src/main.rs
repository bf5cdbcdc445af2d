//! recliner - command-line client for CouchDB-style databases
//!
//! Main entry point for the recliner CLI.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};

mod commands;

use commands::{get, login, watch};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// recliner - follow and query CouchDB-style databases
#[derive(Parser)]
#[command(name = "recliner")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Config file (default: ~/.config/recliner/config.toml)
    #[arg(long, global = true, env = "RECLINER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Server URL, overriding the config file
    #[arg(long, global = true, env = "RECLINER_URL")]
    pub server: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Stream a database's changes
    Watch(watch::WatchArgs),

    /// GET a path and print the decoded body
    Get(get::GetArgs),

    /// Log in with cookie authentication
    Login(login::LoginArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "recliner=debug,recliner_client=debug,info"
    } else {
        "recliner=info,recliner_client=info,warn"
    };

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
                ),
        )
        .init();

    let config_path = cli.config.clone().or_else(recliner_client::config_path);
    let mut config = recliner_client::load_config_from(config_path.as_deref())
        .with_context(|| match &config_path {
            Some(path) => format!("failed to load config from {}", path.display()),
            None => "failed to load config".to_string(),
        })?;

    if let Some(server) = cli.server {
        config.server.url = server;
    }
    tracing::debug!(server = %config.server.url, auth = %config.server.auth, "configuration loaded");

    let ctx = commands::Context {
        config,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Watch(args) => watch::run(args, &ctx),
        Commands::Get(args) => get::run(args, &ctx),
        Commands::Login(args) => login::run(args, &ctx),
    }
}
