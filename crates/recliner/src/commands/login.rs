//! Login command - obtain a session cookie.

use anyhow::{Result, bail};
use clap::Args;
use console::{Style, style};
use recliner_client::AuthMode;
use serde::Serialize;

use super::Context;

/// Arguments for the login command.
#[derive(Args, Debug)]
pub struct LoginArgs {}

/// Login result for JSON output.
#[derive(Debug, Serialize)]
struct LoginOutput {
    server: String,
    username: String,
    auth: String,
    cookie_issued: bool,
}

/// Run the login command.
pub fn run(_args: LoginArgs, ctx: &Context) -> Result<()> {
    let Some(credentials) = ctx.config.credentials() else {
        bail!("no username configured; set `username` under [server] in the config file");
    };

    let mut builder = ctx.config.session_builder()?;
    if ctx.config.server.auth != AuthMode::Cookie {
        tracing::debug!(auth = %ctx.config.server.auth, "switching to cookie auth for login");
        builder = builder.auth_mode(AuthMode::Cookie);
    }
    let mut session = builder.credentials(credentials.clone()).build()?;
    session.login()?;

    let cookie_issued = !session.cookie().is_empty();
    if ctx.json_output {
        let output = LoginOutput {
            server: session.base_url().to_string(),
            username: credentials.username().to_string(),
            auth: session.auth_mode().to_string(),
            cookie_issued,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!();
    println!("{}", style("Login").bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    println!("  {} {}", dim.apply_to("Server:"), session.base_url());
    println!("  {} {}", dim.apply_to("User:"), credentials.username());
    println!("  {} {}", dim.apply_to("Auth:"), session.auth_mode());
    if cookie_issued {
        println!("  {} {}", dim.apply_to("Session:"), style("● cookie issued").green());
    } else {
        println!("  {} {}", dim.apply_to("Session:"), style("● no cookie issued").yellow());
    }
    if ctx.verbose {
        println!("  {} {}", dim.apply_to("Cookie:"), session.cookie());
    }
    println!();
    Ok(())
}
