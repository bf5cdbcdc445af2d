//! Get command - GET a path and print the body.

use anyhow::Result;
use clap::Args;

use super::Context;

/// Arguments for the get command.
#[derive(Args, Debug)]
pub struct GetArgs {
    /// Path relative to the server, e.g. `/_all_dbs` or `/notes/doc-1`
    pub path: String,
}

/// Run the get command.
pub fn run(args: GetArgs, ctx: &Context) -> Result<()> {
    let mut session = ctx.session()?;

    let path = if args.path.starts_with('/') {
        args.path
    } else {
        format!("/{}", args.path)
    };

    let body = session.get(&path)?;
    if ctx.json_output {
        println!("{}", serde_json::to_string(&body)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&body)?);
    }
    Ok(())
}
