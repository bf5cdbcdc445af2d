//! Watch command - stream a database's changes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use console::style;
use recliner_client::{FeedMode, FeedOptions, FeedStopper, HandlerFns, IgnoreRule};
use serde_json::Value;

use super::Context;

/// Arguments for the watch command.
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Database name
    pub database: String,

    /// Start after this sequence (`now` skips history)
    #[arg(long)]
    pub since: Option<String>,

    /// Include full documents
    #[arg(long)]
    pub include_docs: bool,

    /// Ask the server for a heartbeat every N milliseconds
    #[arg(long, value_name = "MS")]
    pub heartbeat: Option<u64>,

    /// Stop after N changes
    #[arg(long, value_name = "N")]
    pub limit: Option<u64>,

    /// Feed mode: continuous, longpoll or normal
    #[arg(long, default_value = "continuous")]
    pub mode: FeedMode,

    /// Server-side filter function (design/name)
    #[arg(long)]
    pub filter: Option<String>,

    /// Suppress matching changes: delete, update, all, optionally `:<doc id>`
    #[arg(long = "ignore", value_name = "RULE")]
    pub ignore: Vec<IgnoreRule>,
}

impl WatchArgs {
    fn options(&self) -> FeedOptions {
        let mut options = FeedOptions::new().mode(self.mode);
        if let Some(since) = &self.since {
            options = options.since(since.clone());
        }
        if self.include_docs {
            options = options.include_docs(true);
        }
        if let Some(ms) = self.heartbeat {
            options = options.heartbeat(Duration::from_millis(ms));
        }
        if let Some(filter) = &self.filter {
            options = options.filter(filter.clone());
        }
        options
    }
}

/// Run the watch command.
pub fn run(args: WatchArgs, ctx: &Context) -> Result<()> {
    let session = ctx.session()?;

    let stopper: Arc<OnceLock<FeedStopper>> = Arc::new(OnceLock::new());
    let seen = Arc::new(AtomicU64::new(0));
    let json_output = ctx.json_output;
    let limit = args.limit;

    let handler = HandlerFns::new()
        .on_open({
            let database = args.database.clone();
            move || tracing::info!(database = %database, "watching changes")
        })
        .on_change({
            let stopper = Arc::clone(&stopper);
            let seen = Arc::clone(&seen);
            move |change| {
                print_change(change, json_output);
                let count = seen.fetch_add(1, Ordering::SeqCst) + 1;
                if limit.is_some_and(|limit| count >= limit) {
                    if let Some(stopper) = stopper.get() {
                        stopper.stop();
                    }
                }
            }
        })
        .on_close(|| tracing::info!("change feed closed"));

    let feed = session.database(args.database.clone()).changes(handler)?;
    let _ = stopper.set(feed.stopper());

    for rule in &args.ignore {
        feed.ignore(rule.clone());
    }

    feed.start(&args.options())?;
    feed.run()?;

    tracing::debug!(changes = seen.load(Ordering::SeqCst), "watch finished");
    Ok(())
}

fn print_change(change: &Value, json_output: bool) {
    if json_output {
        println!("{}", change);
        return;
    }

    let seq = match &change["seq"] {
        Value::String(seq) => seq.clone(),
        other => other.to_string(),
    };
    let id = change["id"].as_str().unwrap_or("-");
    let deleted = change["deleted"].as_bool().unwrap_or(false);

    if deleted {
        println!("{} {} {}", style(seq).dim(), id, style("(deleted)").red());
    } else {
        println!("{} {}", style(seq).dim(), id);
    }
}
