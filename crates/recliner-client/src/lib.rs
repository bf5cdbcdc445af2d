//! Client for CouchDB-style document databases.
//!
//! This crate provides a blocking session with auth, cookie and response
//! caching, and change feeds that deliver `_changes` rows to a handler
//! inline or on a worker thread.
//!
//! # Example
//!
//! ```no_run
//! use recliner_client::{AuthMode, Credentials, FeedOptions, HandlerFns, Result, Session};
//!
//! # fn example() -> Result<()> {
//! let mut session = Session::builder()
//!     .base_url("http://localhost:5984")
//!     .credentials(Credentials::new("admin", "secret"))
//!     .auth_mode(AuthMode::Cookie)
//!     .build()?;
//! session.login()?;
//!
//! let handler = HandlerFns::new().on_change(|change| println!("{}", change));
//! let feed = session.database("notes").changes(handler)?;
//! feed.start_in_new_thread(FeedOptions::new().since("now"))?;
//!
//! // ... later
//! feed.stop_and_wait_for_finish();
//! if let Some(err) = feed.last_error() {
//!     eprintln!("feed failed: {}", err);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Layers
//!
//! - **Transport**: [`Transport`] adapters ([`HttpTransport`], [`ScriptedTransport`])
//! - **Session**: [`Session`] and its copyable [`SessionState`]
//! - **Changes**: [`ChangesFeed`], [`ChangeHandler`], [`SessionEditor`]
//! - **Config**: [`ClientConfig`] loaded from TOML

pub mod changes;
pub mod config;
pub mod database;
pub mod error;
pub mod session;
pub mod transport;

pub use changes::{
    ChangeFilter, ChangeHandler, ChangesFeed, FeedMode, FeedOptions, FeedStopper, HandlerFns,
    IgnoreRule, SessionEditor,
};
pub use config::{ClientConfig, ServerConfig, config_path, load_config, load_config_from};
pub use database::Database;
pub use error::{Error, Result};
pub use session::{AuthMode, Credentials, Session, SessionBuilder, SessionState};
pub use transport::{
    HeaderMap, HttpTransport, Method, ScriptedTransport, StreamHandle, TimeoutMode, Transport,
    TransportRequest, TransportResponse,
};
