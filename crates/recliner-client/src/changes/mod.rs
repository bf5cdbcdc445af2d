//! Change feeds.
//!
//! - [`ChangesFeed`]: the engine driving one `_changes` stream
//! - [`ChangeHandler`] / [`HandlerFns`]: receivers of opened/change/closed
//! - [`FeedOptions`]: feed mode and query parameters
//! - [`IgnoreRule`] / [`ChangeFilter`]: client-side suppression
//! - [`SessionEditor`]: locked access to a feed's session

mod editor;
mod feed;
mod filter;
mod handler;
mod options;

pub use editor::SessionEditor;
pub use feed::{ChangesFeed, FeedStopper};
pub use filter::{ChangeFilter, IgnoreKind, IgnoreRule};
pub use handler::{ChangeHandler, HandlerFns, OnChangeCallback, OnLifecycleCallback};
pub use options::{FeedMode, FeedOptions};
