//! Receivers of feed notifications.
//!
//! A feed calls its handler from whichever thread drives it (the caller's
//! thread for [`ChangesFeed::run`](super::ChangesFeed::run), the worker for
//! the threaded variants) and never while holding one of its own locks, so a
//! handler may call back into the feed, including stopping it.
//!
//! ```rust
//! use recliner_client::changes::HandlerFns;
//!
//! let handler = HandlerFns::new()
//!     .on_open(|| println!("feed opened"))
//!     .on_change(|change| println!("{}", change))
//!     .on_close(|| println!("feed closed"));
//! # let _ = handler;
//! ```

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// Callbacks invoked by a [`ChangesFeed`](super::ChangesFeed).
pub trait ChangeHandler: Send + Sync {
    /// A stream was opened. Always precedes that stream's changes.
    fn feed_opened(&self) {}

    /// One decoded change line, in wire order.
    fn change_occurred(&self, change: &Value);

    /// The stream was closed, by `stop`, by the server, or by an error.
    fn feed_closed(&self) {}
}

impl<H: ChangeHandler + ?Sized> ChangeHandler for Arc<H> {
    fn feed_opened(&self) {
        (**self).feed_opened()
    }

    fn change_occurred(&self, change: &Value) {
        (**self).change_occurred(change)
    }

    fn feed_closed(&self) {
        (**self).feed_closed()
    }
}

/// Callback fired on open or close.
pub type OnLifecycleCallback = Arc<dyn Fn() + Send + Sync>;

/// Callback fired for every change.
pub type OnChangeCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// A [`ChangeHandler`] assembled from closures. Unset callbacks do nothing.
#[derive(Clone, Default)]
pub struct HandlerFns {
    on_open: Option<OnLifecycleCallback>,
    on_change: Option<OnChangeCallback>,
    on_close: Option<OnLifecycleCallback>,
}

impl HandlerFns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_open(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(f));
        self
    }

    pub fn on_change(mut self, f: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.on_change = Some(Arc::new(f));
        self
    }

    pub fn on_close(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for HandlerFns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerFns")
            .field("on_open", &self.on_open.is_some())
            .field("on_change", &self.on_change.is_some())
            .field("on_close", &self.on_close.is_some())
            .finish()
    }
}

impl ChangeHandler for HandlerFns {
    fn feed_opened(&self) {
        if let Some(f) = &self.on_open {
            f();
        }
    }

    fn change_occurred(&self, change: &Value) {
        if let Some(f) = &self.on_change {
            f(change);
        }
    }

    fn feed_closed(&self) {
        if let Some(f) = &self.on_close {
            f();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_handler_fns_dispatch() {
        let opened = Arc::new(AtomicUsize::new(0));
        let changes = Arc::new(AtomicUsize::new(0));

        let handler = HandlerFns::new()
            .on_open({
                let opened = Arc::clone(&opened);
                move || {
                    opened.fetch_add(1, Ordering::SeqCst);
                }
            })
            .on_change({
                let changes = Arc::clone(&changes);
                move |change| {
                    assert_eq!(change["seq"], 1);
                    changes.fetch_add(1, Ordering::SeqCst);
                }
            });

        handler.feed_opened();
        handler.change_occurred(&serde_json::json!({"seq": 1}));
        handler.feed_closed();

        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(changes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_debug_shows_registered_callbacks() {
        let handler = HandlerFns::new().on_close(|| {});
        let debug = format!("{:?}", handler);
        assert!(debug.contains("on_close: true"));
        assert!(debug.contains("on_open: false"));
    }
}
