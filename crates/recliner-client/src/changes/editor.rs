//! Scoped, lock-holding access to a feed's session.

use std::ops::{Deref, DerefMut};

use parking_lot::MutexGuard;

use super::feed::FeedState;
use crate::session::Session;

/// Exclusive access to the [`Session`] of a running feed.
///
/// Holding an editor holds the feed's state lock, so every change made
/// through it is seen in full by the next request the feed issues and never
/// half-applied. Drop it promptly: the feed cannot read from its stream, and
/// `stop` cannot complete, while an editor is alive.
///
/// ```rust,no_run
/// # use recliner_client::{AuthMode, ChangesFeed};
/// # fn demo(feed: &ChangesFeed) -> recliner_client::Result<()> {
/// let mut session = feed.edit_session();
/// let saved = session.state().clone();
/// session.set_auth_mode(AuthMode::Basic);
/// session.get("/_node/_local/_config")?;
/// session.set_state(saved);
/// # Ok(())
/// # }
/// ```
pub struct SessionEditor<'a> {
    guard: MutexGuard<'a, FeedState>,
}

impl<'a> SessionEditor<'a> {
    pub(crate) fn new(guard: MutexGuard<'a, FeedState>) -> Self {
        Self { guard }
    }
}

impl Deref for SessionEditor<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.guard.session
    }
}

impl DerefMut for SessionEditor<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.guard.session
    }
}
