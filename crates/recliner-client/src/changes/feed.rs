//! The change-feed engine.
//!
//! A [`ChangesFeed`] owns a private fork of a [`Session`] and drives one
//! streaming `_changes` request at a time, either inline on the caller's
//! thread ([`run`](ChangesFeed::run)) or on a single worker thread
//! ([`start_in_new_thread`](ChangesFeed::start_in_new_thread)).
//!
//! Two locks guard disjoint data: the state lock (session, stream handle,
//! stop flag, pause backlog, filters) and the error lock (last worker
//! error). Neither is held while the handler runs, and they are never held
//! together.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::{Condvar, Mutex, MutexGuard};
use serde_json::Value;
use tracing::{debug, trace, warn};

use super::editor::SessionEditor;
use super::filter::{ChangeFilter, IgnoreRule};
use super::handler::ChangeHandler;
use super::options::{FeedMode, FeedOptions};
use crate::error::{Error, Result};
use crate::session::Session;
use crate::transport::{HeaderMap, StreamHandle};

/// Everything guarded by the state lock.
pub(crate) struct FeedState {
    pub(crate) session: Session,
    handle: StreamHandle,
    /// Set by `stop` while no stream is open; serviced by the next `start`.
    stop_requested: bool,
    /// A stream is open but `feed_opened` has not been delivered yet.
    opening: bool,
    /// The stream was closed while `opening`; `start` owes a `feed_closed`.
    close_pending: bool,
    paused: bool,
    backlog: VecDeque<String>,
    filter: ChangeFilter,
    mode: FeedMode,
    /// Body of a longpoll/normal response, decoded once the stream ends.
    batch: String,
    /// Bumped for every stream opened.
    generation: u64,
    /// Thread currently inside `change_occurred`, if any.
    delivering: Option<ThreadId>,
}

impl FeedState {
    fn new(session: Session) -> Self {
        Self {
            session,
            handle: StreamHandle::INVALID,
            stop_requested: false,
            opening: false,
            close_pending: false,
            paused: false,
            backlog: VecDeque::new(),
            filter: ChangeFilter::default(),
            mode: FeedMode::default(),
            batch: String::new(),
            generation: 0,
            delivering: None,
        }
    }

    /// Close the open stream. Returns whether the caller must deliver
    /// `feed_closed`.
    fn invalidate(&mut self) -> bool {
        if self.handle.is_invalid() {
            return false;
        }
        self.session.transport().reset();
        self.handle = StreamHandle::INVALID;
        self.batch.clear();
        self.backlog.clear();
        if self.opening {
            self.close_pending = true;
            return false;
        }
        true
    }

    /// `stop` under the lock: close the stream, or defer the stop when no
    /// stream is open.
    fn request_stop(&mut self) -> bool {
        if self.handle.is_invalid() {
            if !self.opening {
                self.stop_requested = true;
            }
            return false;
        }
        self.invalidate()
    }
}

/// Outcome of one read under the state lock.
enum Step {
    /// Heartbeat, buffered, or suppressed line.
    Idle,
    /// One change to deliver, tagged with its stream generation.
    Deliver(Value, u64),
    /// The server ended the stream. Carries the rows of a batch response.
    Ended(Vec<Value>),
}

/// State shared between a feed, its worker thread and its stoppers.
struct FeedCore {
    database: String,
    path: String,
    handler: Box<dyn ChangeHandler>,
    state: Mutex<FeedState>,
    /// Signalled when a change delivery finishes.
    delivered: Condvar,
    last_error: Mutex<Option<Arc<Error>>>,
}

impl FeedCore {
    fn is_active(&self) -> bool {
        !self.state.lock().handle.is_invalid()
    }

    fn start(&self, options: &FeedOptions) -> Result<()> {
        let url = format!("{}/_changes?{}", self.path, options.to_query_string());

        let (generation, deferred_stop) = {
            let mut state = self.state.lock();
            if !state.handle.is_invalid() || state.opening {
                return Ok(());
            }

            state.handle = state.session.open_stream(&url, HeaderMap::new())?;
            state.generation += 1;
            state.mode = options.mode;
            state.batch.clear();
            state.backlog.clear();
            state.opening = true;

            let deferred_stop = std::mem::take(&mut state.stop_requested);
            if deferred_stop {
                state.invalidate();
            }
            (state.generation, deferred_stop)
        };

        debug!(database = %self.database, generation, "change feed opened");
        self.handler.feed_opened();

        let close_pending = {
            let mut state = self.state.lock();
            state.opening = false;
            std::mem::take(&mut state.close_pending)
        };

        if close_pending {
            if deferred_stop {
                debug!(database = %self.database, "servicing stop requested before start");
            }
            self.notify_closed();
        }
        Ok(())
    }

    fn wait_for_changes(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.handle.is_invalid() {
            return Ok(());
        }

        let (outcome, rows) = match Self::advance(&mut state) {
            Ok(Step::Idle) => return Ok(()),
            Ok(Step::Deliver(change, generation)) => {
                drop(state);
                self.deliver(&change, generation);
                return Ok(());
            }
            Ok(Step::Ended(rows)) => {
                debug!(database = %self.database, "change stream ended by server");
                (Ok(()), rows)
            }
            Err(e) => {
                debug!(database = %self.database, error = %e, "change feed failed");
                (Err(e), Vec::new())
            }
        };

        let notify = state.invalidate();
        drop(state);

        for row in &rows {
            self.handler.change_occurred(row);
        }
        if notify {
            self.notify_closed();
        }
        outcome
    }

    /// Read and classify one line. Called with the state lock held; the only
    /// blocking call is the adapter's poll-bounded `read_line`.
    fn advance(state: &mut FeedState) -> Result<Step> {
        let buffered = if state.paused {
            None
        } else {
            state.backlog.pop_front()
        };

        let line = match buffered {
            Some(line) => line,
            None => match state.session.transport().read_line(state.handle)? {
                Some(line) => line,
                None => return Self::finish_batch(state).map(Step::Ended),
            },
        };

        if state.mode != FeedMode::Continuous {
            state.batch.push_str(&line);
            state.batch.push('\n');
            return Ok(Step::Idle);
        }

        let line = line.trim();
        if line.is_empty() {
            return Ok(Step::Idle);
        }
        trace!(line = %line, "change line");

        if state.paused {
            state.backlog.push_back(line.to_string());
            return Ok(Step::Idle);
        }
        if state.filter.take_skip() {
            return Ok(Step::Idle);
        }

        let change: Value = serde_json::from_str(line)?;
        if state.filter.suppresses(&change) {
            return Ok(Step::Idle);
        }
        Ok(Step::Deliver(change, state.generation))
    }

    /// Decode a finished longpoll/normal body into the rows to deliver.
    fn finish_batch(state: &mut FeedState) -> Result<Vec<Value>> {
        let body = std::mem::take(&mut state.batch);
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut response: Value = serde_json::from_str(&body)?;
        let rows = match response.get_mut("results").map(Value::take) {
            Some(Value::Array(rows)) => rows,
            _ => return Ok(Vec::new()),
        };

        Ok(rows
            .into_iter()
            .filter(|row| !state.filter.take_skip() && !state.filter.suppresses(row))
            .collect())
    }

    /// Deliver a change unless its stream was closed since it was read.
    /// A concurrent `stop` waits for the delivery before `feed_closed`.
    fn deliver(&self, change: &Value, generation: u64) {
        {
            let mut state = self.state.lock();
            if state.handle.is_invalid() || state.generation != generation {
                trace!(database = %self.database, "dropping change from a closed stream");
                return;
            }
            state.delivering = Some(thread::current().id());
        }
        let _delivery = Delivery { core: self };
        self.handler.change_occurred(change);
    }

    /// Wait until no other thread is inside `change_occurred`.
    fn wait_for_delivery(&self, state: &mut MutexGuard<'_, FeedState>) {
        let current = thread::current().id();
        while state.delivering.is_some_and(|id| id != current) {
            self.delivered.wait(state);
        }
    }

    fn run(&self) -> Result<()> {
        while self.is_active() {
            self.wait_for_changes()?;
            thread::yield_now();
        }
        Ok(())
    }

    fn stop(&self) {
        let notify = {
            let mut state = self.state.lock();
            let notify = state.request_stop();
            if notify {
                self.wait_for_delivery(&mut state);
            }
            notify
        };
        if notify {
            self.notify_closed();
        }
    }

    fn try_stop(&self) -> bool {
        let Some(mut state) = self.state.try_lock() else {
            return false;
        };
        let current = thread::current().id();
        if state.delivering.is_some_and(|id| id != current) {
            return false;
        }
        let notify = state.request_stop();
        drop(state);
        if notify {
            self.notify_closed();
        }
        true
    }

    fn notify_closed(&self) {
        debug!(database = %self.database, "change feed closed");
        self.handler.feed_closed();
    }

    fn record_error(&self, error: Error) {
        warn!(database = %self.database, error = %error, "change feed worker stopped with an error");
        *self.last_error.lock() = Some(Arc::new(error));
    }

    /// Worker thread body.
    fn work(&self, options: Option<FeedOptions>) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            if let Some(options) = &options {
                self.start(options)?;
            }
            self.run()
        }));

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.record_error(e),
            Err(payload) => self.record_error(Error::WorkerPanicked(panic_message(payload.as_ref()))),
        }

        let notify = {
            let mut state = self.state.lock();
            if std::mem::take(&mut state.stop_requested) {
                debug!(database = %self.database, "servicing stop requested while finishing");
            }
            state.opening = false;
            state.close_pending = false;
            state.invalidate()
        };
        if notify {
            self.notify_closed();
        }
        debug!(database = %self.database, "change feed worker exiting");
    }
}

/// Clears the delivery marker when `change_occurred` returns or unwinds.
struct Delivery<'a> {
    core: &'a FeedCore,
}

impl Drop for Delivery<'_> {
    fn drop(&mut self) {
        self.core.state.lock().delivering = None;
        self.core.delivered.notify_all();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return message.to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic".to_string()
}

/// A subscription to one database's change stream.
///
/// Dropping the feed stops it and waits for its worker, unless the drop
/// happens on the worker thread itself, in which case the worker is
/// detached.
pub struct ChangesFeed {
    core: Arc<FeedCore>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ChangesFeed {
    /// Create a feed for `database`, seeded with a fork of `session`.
    pub fn new(
        session: &Session,
        database: impl Into<String>,
        handler: impl ChangeHandler + 'static,
    ) -> Result<Self> {
        let database = database.into();
        if database.is_empty() {
            return Err(Error::invalid_argument("database name must not be empty"));
        }

        let path = format!("/{}", urlencoding::encode(&database));
        Ok(Self {
            core: Arc::new(FeedCore {
                database,
                path,
                handler: Box::new(handler),
                state: Mutex::new(FeedState::new(session.fork())),
                delivered: Condvar::new(),
                last_error: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        })
    }

    pub fn database_name(&self) -> &str {
        &self.core.database
    }

    /// Percent-encoded database path, e.g. `/my%2Fdb`.
    pub fn database_path(&self) -> &str {
        &self.core.path
    }

    /// Whether a stream is currently open.
    pub fn is_active(&self) -> bool {
        self.core.is_active()
    }

    /// Open the stream. No-op while already active.
    ///
    /// If [`stop`](Self::stop) was called while idle, the freshly opened
    /// stream is closed again right away: the handler sees `feed_opened`
    /// followed by `feed_closed` and no changes.
    pub fn start(&self, options: &FeedOptions) -> Result<()> {
        self.core.start(options)
    }

    /// Block for at most one line and deliver it.
    ///
    /// Empty lines are heartbeats and deliver nothing. Any error closes the
    /// feed (`feed_closed` fires once) and is returned.
    pub fn wait_for_changes(&self) -> Result<()> {
        self.core.wait_for_changes()
    }

    /// Deliver changes until the stream closes.
    pub fn run(&self) -> Result<()> {
        self.core.run()
    }

    /// Close the stream and deliver `feed_closed` before returning. When no
    /// stream is open, the stop is remembered for the next `start`.
    ///
    /// A change being delivered on another thread finishes before
    /// `feed_closed` fires, so a handler must not block on a thread that is
    /// itself stopping the feed.
    pub fn stop(&self) {
        self.core.stop()
    }

    /// Like [`stop`](Self::stop) but gives up, returning false, when the
    /// state lock is busy or another thread is delivering a change.
    pub fn try_stop(&self) -> bool {
        self.core.try_stop()
    }

    /// A cheap handle that can stop this feed from inside its handler.
    pub fn stopper(&self) -> FeedStopper {
        FeedStopper {
            core: Arc::downgrade(&self.core),
        }
    }

    /// `start` then `run` on a new worker thread.
    ///
    /// Errors and panics inside the worker are recorded in the error slot
    /// rather than escaping; see [`last_error`](Self::last_error).
    pub fn start_in_new_thread(&self, options: FeedOptions) -> Result<()> {
        self.spawn_worker(Some(options))
    }

    /// `run` on a new worker thread, for a feed that was started inline.
    pub fn run_in_thread(&self) -> Result<()> {
        self.spawn_worker(None)
    }

    fn spawn_worker(&self, options: Option<FeedOptions>) -> Result<()> {
        let mut worker = self.worker.lock();
        if let Some(handle) = worker.as_ref() {
            if !handle.is_finished() {
                return Err(Error::invalid_argument(format!(
                    "change feed worker for '{}' is already running",
                    self.core.database
                )));
            }
        }
        if let Some(finished) = worker.take() {
            let _ = finished.join();
        }

        self.core.last_error.lock().take();

        let core = Arc::clone(&self.core);
        let handle = thread::Builder::new()
            .name(format!("recliner-feed-{}", self.core.database))
            .spawn(move || core.work(options))?;

        debug!(database = %self.core.database, "change feed worker spawned");
        *worker = Some(handle);
        Ok(())
    }

    /// Whether a worker thread exists and has not finished.
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Join the worker without stopping the feed.
    pub fn wait_for_finish(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            self.join(handle);
        }
    }

    /// Stop the feed and join the worker. Once this returns no handler
    /// callback from this feed can still be running or start later.
    pub fn stop_and_wait_for_finish(&self) {
        self.core.stop();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if self.join(handle) {
                // The worker that would have serviced a deferred stop is gone.
                self.core.state.lock().stop_requested = false;
            }
        }
    }

    /// Stop the feed and let the worker finish unobserved.
    pub fn stop_and_detach(&self) {
        self.core.stop();
        drop(self.worker.lock().take());
    }

    /// Returns false when called on the worker thread itself, which detaches.
    fn join(&self, handle: JoinHandle<()>) -> bool {
        if handle.thread().id() == thread::current().id() {
            return false;
        }
        if handle.join().is_err() {
            warn!(database = %self.core.database, "change feed worker could not be joined");
        }
        true
    }

    pub fn error_was_raised(&self) -> bool {
        self.core.last_error.lock().is_some()
    }

    /// The error that ended the last worker run, if any.
    pub fn last_error(&self) -> Option<Arc<Error>> {
        self.core.last_error.lock().clone()
    }

    pub fn clear_error(&self) {
        self.core.last_error.lock().take();
    }

    /// Lock the feed's session for reading or mutation.
    ///
    /// The worker cannot read from the stream while the editor lives. The
    /// lock is not reentrant: holding two editors for the same feed on one
    /// thread deadlocks.
    pub fn edit_session(&self) -> SessionEditor<'_> {
        SessionEditor::new(self.core.state.lock())
    }

    /// Buffer incoming changes instead of delivering them.
    pub fn pause(&self) {
        self.core.state.lock().paused = true;
    }

    /// Resume delivery, first draining the buffered changes unless
    /// `ignore_previous` discards them.
    pub fn unpause(&self, ignore_previous: bool) {
        let mut state = self.core.state.lock();
        if ignore_previous {
            state.backlog.clear();
        }
        state.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.core.state.lock().paused
    }

    /// Number of changes buffered while paused.
    pub fn backlog_len(&self) -> usize {
        self.core.state.lock().backlog.len()
    }

    /// Drop the next `n` changes (at least one), whatever they contain.
    pub fn ignore_next(&self, n: u64) {
        self.core.state.lock().filter.ignore_next(n);
    }

    pub fn revert_ignore_next(&self, n: u64) {
        self.core.state.lock().filter.revert_ignore_next(n);
    }

    pub fn ignore(&self, rule: IgnoreRule) {
        self.core.state.lock().filter.ignore(rule);
    }

    pub fn revert_ignore(&self, rule: &IgnoreRule) -> bool {
        self.core.state.lock().filter.revert_ignore(rule)
    }

    /// Whether id-specific ignore rules are removed after suppressing one
    /// change. Enabled by default.
    pub fn consume_ignore_rules(&self, consume: bool) {
        self.core.state.lock().filter.consume_rules(consume);
    }

    /// Remove every ignore rule and counter, unpause, and drop the backlog.
    pub fn clear_filters(&self) {
        let mut state = self.core.state.lock();
        state.filter.clear();
        state.paused = false;
        state.backlog.clear();
    }
}

impl std::fmt::Debug for ChangesFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangesFeed")
            .field("database", &self.core.database)
            .field("path", &self.core.path)
            .finish_non_exhaustive()
    }
}

impl Drop for ChangesFeed {
    fn drop(&mut self) {
        self.core.stop();
        if let Some(handle) = self.worker.get_mut().take() {
            self.join(handle);
        }
    }
}

/// Stops a feed without owning it. Does nothing once the feed is dropped.
#[derive(Debug, Clone)]
pub struct FeedStopper {
    core: Weak<FeedCore>,
}

impl FeedStopper {
    pub fn stop(&self) {
        if let Some(core) = self.core.upgrade() {
            core.stop();
        }
    }

    pub fn try_stop(&self) -> bool {
        match self.core.upgrade() {
            Some(core) => core.try_stop(),
            None => true,
        }
    }
}
