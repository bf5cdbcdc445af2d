//! Common test utilities for integration tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use recliner_client::{ChangeHandler, ScriptedTransport, Session};
use serde_json::Value;

/// One handler notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Opened,
    Change(Value),
    Closed,
}

/// Handler that records every notification in order.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn count(&self, wanted: &Event) -> usize {
        self.events.lock().iter().filter(|e| *e == wanted).count()
    }

    /// `seq` of every change, in delivery order.
    pub fn seqs(&self) -> Vec<u64> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Change(change) => change["seq"].as_u64(),
                _ => None,
            })
            .collect()
    }
}

impl ChangeHandler for Recorder {
    fn feed_opened(&self) {
        self.events.lock().push(Event::Opened);
    }

    fn change_occurred(&self, change: &Value) {
        self.events.lock().push(Event::Change(change.clone()));
    }

    fn feed_closed(&self) {
        self.events.lock().push(Event::Closed);
    }
}

/// A session talking to `transport`.
pub fn session(transport: &ScriptedTransport) -> Session {
    Session::builder()
        .base_url("http://couch.local:5984")
        .transport(Arc::new(transport.clone()))
        .build()
        .expect("session should build")
}

/// Poll `condition` until it holds or five seconds pass.
pub fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
