//! In-memory transport driven by a script.
//!
//! Used by the test suites and handy for exercising feed handlers offline:
//! canned responses are returned in order, and streams are fed line by line
//! from the test through a [`StreamScript`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use parking_lot::Mutex;

use super::{HeaderMap, Method, StreamHandle, Transport, TransportRequest, TransportResponse};
use crate::error::{Error, Result};

const SCRIPTED_POLL_INTERVAL: Duration = Duration::from_millis(10);

enum ScriptedLine {
    Line(String),
    Fail(String),
}

struct PendingStream {
    response: TransportResponse,
    lines: Option<Receiver<ScriptedLine>>,
}

/// State shared between a scripted transport and all of its forks.
#[derive(Default)]
struct Script {
    responses: Mutex<VecDeque<TransportResponse>>,
    streams: Mutex<VecDeque<PendingStream>>,
    requests: Mutex<Vec<RecordedRequest>>,
    resets: AtomicUsize,
    next_id: AtomicU64,
}

/// A request as seen by the scripted transport.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: String,
    /// Whether the request was a stream open rather than an exchange.
    pub streaming: bool,
}

impl RecordedRequest {
    /// Header value by lower-case name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Feeds lines into one scripted stream.
///
/// Dropping every clone of the script ends the stream, which the feed sees
/// as the server closing the connection.
#[derive(Clone)]
pub struct StreamScript {
    tx: Sender<ScriptedLine>,
}

impl StreamScript {
    /// Queue one line. Returns false once the stream has been closed on the
    /// reading side.
    pub fn send_line(&self, line: impl Into<String>) -> bool {
        self.tx.send(ScriptedLine::Line(line.into())).is_ok()
    }

    /// Make the next read fail with a communication error.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.tx.send(ScriptedLine::Fail(reason.into())).is_ok()
    }

    /// End the stream once the queued lines have been read.
    pub fn close(self) {}
}

/// Scripted [`Transport`] implementation.
///
/// Clones and forks share the script (queued responses, streams, recorded
/// requests) but each owns its own set of open streams, matching the
/// isolation that [`Transport::fork`] promises.
pub struct ScriptedTransport {
    script: Arc<Script>,
    open: Mutex<HashMap<u64, Receiver<ScriptedLine>>>,
    poll_interval: Duration,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Script::default()),
            open: Mutex::new(HashMap::new()),
            poll_interval: SCRIPTED_POLL_INTERVAL,
        }
    }

    /// Set how long `read_line` waits before returning an empty line.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Queue the response for the next exchange.
    pub fn push_response(&self, response: TransportResponse) {
        self.script.responses.lock().push_back(response);
    }

    /// Queue a successful stream and return the script feeding it.
    pub fn push_stream(&self) -> StreamScript {
        let (tx, rx) = mpsc::channel();
        self.script.streams.lock().push_back(PendingStream {
            response: TransportResponse::ok(200, ""),
            lines: Some(rx),
        });
        StreamScript { tx }
    }

    /// Queue a successful stream that yields `lines` and then ends.
    pub fn push_stream_lines<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let script = self.push_stream();
        for line in lines {
            script.send_line(line);
        }
    }

    /// Queue a stream open that fails with `response`.
    pub fn push_stream_failure(&self, response: TransportResponse) {
        self.script.streams.lock().push_back(PendingStream {
            response,
            lines: None,
        });
    }

    /// Every request issued so far, across all forks.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.script.requests.lock().clone()
    }

    /// The most recent request, across all forks.
    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.script.requests.lock().last().cloned()
    }

    /// How many times `reset` has been called, across all forks.
    pub fn resets(&self) -> usize {
        self.script.resets.load(Ordering::SeqCst)
    }

    /// Number of streams open through this instance.
    pub fn open_streams(&self) -> usize {
        self.open.lock().len()
    }

    fn record(&self, request: &TransportRequest, streaming: bool) {
        self.script.requests.lock().push(RecordedRequest {
            method: request.method,
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            streaming,
        });
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for ScriptedTransport {
    fn clone(&self) -> Self {
        Self {
            script: Arc::clone(&self.script),
            open: Mutex::new(HashMap::new()),
            poll_interval: self.poll_interval,
        }
    }
}

impl Transport for ScriptedTransport {
    fn execute(&self, request: &TransportRequest) -> TransportResponse {
        self.record(request, false);
        self.script
            .responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| TransportResponse::unreachable("no scripted response"))
    }

    fn open_stream(&self, request: &TransportRequest) -> (TransportResponse, StreamHandle) {
        self.record(request, true);
        let Some(pending) = self.script.streams.lock().pop_front() else {
            return (
                TransportResponse::unreachable("no scripted stream"),
                StreamHandle::INVALID,
            );
        };

        match pending.lines {
            Some(lines) if !pending.response.failed => {
                let id = self.script.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                self.open.lock().insert(id, lines);
                (pending.response, StreamHandle::from_raw(id))
            }
            _ => (pending.response, StreamHandle::INVALID),
        }
    }

    fn read_line(&self, handle: StreamHandle) -> Result<Option<String>> {
        let Some(id) = handle.raw() else {
            return Ok(None);
        };

        let mut open = self.open.lock();
        let Some(lines) = open.get(&id) else {
            return Ok(None);
        };

        match lines.recv_timeout(self.poll_interval) {
            Ok(ScriptedLine::Line(line)) => Ok(Some(line)),
            Ok(ScriptedLine::Fail(reason)) => {
                open.remove(&id);
                Err(Error::communication(reason, format!("stream {}", id)))
            }
            Err(RecvTimeoutError::Timeout) => Ok(Some(String::new())),
            Err(RecvTimeoutError::Disconnected) => {
                open.remove(&id);
                Ok(None)
            }
        }
    }

    fn reset(&self) {
        self.open.lock().clear();
        self.script.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn fork(&self) -> Arc<dyn Transport> {
        Arc::new(self.clone())
    }
}
