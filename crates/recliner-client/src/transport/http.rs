//! reqwest-backed transport.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::{Client, RequestBuilder, Response};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::{HeaderMap, StreamHandle, TimeoutMode, Transport, TransportRequest, TransportResponse};
use crate::error::{Error, Result};

/// How long [`HttpTransport::read_line`](Transport::read_line) waits for a
/// line before reporting an empty one.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A stream whose body is being pumped by a reader task.
struct OpenStream {
    lines: Receiver<io::Result<String>>,
    reader: JoinHandle<()>,
    idle_timeout: Option<Duration>,
    last_line: Instant,
    request_line: String,
}

impl Drop for OpenStream {
    fn drop(&mut self) {
        // Dropping the response mid-body makes hyper close the connection.
        self.reader.abort();
    }
}

/// HTTP transport built on reqwest and a small private tokio runtime.
///
/// Exchanges block the calling thread on the runtime. Streaming bodies are
/// read by one runtime task per stream and handed over through a channel,
/// which keeps [`read_line`](Transport::read_line) bounded by the poll
/// interval. Closing a stream ([`reset`](Transport::reset), end of body, read
/// error or idle timeout) aborts its task, which drops the response and the
/// connection with it.
///
/// Like `reqwest::blocking`, the adapter must not be driven from inside
/// another tokio runtime.
pub struct HttpTransport {
    client: Client,
    runtime: Arc<Runtime>,
    poll_interval: Duration,
    streams: Mutex<HashMap<u64, OpenStream>>,
    next_id: AtomicU64,
}

impl HttpTransport {
    /// Create a transport with a fresh connection pool.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("recliner/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;
        Self::with_client(client)
    }

    /// Create a transport around an existing client.
    ///
    /// Streams stay open indefinitely, so the client should not carry a
    /// total timeout; exchanges get the session's per-request timeout.
    pub fn with_client(client: Client) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("recliner-http")
            .enable_all()
            .build()?;

        Ok(Self {
            client,
            runtime: Arc::new(runtime),
            poll_interval: DEFAULT_POLL_INTERVAL,
            streams: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Set how long `read_line` waits before returning an empty line.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Number of streams currently open through this adapter.
    pub fn open_streams(&self) -> usize {
        self.streams.lock().len()
    }

    fn builder(&self, request: &TransportRequest) -> std::result::Result<RequestBuilder, String> {
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| format!("invalid method {}: {}", request.method, e))?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .body(request.body.clone());

        for (key, value) in &request.headers {
            // reqwest derives the length from the body.
            if key == "content-length" {
                continue;
            }
            builder = builder.header(key.as_str(), value.as_str());
        }

        Ok(builder)
    }
}

impl Transport for HttpTransport {
    fn execute(&self, request: &TransportRequest) -> TransportResponse {
        let mut builder = match self.builder(request) {
            Ok(builder) => builder,
            Err(reason) => return TransportResponse::unreachable(reason),
        };
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        trace!(request = %request.request_line(), body = %request.body, "sending request");

        self.runtime.block_on(async move {
            match builder.send().await {
                Ok(response) => {
                    let mut result = response_head(&response);
                    match response.text().await {
                        Ok(body) => result.body = body,
                        Err(e) => return TransportResponse::unreachable(e.to_string()),
                    }
                    result
                }
                Err(e) => TransportResponse::unreachable(e.to_string()),
            }
        })
    }

    fn open_stream(&self, request: &TransportRequest) -> (TransportResponse, StreamHandle) {
        let builder = match self.builder(request) {
            Ok(builder) => builder,
            Err(reason) => return (TransportResponse::unreachable(reason), StreamHandle::INVALID),
        };

        let response = match self.runtime.block_on(builder.send()) {
            Ok(response) => response,
            Err(e) => {
                return (
                    TransportResponse::unreachable(e.to_string()),
                    StreamHandle::INVALID,
                );
            }
        };

        let mut head = response_head(&response);
        if head.failed {
            head.body = self.runtime.block_on(response.text()).unwrap_or_default();
            return (head, StreamHandle::INVALID);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        let reader = self.runtime.spawn(pump_lines(id, response, tx));

        let idle_timeout = match request.timeout_mode {
            TimeoutMode::Idle => request.timeout,
            TimeoutMode::Total => None,
        };
        self.streams.lock().insert(
            id,
            OpenStream {
                lines: rx,
                reader,
                idle_timeout,
                last_line: Instant::now(),
                request_line: request.request_line(),
            },
        );

        debug!(stream = id, request = %request.request_line(), "stream opened");
        (head, StreamHandle::from_raw(id))
    }

    fn read_line(&self, handle: StreamHandle) -> Result<Option<String>> {
        let Some(id) = handle.raw() else {
            return Ok(None);
        };

        let mut streams = self.streams.lock();
        let Some(stream) = streams.get_mut(&id) else {
            return Ok(None);
        };

        match stream.lines.recv_timeout(self.poll_interval) {
            Ok(Ok(line)) => {
                stream.last_line = Instant::now();
                Ok(Some(trim_line_end(line)))
            }
            Ok(Err(e)) => {
                let request_line = stream.request_line.clone();
                streams.remove(&id);
                Err(Error::communication(e.to_string(), request_line))
            }
            Err(RecvTimeoutError::Timeout) => {
                if let Some(limit) = stream.idle_timeout {
                    if stream.last_line.elapsed() >= limit {
                        let request_line = stream.request_line.clone();
                        streams.remove(&id);
                        return Err(Error::communication(
                            format!("stream idle for more than {:?}", limit),
                            request_line,
                        ));
                    }
                }
                Ok(Some(String::new()))
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!(stream = id, "stream ended");
                streams.remove(&id);
                Ok(None)
            }
        }
    }

    fn reset(&self) {
        let mut streams = self.streams.lock();
        if !streams.is_empty() {
            debug!(count = streams.len(), "closing open streams");
        }
        streams.clear();
    }

    fn fork(&self) -> Arc<dyn Transport> {
        Arc::new(Self {
            client: self.client.clone(),
            runtime: Arc::clone(&self.runtime),
            poll_interval: self.poll_interval,
            streams: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }
}

/// Status, reason and headers of a response, without its body.
fn response_head(response: &Response) -> TransportResponse {
    let status = response.status();
    TransportResponse {
        status: Some(status.as_u16()),
        headers: collect_headers(response.headers()),
        body: String::new(),
        failed: !status.is_success(),
        reason: status.canonical_reason().unwrap_or_default().to_string(),
    }
}

/// Lower-case header map. Repeated headers are joined with `"; "` so that
/// every `set-cookie` attribute stays visible to the session.
fn collect_headers(headers: &reqwest::header::HeaderMap) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        map.entry(name.as_str().to_ascii_lowercase())
            .and_modify(|existing: &mut String| {
                existing.push_str("; ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    map
}

fn trim_line_end(mut line: String) -> String {
    while line.ends_with(['\r', '\n']) {
        line.pop();
    }
    line
}


/// Reader task body: split the body into lines and forward them until the
/// body ends, a read fails, or the receiver goes away.
async fn pump_lines(id: u64, mut response: Response, tx: Sender<io::Result<String>>) {
    let mut pending: Vec<u8> = Vec::new();
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                pending.extend_from_slice(&chunk);
                while let Some(end) = pending.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=end).collect();
                    if tx.send(Ok(String::from_utf8_lossy(&line).into_owned())).is_err() {
                        return;
                    }
                }
            }
            Ok(None) => {
                if !pending.is_empty() {
                    let _ = tx.send(Ok(String::from_utf8_lossy(&pending).into_owned()));
                }
                break;
            }
            Err(e) => {
                warn!(stream = id, error = %e, "stream read failed");
                let _ = tx.send(Err(io::Error::other(e)));
                break;
            }
        }
    }
    trace!(stream = id, "stream reader exiting");
}
