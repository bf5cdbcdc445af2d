//! Transport layer.
//!
//! The session and the change feed never talk HTTP directly. They hand a
//! fully prepared [`TransportRequest`] to a [`Transport`], which performs
//! either one blocking exchange or opens a long-lived response that is
//! consumed one line at a time through an opaque [`StreamHandle`].

use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

mod http;
mod scripted;

pub use http::{DEFAULT_POLL_INTERVAL, HttpTransport};
pub use scripted::{RecordedRequest, ScriptedTransport, StreamScript};

/// Request/response headers. Keys are always lower-case.
pub type HeaderMap = BTreeMap<String, String>;

/// HTTP verbs used by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Put,
    Post,
    Delete,
    /// CouchDB document copy.
    Copy,
}

impl Method {
    /// Upper-case verb as sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
            Method::Copy => "COPY",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an adapter applies the session timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutMode {
    /// The timeout bounds a whole exchange. Streams are not bounded.
    #[default]
    Total,
    /// The timeout bounds exchanges and the silence between two stream lines.
    Idle,
}

/// A fully prepared request.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// Absolute URL.
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: String,
    pub timeout: Option<Duration>,
    pub timeout_mode: TimeoutMode,
}

impl TransportRequest {
    /// `METHOD url`, used in logs and error reports.
    pub fn request_line(&self) -> String {
        format!("{} {}", self.method, self.url)
    }
}

/// Outcome of an exchange as reported by the adapter.
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    /// Status code, or `None` when the failure happened before a response.
    pub status: Option<u16>,
    /// Response headers with lower-case keys.
    pub headers: HeaderMap,
    pub body: String,
    /// Set for non-2xx responses and for network failures.
    pub failed: bool,
    /// Reason phrase or network error description.
    pub reason: String,
}

impl TransportResponse {
    /// A successful response with the given status and body.
    pub fn ok(status: u16, body: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            body: body.into(),
            reason: "OK".to_string(),
            ..Default::default()
        }
    }

    /// A failed response that did arrive from the server.
    pub fn error(status: u16, reason: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            body: body.into(),
            failed: true,
            reason: reason.into(),
            ..Default::default()
        }
    }

    /// A network failure with no response at all.
    pub fn unreachable(reason: impl Into<String>) -> Self {
        Self {
            failed: true,
            reason: reason.into(),
            ..Default::default()
        }
    }

    /// Add a response header; the key is lower-cased.
    pub fn with_header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.insert(key.to_ascii_lowercase(), value.into());
        self
    }
}

/// Opaque reference to an open streaming response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(Option<NonZeroU64>);

impl StreamHandle {
    /// Sentinel meaning "no stream is open".
    pub const INVALID: StreamHandle = StreamHandle(None);

    /// Wrap an adapter-assigned identifier. Zero maps to [`StreamHandle::INVALID`].
    pub fn from_raw(id: u64) -> Self {
        StreamHandle(NonZeroU64::new(id))
    }

    /// Adapter-assigned identifier, if valid.
    pub fn raw(&self) -> Option<u64> {
        self.0.map(NonZeroU64::get)
    }

    pub fn is_invalid(&self) -> bool {
        self.0.is_none()
    }
}

impl Default for StreamHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Capability used by [`Session`](crate::Session) to reach the server.
///
/// Implementations must be callable from several threads: a feed worker may
/// be blocked in [`read_line`](Transport::read_line) while another thread
/// issues a request through the same adapter.
pub trait Transport: Send + Sync {
    /// Perform one blocking request/response exchange.
    fn execute(&self, request: &TransportRequest) -> TransportResponse;

    /// Open a streaming response. The body is left unread and the returned
    /// handle is valid only when the response succeeded.
    fn open_stream(&self, request: &TransportRequest) -> (TransportResponse, StreamHandle);

    /// Read one line from an open stream, without its line terminator.
    ///
    /// Returns `Ok(Some(""))` when no line arrived within the adapter's poll
    /// interval, and `Ok(None)` once the stream has ended or the handle is
    /// unknown. Implementations must not block indefinitely.
    fn read_line(&self, handle: StreamHandle) -> Result<Option<String>>;

    /// Forcibly close every stream opened through this adapter.
    fn reset(&self);

    /// An adapter sharing this one's configuration but owning a separate set
    /// of streams, so that resetting one never closes the other's streams.
    fn fork(&self) -> Arc<dyn Transport>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_handle_sentinel() {
        assert!(StreamHandle::INVALID.is_invalid());
        assert!(StreamHandle::default().is_invalid());
        assert!(StreamHandle::from_raw(0).is_invalid());

        let handle = StreamHandle::from_raw(7);
        assert!(!handle.is_invalid());
        assert_eq!(handle.raw(), Some(7));
    }

    #[test]
    fn test_method_verbs() {
        assert_eq!(Method::Copy.as_str(), "COPY");
        assert_eq!(Method::Get.to_string(), "GET");
    }

    #[test]
    fn test_response_header_keys_lowercased() {
        let response = TransportResponse::ok(200, "{}").with_header("Set-Cookie", "a=b");
        assert_eq!(response.headers.get("set-cookie").map(String::as_str), Some("a=b"));
        assert!(!response.failed);
    }
}
