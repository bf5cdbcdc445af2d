//! Query options for opening a change stream.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// How the server delivers changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedMode {
    /// One JSON object per line, kept open indefinitely.
    #[default]
    Continuous,
    /// A single response once at least one change is available.
    Longpoll,
    /// A single response with the changes known right now.
    Normal,
}

impl FeedMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedMode::Continuous => "continuous",
            FeedMode::Longpoll => "longpoll",
            FeedMode::Normal => "normal",
        }
    }
}

impl fmt::Display for FeedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "continuous" => Ok(FeedMode::Continuous),
            "longpoll" => Ok(FeedMode::Longpoll),
            "normal" => Ok(FeedMode::Normal),
            other => Err(Error::invalid_argument(format!("unknown feed mode '{}'", other))),
        }
    }
}

/// Options appended to `/<db>/_changes`.
///
/// Query pairs keep their insertion order; setting a key twice replaces the
/// earlier value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedOptions {
    pub mode: FeedMode,
    queries: Vec<(String, String)>,
}

impl FeedOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: FeedMode) -> Self {
        self.mode = mode;
        self
    }

    /// Start after the given sequence (`"now"` skips history).
    pub fn since(self, seq: impl Into<String>) -> Self {
        self.query("since", seq)
    }

    /// Ask the server for an empty line every `interval` of silence.
    pub fn heartbeat(self, interval: Duration) -> Self {
        self.query("heartbeat", interval.as_millis().to_string())
    }

    pub fn include_docs(self, include: bool) -> Self {
        self.query("include_docs", include.to_string())
    }

    /// Server-side filter function, e.g. `design/by_type`.
    pub fn filter(self, name: impl Into<String>) -> Self {
        self.query("filter", name)
    }

    pub fn limit(self, limit: u64) -> Self {
        self.query("limit", limit.to_string())
    }

    /// Set an arbitrary query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.queries.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = value,
            None => self.queries.push((key, value)),
        }
        self
    }

    pub fn queries(&self) -> &[(String, String)] {
        &self.queries
    }

    /// Query string without the leading `?`, `feed` first.
    pub fn to_query_string(&self) -> String {
        let mut query = format!("feed={}", self.mode);
        for (key, value) in &self.queries {
            query.push('&');
            query.push_str(&urlencoding::encode(key));
            query.push('=');
            query.push_str(&urlencoding::encode(value));
        }
        query
    }
}
