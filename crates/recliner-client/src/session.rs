//! Session state and request execution.
//!
//! A [`Session`] pairs a [`Transport`] with a [`SessionState`]: the base URL,
//! credentials, auth mode, session cookie, timeout and response cache that
//! shape every request. The state is a plain value; saving and restoring it
//! around a temporary change is a clone and an assignment.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::transport::{
    HeaderMap, HttpTransport, Method, StreamHandle, TimeoutMode, Transport, TransportRequest,
    TransportResponse,
};

/// Default server URL.
pub const DEFAULT_URL: &str = "http://localhost:5984";

/// Name of the cookie issued by `POST /_session`.
pub const SESSION_COOKIE: &str = "AuthSession";

/// Username/password pair.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn is_empty(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }

    /// Value for the `authorization` header.
    pub fn to_basic_auth(&self) -> String {
        format!(
            "Basic {}",
            STANDARD.encode(format!("{}:{}", self.username, self.password))
        )
    }

    /// Body for a cookie login.
    pub fn to_form_urlencoded(&self) -> String {
        format!(
            "name={}&password={}",
            urlencoding::encode(&self.username),
            urlencoding::encode(&self.password)
        )
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How credentials are presented to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    #[default]
    None,
    Basic,
    Cookie,
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::None => write!(f, "None"),
            AuthMode::Basic => write!(f, "Basic"),
            AuthMode::Cookie => write!(f, "Cookie"),
        }
    }
}

impl FromStr for AuthMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(AuthMode::None),
            "basic" => Ok(AuthMode::Basic),
            "cookie" => Ok(AuthMode::Cookie),
            other => Err(Error::invalid_argument(format!("unknown auth mode '{}'", other))),
        }
    }
}

/// Everything that shapes a request, as one copyable value.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    base_url: String,
    timeout: Option<Duration>,
    timeout_mode: TimeoutMode,
    credentials: Credentials,
    auth_mode: AuthMode,
    cookie: String,
    /// Request path -> raw response body.
    cache: HashMap<String, String>,
}

impl SessionState {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Change the server URL. Cached responses belong to the old origin and
    /// are dropped when the URL actually changes.
    pub fn set_base_url(&mut self, url: impl Into<String>) {
        let url = url.into();
        if url == self.base_url {
            return;
        }
        self.base_url = url;
        self.cache.clear();
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub fn timeout_mode(&self) -> TimeoutMode {
        self.timeout_mode
    }

    pub fn set_timeout_mode(&mut self, mode: TimeoutMode) {
        self.timeout_mode = mode;
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Replace the credentials. The stored session cookie belonged to the
    /// previous user and is cleared.
    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = credentials;
        self.cookie.clear();
    }

    pub fn auth_mode(&self) -> AuthMode {
        self.auth_mode
    }

    pub fn set_auth_mode(&mut self, mode: AuthMode) {
        self.auth_mode = mode;
    }

    /// Current session cookie, empty until a cookie login succeeds.
    pub fn cookie(&self) -> &str {
        &self.cookie
    }

    /// Cached raw body for `path`, if any.
    pub fn cached(&self, path: &str) -> Option<&str> {
        self.cache.get(path).map(String::as_str)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }
}

/// A transport plus the state used to drive it.
#[derive(Clone)]
pub struct Session {
    transport: Arc<dyn Transport>,
    state: SessionState,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a new session builder.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Session pointing at a local server over HTTP.
    pub fn localhost() -> Result<Self> {
        Self::builder().base_url(DEFAULT_URL).build()
    }

    pub fn new(transport: Arc<dyn Transport>, state: SessionState) -> Self {
        Self { transport, state }
    }

    /// An independent copy: the state is copied and the transport forked, so
    /// neither side can observe or close the other's streams.
    pub fn fork(&self) -> Self {
        Self {
            transport: self.transport.fork(),
            state: self.state.clone(),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    /// Restore a previously saved state.
    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    pub fn base_url(&self) -> &str {
        self.state.base_url()
    }

    pub fn set_base_url(&mut self, url: impl Into<String>) {
        self.state.set_base_url(url);
    }

    pub fn credentials(&self) -> &Credentials {
        self.state.credentials()
    }

    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.state.set_credentials(credentials);
    }

    pub fn auth_mode(&self) -> AuthMode {
        self.state.auth_mode()
    }

    pub fn set_auth_mode(&mut self, mode: AuthMode) {
        self.state.set_auth_mode(mode);
    }

    pub fn cookie(&self) -> &str {
        self.state.cookie()
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.state.set_timeout(timeout);
    }

    pub fn clear_cache(&mut self) {
        self.state.clear_cache();
    }

    /// GET `path` and decode the body.
    pub fn get(&mut self, path: &str) -> Result<Value> {
        self.request(path, Method::Get, HeaderMap::new(), "", false)
    }

    /// Issue a request and decode the body. An empty body decodes to `null`.
    pub fn request(
        &mut self,
        path: &str,
        method: Method,
        headers: HeaderMap,
        body: &str,
        cacheable: bool,
    ) -> Result<Value> {
        let raw = self.request_raw(path, method, headers, body, cacheable)?;
        if raw.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&raw)?)
    }

    /// Issue a request and return the raw body.
    ///
    /// `path` must already be percent-encoded and start with `/`. With
    /// `cacheable`, a successful body is remembered and returned for later
    /// requests to the same path without touching the network.
    pub fn request_raw(
        &mut self,
        path: &str,
        method: Method,
        headers: HeaderMap,
        body: &str,
        cacheable: bool,
    ) -> Result<String> {
        if let Some(cached) = self.state.cache.get(path) {
            trace!(path = %path, "response cache hit");
            return Ok(cached.clone());
        }

        let request = self.prepare(path, method, headers, body);
        let request_line = request.request_line();
        debug!(request = %request_line, "sending request");

        let response = self.transport.execute(&request);
        classify(&response, &request_line)?;
        self.harvest_cookie(&response);

        debug!(request = %request_line, status = ?response.status, "request complete");

        if cacheable && !response.failed {
            self.state
                .cache
                .insert(path.to_string(), response.body.clone());
        }

        Ok(response.body)
    }

    /// Log in with the stored credentials when using cookie auth.
    ///
    /// The login itself is sent unauthenticated; afterwards the previous
    /// state is restored together with the freshly issued cookie. Other auth
    /// modes need no login and return immediately.
    pub fn login(&mut self) -> Result<()> {
        if self.state.auth_mode != AuthMode::Cookie {
            return Ok(());
        }

        let saved = self.state.clone();
        self.state.auth_mode = AuthMode::None;

        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        );
        let body = saved.credentials.to_form_urlencoded();
        let result = self.request_raw("/_session", Method::Post, headers, &body, false);

        let cookie = std::mem::take(&mut self.state.cookie);
        self.state = saved;
        result?;

        if cookie.is_empty() {
            warn!(server = %self.state.base_url, "login succeeded but no session cookie was issued");
        }
        self.state.cookie = cookie;
        Ok(())
    }

    /// End a cookie session. The stored cookie is cleared even if the
    /// server rejects the request.
    pub fn logout(&mut self) -> Result<()> {
        let result = self.request_raw("/_session", Method::Delete, HeaderMap::new(), "", false);
        self.state.cookie.clear();
        result.map(|_| ())
    }

    /// Open a streaming request. Any failure status is an error here, since
    /// there is no handle to hand back.
    pub(crate) fn open_stream(&mut self, path: &str, headers: HeaderMap) -> Result<StreamHandle> {
        let request = self.prepare(path, Method::Get, headers, "");
        let request_line = request.request_line();
        debug!(request = %request_line, "opening stream");

        let (response, handle) = self.transport.open_stream(&request);
        classify(&response, &request_line)?;
        if handle.is_invalid() {
            return Err(Error::Communication {
                reason: if response.reason.is_empty() {
                    "stream could not be opened".to_string()
                } else {
                    response.reason.clone()
                },
                request: request_line,
                status: response.status,
                response: response.body,
            });
        }
        self.harvest_cookie(&response);
        Ok(handle)
    }

    /// Build the transport request: lower-cased headers, JSON defaults, a
    /// content length, and the auth header for the current mode.
    fn prepare(
        &self,
        path: &str,
        method: Method,
        headers: HeaderMap,
        body: &str,
    ) -> TransportRequest {
        let mut headers: HeaderMap = headers
            .into_iter()
            .map(|(key, value)| (key.to_ascii_lowercase(), value))
            .collect();

        headers
            .entry("content-type".to_string())
            .or_insert_with(|| "application/json".to_string());
        headers
            .entry("accept".to_string())
            .or_insert_with(|| "application/json".to_string());
        headers
            .entry("content-length".to_string())
            .or_insert_with(|| body.len().to_string());

        match self.state.auth_mode {
            AuthMode::Basic => {
                headers.insert(
                    "authorization".to_string(),
                    self.state.credentials.to_basic_auth(),
                );
            }
            AuthMode::Cookie => {
                headers.insert("cookie".to_string(), self.state.cookie.clone());
            }
            AuthMode::None => {}
        }

        TransportRequest {
            url: format!("{}{}", self.state.base_url, path),
            method,
            headers,
            body: body.to_string(),
            timeout: self.state.timeout,
            timeout_mode: self.state.timeout_mode,
        }
    }

    /// Adopt the session cookie from a `set-cookie` header. A header without
    /// a session cookie clears the stored one; no header leaves it alone.
    fn harvest_cookie(&mut self, response: &TransportResponse) {
        let Some(set_cookie) = response.headers.get("set-cookie") else {
            return;
        };

        self.state.cookie = set_cookie
            .split(';')
            .map(str::trim)
            .find(|attr| attr.starts_with(SESSION_COOKIE))
            .map(str::to_string)
            .unwrap_or_default();
    }
}

/// Map a failed response onto the error taxonomy.
///
/// Client errors other than 401/403/404/409/410 are application-level
/// answers and are returned to the caller as ordinary bodies.
fn classify(response: &TransportResponse, request_line: &str) -> Result<()> {
    if !response.failed {
        return Ok(());
    }

    let reason = response.reason.clone();
    let request = request_line.to_string();
    let body = response.body.clone();

    let Some(status) = response.status else {
        debug!(request = %request_line, reason = %reason, "request failed before a response arrived");
        return Err(Error::Communication {
            reason,
            request,
            status: None,
            response: body,
        });
    };

    debug!(request = %request_line, status, reason = %reason, "request failed");

    match status {
        401 | 403 => Err(Error::Forbidden {
            reason,
            request,
            status,
            response: body,
        }),
        409 => Err(Error::Conflict {
            reason,
            request,
            status,
            response: body,
        }),
        404 | 410 => Err(Error::NotFound {
            reason,
            request,
            status,
            response: body,
        }),
        400..=499 => Ok(()),
        _ => Err(Error::Communication {
            reason,
            request,
            status: Some(status),
            response: body,
        }),
    }
}

/// Builder for creating a [`Session`].
pub struct SessionBuilder {
    base_url: Option<String>,
    credentials: Credentials,
    auth_mode: AuthMode,
    timeout: Option<Duration>,
    timeout_mode: TimeoutMode,
    transport: Option<Arc<dyn Transport>>,
}

impl SessionBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            base_url: None,
            credentials: Credentials::default(),
            auth_mode: AuthMode::None,
            timeout: None,
            timeout_mode: TimeoutMode::Total,
            transport: None,
        }
    }

    /// Set the server URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the credentials.
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set how credentials are presented.
    pub fn auth_mode(mut self, mode: AuthMode) -> Self {
        self.auth_mode = mode;
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set how the timeout is applied.
    pub fn timeout_mode(mut self, mode: TimeoutMode) -> Self {
        self.timeout_mode = mode;
        self
    }

    /// Use a specific transport instead of the default HTTP one.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the session.
    pub fn build(self) -> Result<Session> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::Config("base_url is required".to_string()))?;

        let parsed = Url::parse(&base_url)
            .map_err(|e| Error::Config(format!("invalid base_url '{}': {}", base_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "unsupported scheme '{}' in base_url",
                parsed.scheme()
            )));
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new()?),
        };

        let mut state = SessionState::new(base_url.trim_end_matches('/'));
        state.timeout = self.timeout;
        state.timeout_mode = self.timeout_mode;
        state.credentials = self.credentials;
        state.auth_mode = self.auth_mode;

        Ok(Session::new(transport, state))
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ScriptedTransport;

    fn session(transport: &ScriptedTransport) -> Session {
        Session::builder()
            .base_url("http://couch.local:5984/")
            .transport(Arc::new(transport.clone()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_base_url() {
        let result = SessionBuilder::new().build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_builder_rejects_unsupported_scheme() {
        let result = Session::builder()
            .base_url("ftp://couch.local")
            .transport(Arc::new(ScriptedTransport::new()))
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_builder_trims_trailing_slash() {
        let transport = ScriptedTransport::new();
        assert_eq!(session(&transport).base_url(), "http://couch.local:5984");
    }

    #[test]
    fn test_default_headers_and_lowercasing() {
        let transport = ScriptedTransport::new();
        transport.push_response(TransportResponse::ok(200, "{\"ok\":true}"));
        let mut session = session(&transport);

        let mut headers = HeaderMap::new();
        headers.insert("X-Custom".to_string(), "1".to_string());
        headers.insert("Content-Type".to_string(), "text/plain".to_string());
        let body = session
            .request("/db", Method::Put, headers, "hello", false)
            .unwrap();
        assert_eq!(body["ok"], true);

        let request = transport.last_request().unwrap();
        assert_eq!(request.url, "http://couch.local:5984/db");
        assert_eq!(request.method, Method::Put);
        assert_eq!(request.header("x-custom"), Some("1"));
        assert_eq!(request.header("content-type"), Some("text/plain"));
        assert_eq!(request.header("accept"), Some("application/json"));
        assert_eq!(request.header("content-length"), Some("5"));
        assert_eq!(request.header("authorization"), None);
        assert_eq!(request.header("cookie"), None);
    }

    #[test]
    fn test_basic_auth_header() {
        let transport = ScriptedTransport::new();
        transport.push_response(TransportResponse::ok(200, "{}"));
        let mut session = session(&transport);
        session.set_credentials(Credentials::new("admin", "admin"));
        session.set_auth_mode(AuthMode::Basic);

        session.get("/_all_dbs").unwrap();
        let request = transport.last_request().unwrap();
        assert_eq!(request.header("authorization"), Some("Basic YWRtaW46YWRtaW4="));
    }

    #[test]
    fn test_cache_hit_skips_network() {
        let transport = ScriptedTransport::new();
        transport.push_response(TransportResponse::ok(200, "{\"version\":\"3.3\"}"));
        let mut session = session(&transport);

        let first = session
            .request("/", Method::Get, HeaderMap::new(), "", true)
            .unwrap();
        let second = session
            .request("/", Method::Get, HeaderMap::new(), "", true)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(session.state().cached("/"), Some("{\"version\":\"3.3\"}"));
    }

    #[test]
    fn test_base_url_change_clears_cache() {
        let transport = ScriptedTransport::new();
        transport.push_response(TransportResponse::ok(200, "{\"origin\":\"a\"}"));
        transport.push_response(TransportResponse::ok(200, "{\"origin\":\"b\"}"));
        let mut session = session(&transport);

        session
            .request("/", Method::Get, HeaderMap::new(), "", true)
            .unwrap();
        session.set_base_url("http://other.local:5984");
        assert_eq!(session.state().cache_len(), 0);

        let body = session
            .request("/", Method::Get, HeaderMap::new(), "", true)
            .unwrap();
        assert_eq!(body["origin"], "b");
        assert_eq!(transport.requests().len(), 2);

        // Setting the same URL again keeps the cache.
        session.set_base_url("http://other.local:5984");
        assert_eq!(session.state().cache_len(), 1);
    }

    #[test]
    fn test_failed_responses_are_not_cached() {
        let transport = ScriptedTransport::new();
        transport.push_response(TransportResponse::error(400, "Bad Request", "{\"error\":\"bad_request\"}"));
        let mut session = session(&transport);

        let body = session
            .request("/db/_find", Method::Post, HeaderMap::new(), "{}", true)
            .unwrap();
        assert_eq!(body["error"], "bad_request");
        assert_eq!(session.state().cache_len(), 0);
    }

    #[test]
    fn test_error_classification() {
        let cases: [(u16, fn(&Error) -> bool); 6] = [
            (401, Error::is_forbidden),
            (403, Error::is_forbidden),
            (409, Error::is_conflict),
            (404, Error::is_not_found),
            (410, Error::is_not_found),
            (500, Error::is_communication),
        ];

        for (status, check) in cases {
            let transport = ScriptedTransport::new();
            transport.push_response(TransportResponse::error(status, "nope", "{}"));
            let mut session = session(&transport);

            let err = session.get("/db/doc").unwrap_err();
            assert!(check(&err), "status {} mapped to {:?}", status, err);
            assert_eq!(err.status(), Some(status));
            assert!(err.to_string().contains("GET http://couch.local:5984/db/doc"));
        }
    }

    #[test]
    fn test_network_failure_has_no_status() {
        let transport = ScriptedTransport::new();
        transport.push_response(TransportResponse::unreachable("connection refused"));
        let mut session = session(&transport);

        let err = session.get("/").unwrap_err();
        assert!(err.is_communication());
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_unclassified_client_error_is_returned() {
        let transport = ScriptedTransport::new();
        transport.push_response(TransportResponse::error(412, "Precondition Failed", "{\"error\":\"file_exists\"}"));
        let mut session = session(&transport);

        let body = session
            .request("/db", Method::Put, HeaderMap::new(), "", false)
            .unwrap();
        assert_eq!(body["error"], "file_exists");
    }

    #[test]
    fn test_malformed_body_is_decode_error() {
        let transport = ScriptedTransport::new();
        transport.push_response(TransportResponse::ok(200, "<html>"));
        let mut session = session(&transport);

        assert!(matches!(session.get("/"), Err(Error::Decode(_))));
    }

    #[test]
    fn test_empty_body_decodes_to_null() {
        let transport = ScriptedTransport::new();
        transport.push_response(TransportResponse::ok(200, ""));
        let mut session = session(&transport);

        let body = session
            .request("/db", Method::Head, HeaderMap::new(), "", false)
            .unwrap();
        assert!(body.is_null());
    }

    #[test]
    fn test_cookie_harvesting() {
        let transport = ScriptedTransport::new();
        transport.push_response(
            TransportResponse::ok(200, "{}")
                .with_header("Set-Cookie", "AuthSession=abc123; Version=1; Path=/; HttpOnly"),
        );
        transport.push_response(TransportResponse::ok(200, "{}"));
        transport.push_response(TransportResponse::ok(200, "{}").with_header("set-cookie", "other=1; Path=/"));
        let mut session = session(&transport);

        session.get("/_session").unwrap();
        assert_eq!(session.cookie(), "AuthSession=abc123");

        // No set-cookie header: cookie untouched.
        session.get("/").unwrap();
        assert_eq!(session.cookie(), "AuthSession=abc123");

        // set-cookie without a session cookie: cleared.
        session.get("/").unwrap();
        assert_eq!(session.cookie(), "");
    }

    #[test]
    fn test_login_uses_form_and_restores_auth_mode() {
        let transport = ScriptedTransport::new();
        transport.push_response(
            TransportResponse::ok(200, "{\"ok\":true}")
                .with_header("set-cookie", "AuthSession=token; Path=/"),
        );
        transport.push_response(TransportResponse::ok(200, "[]"));
        let mut session = session(&transport);
        session.set_credentials(Credentials::new("ann", "p@ss word"));
        session.set_auth_mode(AuthMode::Cookie);

        session.login().unwrap();
        assert_eq!(session.auth_mode(), AuthMode::Cookie);
        assert_eq!(session.cookie(), "AuthSession=token");

        let login = transport.last_request().unwrap();
        assert_eq!(login.method, Method::Post);
        assert!(login.url.ends_with("/_session"));
        assert_eq!(login.header("content-type"), Some("application/x-www-form-urlencoded"));
        assert_eq!(login.header("cookie"), None);
        assert_eq!(login.body, "name=ann&password=p%40ss%20word");

        session.get("/_all_dbs").unwrap();
        let next = transport.last_request().unwrap();
        assert_eq!(next.header("cookie"), Some("AuthSession=token"));
    }

    #[test]
    fn test_login_is_noop_without_cookie_auth() {
        let transport = ScriptedTransport::new();
        let mut session = session(&transport);
        session.set_auth_mode(AuthMode::Basic);

        session.login().unwrap();
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn test_logout_clears_cookie_even_on_failure() {
        let transport = ScriptedTransport::new();
        transport.push_response(
            TransportResponse::ok(200, "{}").with_header("set-cookie", "AuthSession=t"),
        );
        transport.push_response(TransportResponse::unreachable("connection reset"));
        let mut session = session(&transport);

        session.get("/_session").unwrap();
        assert!(session.logout().is_err());
        assert_eq!(session.cookie(), "");
    }

    #[test]
    fn test_set_credentials_clears_cookie() {
        let mut state = SessionState::new(DEFAULT_URL);
        state.cookie = "AuthSession=old".to_string();
        state.set_credentials(Credentials::new("bob", "secret"));
        assert_eq!(state.cookie(), "");
    }

    #[test]
    fn test_state_save_and_restore() {
        let transport = ScriptedTransport::new();
        let mut session = session(&transport);
        session.set_auth_mode(AuthMode::Basic);

        let saved = session.state().clone();
        session.set_base_url("http://admin.local:5986");
        session.set_auth_mode(AuthMode::None);

        session.set_state(saved);
        assert_eq!(session.base_url(), "http://couch.local:5984");
        assert_eq!(session.auth_mode(), AuthMode::Basic);
    }

    #[test]
    fn test_auth_mode_parsing() {
        assert_eq!("BASIC".parse::<AuthMode>().unwrap(), AuthMode::Basic);
        assert_eq!("cookie".parse::<AuthMode>().unwrap(), AuthMode::Cookie);
        assert_eq!("None".parse::<AuthMode>().unwrap(), AuthMode::None);
        assert!("bearer".parse::<AuthMode>().is_err());
        assert_eq!(AuthMode::Cookie.to_string(), "Cookie");
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let credentials = Credentials::new("admin", "hunter2");
        let debug = format!("{:?}", credentials);
        assert!(debug.contains("admin"));
        assert!(!debug.contains("hunter2"));
    }
}
