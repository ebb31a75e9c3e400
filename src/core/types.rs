use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use super::reconnect::ReconnectPolicy;

/// Convenience result alias for transport operations.
pub type WebSocketResult<T> = Result<T, WebSocketError>;

/// Convenience result alias for client operations.
pub type WsEventResult<T> = Result<T, WsEventError>;

/// Correlation id linking an outbound event to exactly one expected response.
pub type CorrelationId = u64;

/// Transport-level error surface (connect, read, write).
#[derive(Debug, Error)]
pub enum WebSocketError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transport error ({context}): {error}")]
    TransportError {
        context: &'static str,
        error: String,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Public error taxonomy of the event client.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WsEventError {
    #[error("not connected")]
    NotConnected,

    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("encoding failed: {0}")]
    EncodingFailed(String),

    #[error("decoding failed: {0}")]
    DecodingFailed(String),

    #[error("ack {id} timed out")]
    AckTimeout { id: CorrelationId },

    #[error("reconnect exhausted after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("no listener for event `{0}`")]
    UnknownEvent(String),

    #[error("server error: code={code:?}, message={message}")]
    ServerError { code: Option<i64>, message: String },

    #[error("{0}")]
    Custom(String),
}

impl From<WebSocketError> for WsEventError {
    fn from(err: WebSocketError) -> Self {
        WsEventError::TransportUnavailable(err.to_string())
    }
}

/// Lifecycle state of one client instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum DisconnectCause {
    /// `disconnect()` was called.
    ClientRequested,
    /// The server sent a close packet.
    ServerClosed { error: Option<WsEventError> },
    /// The transport stream ended or delivered a close frame.
    RemoteClosed,
    ReadFailure { error: String },
    WriteFailure { error: String },
    /// No inbound traffic within the liveness window.
    PongTimeout,
    /// The session-open packet did not arrive in time.
    HandshakeTimeout,
}

impl DisconnectCause {
    pub fn reason(&self) -> String {
        match self {
            DisconnectCause::ClientRequested => "client disconnect".to_string(),
            DisconnectCause::ServerClosed { error: Some(err) } => format!("server closed: {err}"),
            DisconnectCause::ServerClosed { error: None } => "server closed".to_string(),
            DisconnectCause::RemoteClosed => "transport closed".to_string(),
            DisconnectCause::ReadFailure { error } => format!("read error: {error}"),
            DisconnectCause::WriteFailure { error } => format!("write error: {error}"),
            DisconnectCause::PongTimeout => "liveness timeout".to_string(),
            DisconnectCause::HandshakeTimeout => "handshake timeout".to_string(),
        }
    }
}

/// Transport-independent buffer sizing parameters used for websocket configuration.
#[derive(Clone, Copy, Debug)]
pub struct WebSocketBufferConfig {
    pub write_buffer_bytes: usize,
    pub max_write_buffer_bytes: usize,
    pub max_message_bytes: usize,
    pub max_frame_bytes: usize,
}

impl Default for WebSocketBufferConfig {
    fn default() -> Self {
        Self {
            write_buffer_bytes: 128 << 10,
            max_write_buffer_bytes: 256 << 10,
            max_message_bytes: 16 * 1024 * 1024,
            max_frame_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Engine-wide settings fixed at spawn time.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Keep-alive interval used until a handshake supplies one.
    pub ping_interval: Duration,
    /// Extra grace after `ping_interval` before the link is declared dead.
    pub ping_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Ack deadline used when `emit` does not pass one.
    pub ack_timeout: Duration,
    /// Bound on the best-effort close packet write during `disconnect()`.
    pub close_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub buffers: WebSocketBufferConfig,
    pub report_unhandled_events: bool,
    pub replay_stored_on_connect: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(25),
            ping_timeout: Duration::from_secs(20),
            handshake_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(5),
            close_timeout: Duration::from_secs(1),
            reconnect: ReconnectPolicy::default(),
            buffers: WebSocketBufferConfig::default(),
            report_unhandled_events: false,
            replay_stored_on_connect: false,
        }
    }
}

/// Per-`connect()` options merged into the target URL.
#[derive(Clone, Debug, Default)]
pub struct ConnectOptions {
    /// Replaces the URL path when set (e.g. `/events`).
    pub path: Option<String>,
    /// Extra query parameters, appended in order.
    pub query: Vec<(String, String)>,
    /// Credentials sent as query parameters of the upgrade request.
    ///
    /// Query strings can show up in server and proxy access logs, so prefer short-lived tokens.
    /// Log lines from this crate print the target without its query (see [`redacted_url`]).
    pub auth: BTreeMap<String, String>,
}

impl ConnectOptions {
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_auth(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.auth.insert(key.into(), value.into());
        self
    }

    /// Build the final target URL.
    pub fn resolve(&self, target: &str) -> WsEventResult<String> {
        let mut url = url::Url::parse(target).map_err(|err| {
            WsEventError::TransportUnavailable(format!("invalid url `{target}`: {err}"))
        })?;
        if let Some(path) = self.path.as_deref() {
            url.set_path(path);
        }
        if !self.query.is_empty() || !self.auth.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &self.query {
                pairs.append_pair(k, v);
            }
            for (k, v) in &self.auth {
                pairs.append_pair(k, v);
            }
        }
        Ok(url.into())
    }
}

/// `url` without its query string or userinfo, safe to log.
pub fn redacted_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            let _ = parsed.set_password(None);
            let _ = parsed.set_username("");
            parsed.into()
        }
        Err(_) => "<invalid url>".to_string(),
    }
}

/// Basic connection statistics snapshot.
#[derive(Clone, Debug)]
pub struct ConnectionStats {
    pub state: ConnectionState,
    pub connection_id: Option<String>,
    pub uptime: Duration,
    pub messages: u64,
    pub errors: u64,
    pub reconnects: u64,
    pub pending_acks: usize,
    pub last_message_age: Duration,
    pub p50_rtt_us: u64,
    pub p99_rtt_us: u64,
    pub rtt_samples: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_options_merge_path_query_and_auth() {
        let url = ConnectOptions::default()
            .with_path("/events")
            .with_query("v", "1")
            .with_auth("token", "abc")
            .resolve("wss://example.test/ignored?x=0")
            .unwrap();
        assert_eq!(url, "wss://example.test/events?x=0&v=1&token=abc");
    }

    #[test]
    fn credentials_are_stripped_from_logged_urls() {
        let url = ConnectOptions::default()
            .with_auth("token", "secret")
            .resolve("wss://user:pw@example.test/events")
            .unwrap();
        assert!(url.contains("token=secret"));
        assert_eq!(redacted_url(&url), "wss://example.test/events");
        assert_eq!(redacted_url("nope"), "<invalid url>");
    }

    #[test]
    fn invalid_target_is_transport_unavailable() {
        let err = ConnectOptions::default().resolve("not a url").unwrap_err();
        assert!(matches!(err, WsEventError::TransportUnavailable(_)));
    }

    #[test]
    fn transport_errors_convert_into_event_errors() {
        let cases = [
            (
                WebSocketError::ConnectionFailed("refused".to_string()),
                "Connection failed: refused",
            ),
            (
                WebSocketError::TransportError {
                    context: "read",
                    error: "reset".to_string(),
                },
                "Transport error (read): reset",
            ),
            (
                WebSocketError::InvalidState("writer closed".to_string()),
                "Invalid state: writer closed",
            ),
        ];
        for (source, text) in cases {
            // Exhaustive so a new transport variant has to be added here.
            match &source {
                WebSocketError::ConnectionFailed(_)
                | WebSocketError::TransportError { .. }
                | WebSocketError::InvalidState(_) => {}
            }
            let err: WsEventError = source.into();
            assert_eq!(err, WsEventError::TransportUnavailable(text.to_string()));
        }
    }
}
