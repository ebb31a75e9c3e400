//! Reusable test utilities for driving a client without a real socket.
//!
//! [`MockTransport`] hands every opened connection to a [`MockServer`], which tests use to
//! accept sessions, read what the client wrote, push packets back and drop sockets.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Sink;
use tokio::sync::mpsc;

use crate::core::packet::{self, Packet};
use crate::core::{
    CorrelationId, Handshake, IncomingEnvelope, Value, WebSocketBufferConfig, WebSocketError,
    WsFrame,
};
use crate::transport::{WsTransport, WsTransportConnectFuture};

struct MockInner {
    accept_tx: mpsc::UnboundedSender<MockConnection>,
    refuse: AtomicBool,
    connects: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

/// A transport over in-memory channels. Every `connect` yields a new [`MockConnection`].
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl MockTransport {
    /// Build a transport + server control pair.
    pub fn channel_pair() -> (Self, MockServer) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(MockInner {
            accept_tx,
            refuse: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        });
        (
            Self {
                inner: inner.clone(),
            },
            MockServer { accept_rx, inner },
        )
    }
}

impl WsTransport for MockTransport {
    type Reader = MockReader;
    type Writer = MockWriter;

    fn connect(
        &self,
        url: String,
        _buffers: WebSocketBufferConfig,
    ) -> WsTransportConnectFuture<Self::Reader, Self::Writer> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.connects.fetch_add(1, Ordering::SeqCst);
            inner
                .urls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(url.clone());
            if inner.refuse.load(Ordering::SeqCst) {
                return Err(WebSocketError::ConnectionFailed(
                    "mock server refused connection".to_string(),
                ));
            }

            let (sent_tx, sent_rx) = mpsc::unbounded_channel();
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            let crash = Arc::new(AtomicBool::new(false));
            let connection = MockConnection {
                url,
                outbound_rx: sent_rx,
                inbound_tx: Some(inbound_tx),
                crash_writer: crash.clone(),
            };
            inner.accept_tx.send(connection).map_err(|_| {
                WebSocketError::ConnectionFailed("mock server is gone".to_string())
            })?;
            Ok((
                MockReader { rx: inbound_rx },
                MockWriter { sent_tx, crash },
            ))
        })
    }
}

/// Error surface for operations on [`MockConnection`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MockServerError {
    /// The inbound socket side was intentionally dropped.
    SocketDropped,
    /// The client side is no longer reading.
    ChannelClosed,
}

impl std::fmt::Display for MockServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MockServerError::SocketDropped => f.write_str("mock socket already dropped"),
            MockServerError::ChannelClosed => f.write_str("mock client channel is closed"),
        }
    }
}

impl std::error::Error for MockServerError {}

/// Server-side test handle paired with [`MockTransport`].
pub struct MockServer {
    accept_rx: mpsc::UnboundedReceiver<MockConnection>,
    inner: Arc<MockInner>,
}

impl MockServer {
    /// Next connection opened by the client.
    pub async fn accept(&mut self) -> Option<MockConnection> {
        self.accept_rx.recv().await
    }

    pub async fn accept_timeout(&mut self, timeout: Duration) -> Option<MockConnection> {
        tokio::time::timeout(timeout, self.accept_rx.recv())
            .await
            .unwrap_or_default()
    }

    /// Make subsequent `connect` calls fail with `ConnectionFailed`.
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of `connect` calls, refused ones included.
    pub fn connect_attempts(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.inner
            .urls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// One accepted connection.
pub struct MockConnection {
    url: String,
    outbound_rx: mpsc::UnboundedReceiver<WsFrame>,
    inbound_tx: Option<mpsc::UnboundedSender<WsFrame>>,
    crash_writer: Arc<AtomicBool>,
}

impl MockConnection {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Receive a frame written by the client.
    pub async fn recv_outbound(&mut self) -> Option<WsFrame> {
        self.outbound_rx.recv().await
    }

    /// Receive a frame with a timeout.
    pub async fn recv_outbound_timeout(&mut self, timeout: Duration) -> Option<WsFrame> {
        tokio::time::timeout(timeout, self.outbound_rx.recv())
            .await
            .unwrap_or_default()
    }

    /// Next client frame that decodes as a packet; websocket close frames are skipped.
    pub async fn recv_packet(&mut self, timeout: Duration) -> Option<Packet> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let frame = self.recv_outbound_timeout(remaining).await?;
            if let Ok(packet) = packet::decode(&frame) {
                return Some(packet);
            }
        }
    }

    /// Next client message packet; keep-alive and close packets are skipped.
    pub async fn recv_message(&mut self, timeout: Duration) -> Option<IncomingEnvelope> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if let Packet::Message(envelope) = self.recv_packet(remaining).await? {
                return Some(envelope);
            }
        }
    }

    /// Push an inbound frame to the client.
    pub fn send_inbound(&self, frame: WsFrame) -> Result<(), MockServerError> {
        let Some(tx) = self.inbound_tx.as_ref() else {
            return Err(MockServerError::SocketDropped);
        };
        tx.send(frame).map_err(|_| MockServerError::ChannelClosed)
    }

    /// Push a UTF-8 payload as websocket text.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), MockServerError> {
        self.send_inbound(WsFrame::text(text))
    }

    /// Complete the session-open exchange with the given connection id.
    pub fn send_handshake(&self, connection_id: &str) -> Result<(), MockServerError> {
        self.send_open(&Handshake::new(connection_id))
    }

    pub fn send_open(&self, handshake: &Handshake) -> Result<(), MockServerError> {
        let frame =
            packet::encode_handshake(handshake).map_err(|_| MockServerError::ChannelClosed)?;
        self.send_inbound(frame)
    }

    pub fn send_event(
        &self,
        event: &str,
        payload: impl Into<Value>,
    ) -> Result<(), MockServerError> {
        self.send_envelope(&IncomingEnvelope::new(event, payload))
    }

    /// Answer the client message carrying `id`.
    pub fn send_ack(
        &self,
        id: CorrelationId,
        event: &str,
        payload: impl Into<Value>,
    ) -> Result<(), MockServerError> {
        let mut envelope = IncomingEnvelope::new(event, payload);
        envelope.correlation_id = Some(id);
        self.send_envelope(&envelope)
    }

    pub fn send_envelope(&self, envelope: &IncomingEnvelope) -> Result<(), MockServerError> {
        let frame =
            packet::encode_incoming(envelope).map_err(|_| MockServerError::ChannelClosed)?;
        self.send_inbound(frame)
    }

    pub fn send_ping(&self) -> Result<(), MockServerError> {
        self.send_inbound(packet::encode_ping())
    }

    pub fn send_pong(&self) -> Result<(), MockServerError> {
        self.send_inbound(packet::encode_pong())
    }

    /// Send a close packet, optionally carrying a server error.
    pub fn send_close(&self, error: Option<(Option<i64>, &str)>) -> Result<(), MockServerError> {
        self.send_inbound(packet::encode_close(error))
    }

    /// Make the client's writer panic on its next frame, killing the writer actor.
    pub fn crash_writer(&self) {
        self.crash_writer.store(true, Ordering::SeqCst);
    }

    /// Simulate server-side socket drop by closing the inbound channel.
    pub fn drop_socket(&mut self) {
        self.inbound_tx = None;
    }
}

/// Reader side for [`MockTransport`].
pub struct MockReader {
    rx: mpsc::UnboundedReceiver<WsFrame>,
}

impl futures_util::Stream for MockReader {
    type Item = Result<WsFrame, WebSocketError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.rx).poll_recv(cx) {
            Poll::Ready(Some(frame)) => Poll::Ready(Some(Ok(frame))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Writer side for [`MockTransport`].
pub struct MockWriter {
    sent_tx: mpsc::UnboundedSender<WsFrame>,
    crash: Arc<AtomicBool>,
}

impl Sink<WsFrame> for MockWriter {
    type Error = WebSocketError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        if self.crash.load(Ordering::SeqCst) {
            panic!("mock writer crashed");
        }
        self.get_mut()
            .sent_tx
            .send(item)
            .map_err(|_| WebSocketError::TransportError {
                context: "mock_transport_write",
                error: "mock outbound channel closed".to_string(),
            })
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}
