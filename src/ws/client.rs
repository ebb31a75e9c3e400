use std::sync::Arc;
use std::time::Duration;

use kameo::prelude::{Actor, ActorRef};
use tokio::sync::{oneshot, watch};

use super::ack::{AckCallback, AckOutcome};
use super::actor::{
    Connect, ConnectionActor, ConnectionActorArgs, Disconnect, GetConnectionStats, SendFrame,
    engine_error,
};
use super::dispatch::{ListenerHandle, ListenerKind, MiddlewareAction};
use super::shared::EngineShared;
use super::system::{SystemEvent, SystemEventKind, SystemHandle};
use crate::core::packet;
use crate::core::{
    ClientConfig, ConnectOptions, ConnectionState, ConnectionStats, OutgoingEnvelope, Value,
    WsEventError, WsEventResult,
};
use crate::persistence::MessageStore;
use crate::transport::WsTransport;
use crate::transport::tungstenite::TungsteniteTransport;

/// Everything needed to spawn a client.
pub struct ClientArgs<T: WsTransport = TungsteniteTransport> {
    pub transport: T,
    pub config: ClientConfig,
    pub store: Option<Arc<dyn MessageStore>>,
}

impl<T: WsTransport> ClientArgs<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            config: ClientConfig::default(),
            store: None,
        }
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }
}

/// Handle to one event client. Cheap to clone; all clones drive the same connection.
///
/// Registration calls (`on`, `once`, `on_system`, ...) go straight to the shared tables and
/// may be made from inside listener callbacks. Calls that touch the connection (`connect`,
/// `emit`, `disconnect`) are serialized through the engine actor.
pub struct WsEventClient<T: WsTransport = TungsteniteTransport> {
    actor: ActorRef<ConnectionActor<T>>,
    shared: Arc<EngineShared>,
    ack_timeout: Duration,
}

impl<T: WsTransport> Clone for WsEventClient<T> {
    fn clone(&self) -> Self {
        Self {
            actor: self.actor.clone(),
            shared: self.shared.clone(),
            ack_timeout: self.ack_timeout,
        }
    }
}

impl<T: WsTransport> WsEventClient<T> {
    /// Spawn the engine actor. Must be called from within a tokio runtime.
    pub fn spawn(args: ClientArgs<T>) -> Self {
        let ClientArgs {
            transport,
            config,
            store,
        } = args;
        let shared = EngineShared::new(store);
        let ack_timeout = config.ack_timeout;
        let actor = ConnectionActor::spawn(ConnectionActorArgs {
            transport,
            config,
            shared: shared.clone(),
        });
        Self {
            actor,
            shared,
            ack_timeout,
        }
    }

    /// Start opening a session to `target`.
    ///
    /// Returns once the attempt has started; watch [`Self::state_watch`] or the `connect`
    /// notification for the outcome. A no-op (with `connect_skipped`) while open or opening.
    pub async fn connect(&self, target: &str, options: ConnectOptions) -> WsEventResult<()> {
        let url = match options.resolve(target) {
            Ok(url) => url,
            Err(err) => {
                self.shared.notify(SystemEvent::ConnectError { error: err.clone() });
                return Err(err);
            }
        };
        self.actor.ask(Connect { url }).await.map_err(engine_error)
    }

    /// Close the session. Pending acks have failed with `NotConnected` once this returns.
    pub async fn disconnect(&self) -> WsEventResult<()> {
        self.actor.ask(Disconnect).await.map_err(engine_error)
    }

    /// Disconnect and stop the engine actor. Later calls fail with `TransportUnavailable`.
    pub async fn shutdown(&self) -> WsEventResult<()> {
        let result = self.disconnect().await;
        if self.actor.is_alive() && self.actor.stop_gracefully().await.is_ok() {
            self.actor.wait_for_shutdown().await;
        }
        result
    }

    /// Fire-and-forget emit.
    pub async fn emit(&self, event: impl Into<String>, payload: impl Into<Value>) -> WsEventResult<()> {
        self.send_envelope(OutgoingEnvelope::new(event, payload), None)
            .await
    }

    /// Emit an envelope built by the caller (e.g. carrying metadata).
    pub async fn emit_envelope(&self, envelope: OutgoingEnvelope) -> WsEventResult<()> {
        self.send_envelope(envelope, None).await
    }

    /// Emit and expect one response.
    ///
    /// `callback` runs exactly once: with the response payload, or with the error that ended
    /// the wait (`NotConnected`, `EncodingFailed`, `AckTimeout`, a transport failure, or the
    /// cancellation from `disconnect`). Failures detected before sending are also returned.
    pub async fn emit_with_ack(
        &self,
        event: impl Into<String>,
        payload: impl Into<Value>,
        timeout: Option<Duration>,
        callback: impl FnOnce(AckOutcome) + Send + 'static,
    ) -> WsEventResult<()> {
        let timeout = timeout.unwrap_or(self.ack_timeout);
        let callback: AckCallback = Box::new(callback);
        self.send_envelope(OutgoingEnvelope::new(event, payload), Some((timeout, callback)))
            .await
    }

    /// Emit and wait for the response payload.
    pub async fn request(
        &self,
        event: impl Into<String>,
        payload: impl Into<Value>,
        timeout: Option<Duration>,
    ) -> WsEventResult<Value> {
        let (tx, rx) = oneshot::channel();
        let sent = self
            .emit_with_ack(event, payload, timeout, move |outcome| {
                let _ = tx.send(outcome);
            })
            .await;
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(sent.err().unwrap_or_else(|| {
                WsEventError::TransportUnavailable("ack dropped".to_string())
            })),
        }
    }

    async fn send_envelope(
        &self,
        envelope: OutgoingEnvelope,
        ack: Option<(Duration, AckCallback)>,
    ) -> WsEventResult<()> {
        let ack = ack.map(|(timeout, callback)| (self.shared.next_correlation_id(), timeout, callback));
        let envelope = envelope.with_correlation_id(ack.as_ref().map(|(id, _, _)| *id));

        let frame = match packet::encode(&envelope) {
            Ok(frame) => frame,
            Err(err) => return fail_ack(ack, err),
        };
        if self.shared.state() != ConnectionState::Open {
            self.store_unsent(&envelope);
            return fail_ack(ack, WsEventError::NotConnected);
        }

        let id = match ack {
            Some((id, timeout, callback)) => {
                self.shared.acks.register(id, timeout, callback)?;
                Some(id)
            }
            None => None,
        };

        match self.actor.ask(SendFrame { frame }).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let err = engine_error(err);
                self.store_unsent(&envelope);
                if let Some(id) = id {
                    self.shared.acks.fail(id, err.clone());
                }
                Err(err)
            }
        }
    }

    /// Only envelopes that never reached the writer are kept for replay.
    fn store_unsent(&self, envelope: &OutgoingEnvelope) {
        if let Some(store) = self.shared.store.as_ref() {
            store.store_outgoing(envelope);
        }
    }

    pub fn on(
        &self,
        event: impl Into<String>,
        callback: impl Fn(&Value) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.shared
            .dispatcher
            .add_listener(event, ListenerKind::Persistent, callback)
    }

    pub fn once(
        &self,
        event: impl Into<String>,
        callback: impl Fn(&Value) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.shared
            .dispatcher
            .add_listener(event, ListenerKind::Once, callback)
    }

    /// Receive every dispatched event, after the per-event listeners.
    pub fn on_any(
        &self,
        callback: impl Fn(&str, &Value) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.shared.dispatcher.add_catch_all(callback)
    }

    pub fn off(&self, handle: ListenerHandle) -> bool {
        self.shared.dispatcher.remove_listener(handle)
    }

    pub fn remove_all(&self, event: &str) -> usize {
        self.shared.dispatcher.remove_all(event)
    }

    pub fn use_middleware(
        &self,
        middleware: impl Fn(String, Value) -> MiddlewareAction + Send + Sync + 'static,
    ) {
        self.shared.dispatcher.add_middleware(middleware);
    }

    pub fn on_system(
        &self,
        kind: SystemEventKind,
        callback: impl Fn(&SystemEvent) + Send + Sync + 'static,
    ) -> SystemHandle {
        self.shared.system.on_system(kind, callback)
    }

    pub fn on_system_any(
        &self,
        callback: impl Fn(&SystemEvent) + Send + Sync + 'static,
    ) -> SystemHandle {
        self.shared.system.on_system_any(callback)
    }

    pub fn off_system(&self, handle: SystemHandle) -> bool {
        self.shared.system.off_system(handle)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.shared.subscribe_state()
    }

    /// Wait until the connection reaches `state`.
    pub async fn wait_for_state(
        &self,
        state: ConnectionState,
        timeout: Duration,
    ) -> WsEventResult<()> {
        let mut rx = self.shared.subscribe_state();
        match tokio::time::timeout(timeout, rx.wait_for(|s| *s == state)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(WsEventError::TransportUnavailable(
                "connection engine stopped".to_string(),
            )),
            Err(_) => Err(WsEventError::Custom(format!(
                "timed out waiting for state {state}"
            ))),
        }
    }

    /// Server-assigned id of the open session.
    pub fn connection_id(&self) -> Option<String> {
        self.shared.connection_id()
    }

    pub fn pending_acks(&self) -> usize {
        self.shared.acks.len()
    }

    pub async fn stats(&self) -> WsEventResult<ConnectionStats> {
        self.actor.ask(GetConnectionStats).await.map_err(engine_error)
    }
}

fn fail_ack(
    ack: Option<(u64, Duration, AckCallback)>,
    err: WsEventError,
) -> WsEventResult<()> {
    if let Some((_, _, callback)) = ack {
        callback(Err(err.clone()));
    }
    Err(err)
}
