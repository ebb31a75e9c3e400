//! Connection engine actor.
//!
//! The receive loop runs outside kameo and forwards decoded packets; the actor owns the
//! lifecycle state machine, reconnection, timers and the per-session writer. Every task it
//! spawns is tagged with the session number it belongs to, and messages from an older session
//! are dropped on arrival.

use std::sync::Arc;

use futures_util::StreamExt;
use kameo::error::SendError;
use kameo::prelude::{Actor, ActorRef, Context, Message as KameoMessage, WeakActorRef};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::shared::EngineShared;
use super::system::SystemEvent;
use super::writer::{
    WriterWrite, WriterWriteBatch, WsWriterActor, spawn_writer_supervised_with,
    spawn_writer_supervisor,
};
use crate::core::packet::{self, DecodeError};
use crate::core::types::redacted_url;
use crate::core::{
    ClientConfig, ConnectionHealth, ConnectionState, ConnectionStats, DisconnectCause, Handshake,
    IncomingEnvelope, KeepAlive, Packet, ReconnectController, ReconnectDecision, WsEventError,
    WsEventResult, WsFrame,
};
use crate::supervision::TypedSupervisor;
use crate::transport::WsTransport;

/// Arguments passed when spawning a [`ConnectionActor`].
pub struct ConnectionActorArgs<T: WsTransport> {
    pub(crate) transport: T,
    pub(crate) config: ClientConfig,
    pub(crate) shared: Arc<EngineShared>,
}

pub struct ConnectionActor<T: WsTransport> {
    transport: T,
    config: ClientConfig,
    shared: Arc<EngineShared>,
    actor_ref: ActorRef<Self>,
    url: Option<String>,
    url_label: Option<String>,
    session: u64,
    reconnect: ReconnectController,
    keep_alive: KeepAlive,
    health: ConnectionHealth,
    writer_ref: Option<ActorRef<WsWriterActor<T::Writer>>>,
    writer_supervisor_ref: Option<ActorRef<TypedSupervisor<WsWriterActor<T::Writer>>>>,
    open_task: Option<JoinHandle<()>>,
    reader_task: Option<JoinHandle<()>>,
    ping_task: Option<JoinHandle<()>>,
    handshake_task: Option<JoinHandle<()>>,
    retry_task: Option<JoinHandle<()>>,
}

impl<T: WsTransport> Actor for ConnectionActor<T> {
    type Args = ConnectionActorArgs<T>;
    type Error = WsEventError;

    fn name() -> &'static str {
        "ConnectionActor"
    }

    async fn on_start(args: Self::Args, ctx: ActorRef<Self>) -> WsEventResult<Self> {
        let ConnectionActorArgs {
            transport,
            config,
            shared,
        } = args;

        Ok(Self {
            transport,
            reconnect: ReconnectController::new(config.reconnect.clone()),
            keep_alive: KeepAlive::new(config.ping_interval, config.ping_timeout),
            config,
            shared,
            actor_ref: ctx,
            url: None,
            url_label: None,
            session: 0,
            health: ConnectionHealth::new(),
            writer_ref: None,
            writer_supervisor_ref: None,
            open_task: None,
            reader_task: None,
            ping_task: None,
            handshake_task: None,
            retry_task: None,
        })
    }

    async fn on_stop(
        &mut self,
        _ctx: WeakActorRef<Self>,
        _reason: kameo::error::ActorStopReason,
    ) -> WsEventResult<()> {
        abort_task(&mut self.retry_task);
        self.teardown_session().await;
        self.shared.acks.cancel_all(WsEventError::NotConnected);
        self.shared.set_state(ConnectionState::Disconnected);
        self.shared.set_connection_id(None);
        if let Some(supervisor) = self.writer_supervisor_ref.take()
            && supervisor.is_alive()
        {
            let _ = supervisor.stop_gracefully().await;
        }
        Ok(())
    }

    fn on_panic(
        &mut self,
        _actor_ref: kameo::actor::WeakActorRef<Self>,
        err: kameo::prelude::PanicError,
    ) -> impl std::future::Future<
        Output = Result<std::ops::ControlFlow<kameo::prelude::ActorStopReason>, Self::Error>,
    > + Send {
        async move {
            tracing::error!(error = ?err, "ConnectionActor panicked");
            Ok(std::ops::ControlFlow::Break(
                kameo::prelude::ActorStopReason::Panicked(err),
            ))
        }
    }
}

/// Open a session to `url` unless one is already open or opening.
#[derive(Debug)]
pub struct Connect {
    pub url: String,
}

/// Close the session, cancel pending acks and any scheduled retry.
#[derive(Debug, Clone, Copy)]
pub struct Disconnect;

/// Write one encoded frame on the open session.
#[derive(Debug)]
pub struct SendFrame {
    pub frame: WsFrame,
}

#[derive(Debug, Clone, Copy)]
pub struct GetConnectionStats;

/// Transport halves produced by an open attempt.
pub struct TransportOpened<T: WsTransport> {
    session: u64,
    reader: T::Reader,
    writer: T::Writer,
}

/// Events produced by the engine's own tasks and timers.
#[derive(Debug)]
pub enum EngineEvent {
    OpenFailed { session: u64, error: String },
    Inbound { session: u64, packet: Result<Packet, DecodeError> },
    /// Transport-level keep-alive traffic (websocket ping/pong frames).
    Activity { session: u64 },
    ConnectionLost { session: u64, cause: DisconnectCause },
    HandshakeTimedOut { session: u64 },
    KeepAliveTick { session: u64 },
    RetryDue { session: u64 },
}

impl<T: WsTransport> KameoMessage<Connect> for ConnectionActor<T> {
    type Reply = WsEventResult<()>;

    async fn handle(&mut self, msg: Connect, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let state = self.shared.state();
        if matches!(state, ConnectionState::Open | ConnectionState::Connecting) {
            debug!(connection = %self.connection_label(), %state, "connect skipped");
            self.shared.notify(SystemEvent::ConnectSkipped { state });
            return Ok(());
        }

        self.reconnect.reset();
        abort_task(&mut self.retry_task);
        let label = redacted_url(&msg.url);
        info!(connection = %label, "websocket connect requested");
        self.url = Some(msg.url.clone());
        self.url_label = Some(label);
        self.shared
            .notify(SystemEvent::ConnectStarted { url: msg.url });
        self.start_session();
        Ok(())
    }
}

impl<T: WsTransport> KameoMessage<Disconnect> for ConnectionActor<T> {
    type Reply = WsEventResult<()>;

    async fn handle(
        &mut self,
        _msg: Disconnect,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.handle_disconnect().await;
        Ok(())
    }
}

impl<T: WsTransport> KameoMessage<SendFrame> for ConnectionActor<T> {
    type Reply = WsEventResult<()>;

    async fn handle(
        &mut self,
        msg: SendFrame,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if self.shared.state() != ConnectionState::Open {
            return Err(WsEventError::NotConnected);
        }
        self.write(msg.frame).await.inspect_err(|_| {
            self.health.record_error();
        })
    }
}

impl<T: WsTransport> KameoMessage<GetConnectionStats> for ConnectionActor<T> {
    type Reply = WsEventResult<ConnectionStats>;

    async fn handle(
        &mut self,
        _msg: GetConnectionStats,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let health = self.health.snapshot();
        Ok(ConnectionStats {
            state: self.shared.state(),
            connection_id: self.shared.connection_id(),
            uptime: health.uptime,
            messages: health.messages,
            errors: health.errors,
            reconnects: health.reconnects,
            pending_acks: self.shared.acks.len(),
            last_message_age: health.last_message_age,
            p50_rtt_us: health.p50_rtt_us,
            p99_rtt_us: health.p99_rtt_us,
            rtt_samples: health.rtt_samples,
        })
    }
}

impl<T: WsTransport> KameoMessage<TransportOpened<T>> for ConnectionActor<T> {
    type Reply = ();

    async fn handle(
        &mut self,
        msg: TransportOpened<T>,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let TransportOpened {
            session,
            reader,
            writer,
        } = msg;
        if session != self.session || self.shared.state() != ConnectionState::Connecting {
            debug!(session, current = self.session, "dropping stale transport");
            return;
        }
        self.open_task = None;
        self.on_transport_opened(reader, writer).await;
    }
}

impl<T: WsTransport> KameoMessage<EngineEvent> for ConnectionActor<T> {
    type Reply = ();

    async fn handle(
        &mut self,
        msg: EngineEvent,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        match msg {
            EngineEvent::OpenFailed { session, error } if session == self.session => {
                self.open_task = None;
                warn!(connection = %self.connection_label(), session, error = %error, "websocket open failed");
                self.attempt_failed(WsEventError::TransportUnavailable(error))
                    .await;
            }
            EngineEvent::Inbound { session, packet } if session == self.session => {
                self.keep_alive.record_activity();
                self.process_inbound(packet).await;
            }
            EngineEvent::Activity { session } if session == self.session => {
                self.keep_alive.record_activity();
            }
            EngineEvent::ConnectionLost { session, cause } if session == self.session => {
                self.connection_lost(cause).await;
            }
            EngineEvent::HandshakeTimedOut { session } if session == self.session => {
                if self.shared.state() == ConnectionState::Connecting {
                    let cause = DisconnectCause::HandshakeTimeout;
                    warn!(connection = %self.connection_label(), session, "session-open packet not received in time");
                    self.attempt_failed(WsEventError::TransportUnavailable(cause.reason()))
                        .await;
                }
            }
            EngineEvent::KeepAliveTick { session } if session == self.session => {
                self.keep_alive_tick().await;
            }
            EngineEvent::RetryDue { session } if session == self.session => {
                self.retry_task = None;
                self.retry_due();
            }
            stale => {
                debug!(current = self.session, event = ?stale, "ignoring event from stale session");
            }
        }
    }
}

impl<T: WsTransport> ConnectionActor<T> {
    fn connection_label(&self) -> &str {
        self.url_label.as_deref().unwrap_or("unconnected")
    }

    fn start_session(&mut self) {
        let Some(url) = self.url.clone() else {
            return;
        };
        self.session = self.session.wrapping_add(1);
        let session = self.session;
        self.shared.set_state(ConnectionState::Connecting);

        let transport = self.transport.clone();
        let buffers = self.config.buffers;
        let actor_ref = self.actor_ref.clone();
        self.open_task = Some(tokio::spawn(async move {
            match transport.connect(url, buffers).await {
                Ok((reader, writer)) => {
                    let _ = actor_ref
                        .tell(TransportOpened::<T> {
                            session,
                            reader,
                            writer,
                        })
                        .send()
                        .await;
                }
                Err(err) => {
                    let _ = actor_ref
                        .tell(EngineEvent::OpenFailed {
                            session,
                            error: err.to_string(),
                        })
                        .send()
                        .await;
                }
            }
        }));

        let timeout = self.config.handshake_timeout;
        let actor_ref = self.actor_ref.clone();
        abort_task(&mut self.handshake_task);
        self.handshake_task = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = actor_ref
                .tell(EngineEvent::HandshakeTimedOut { session })
                .send()
                .await;
        }));
        debug!(connection = %self.connection_label(), session, "websocket open attempt started");
    }

    async fn on_transport_opened(&mut self, reader: T::Reader, writer: T::Writer) {
        info!(connection = %self.connection_label(), session = self.session, "websocket transport open, awaiting handshake");

        if self.writer_supervisor_ref.is_none() {
            self.writer_supervisor_ref = Some(spawn_writer_supervisor::<T::Writer>());
        }
        if let Some(supervisor) = self.writer_supervisor_ref.as_ref() {
            self.writer_ref = Some(spawn_writer_supervised_with(supervisor, writer).await);
        }

        let session = self.session;
        let actor_ref = self.actor_ref.clone();
        let label = self.connection_label().to_string();
        let mut read = reader;
        self.reader_task = Some(tokio::spawn(async move {
            loop {
                let event = match read.next().await {
                    Some(Ok(frame @ (WsFrame::Text(_) | WsFrame::Binary(_)))) => {
                        EngineEvent::Inbound {
                            session,
                            packet: packet::decode(&frame),
                        }
                    }
                    Some(Ok(WsFrame::Close(frame))) => {
                        info!(connection = %label, close = ?frame, "received websocket close frame");
                        EngineEvent::ConnectionLost {
                            session,
                            cause: DisconnectCause::RemoteClosed,
                        }
                    }
                    Some(Ok(WsFrame::Ping(_) | WsFrame::Pong(_))) => EngineEvent::Activity { session },
                    Some(Err(err)) => EngineEvent::ConnectionLost {
                        session,
                        cause: DisconnectCause::ReadFailure {
                            error: err.to_string(),
                        },
                    },
                    None => EngineEvent::ConnectionLost {
                        session,
                        cause: DisconnectCause::RemoteClosed,
                    },
                };
                let terminal = matches!(event, EngineEvent::ConnectionLost { .. });
                if actor_ref.tell(event).send().await.is_err() || terminal {
                    break;
                }
            }
        }));
    }

    async fn process_inbound(&mut self, packet: Result<Packet, DecodeError>) {
        let packet = match packet {
            Ok(packet) => packet,
            Err(err) => {
                self.health.record_error();
                warn!(connection = %self.connection_label(), error = %err, "dropping malformed packet");
                self.shared.notify(SystemEvent::Error { error: err.into() });
                return;
            }
        };

        match packet {
            Packet::Open(handshake) => {
                if self.shared.state() == ConnectionState::Connecting {
                    self.on_handshake(handshake).await;
                } else {
                    warn!(connection = %self.connection_label(), "ignoring repeated session-open packet");
                }
            }
            Packet::Ping => {
                if let Err(err) = self.write(packet::encode_pong()).await {
                    warn!(connection = %self.connection_label(), error = %err, "pong send failed");
                }
            }
            Packet::Pong => {
                if let Some(rtt) = self.keep_alive.record_pong() {
                    self.health.record_rtt(rtt);
                }
            }
            Packet::Close(error) => self.server_closed(error).await,
            Packet::Message(envelope) => self.on_message(envelope),
        }
    }

    async fn on_handshake(&mut self, handshake: Handshake) {
        abort_task(&mut self.handshake_task);

        let interval = handshake
            .ping_interval()
            .filter(|d| !d.is_zero())
            .unwrap_or(self.config.ping_interval);
        let timeout = handshake
            .ping_timeout()
            .unwrap_or(self.config.ping_timeout);
        self.keep_alive.reset(interval, timeout);
        self.health.reset_session();
        self.reconnect.on_connected();
        self.shared
            .set_connection_id(Some(handshake.connection_id.clone()));
        self.shared.set_state(ConnectionState::Open);
        self.start_ping_loop();

        info!(
            connection = %self.connection_label(),
            session = self.session,
            connection_id = %handshake.connection_id,
            ping_interval_ms = interval.as_millis() as u64,
            ping_timeout_ms = timeout.as_millis() as u64,
            "websocket session open"
        );
        self.shared.notify(SystemEvent::Connect {
            connection_id: handshake.connection_id,
        });
        self.replay_stored().await;
    }

    async fn replay_stored(&mut self) {
        let Some(store) = self.shared.store.clone() else {
            return;
        };
        if !self.config.replay_stored_on_connect {
            let pending = store.retrieve_pending().len();
            if pending > 0 {
                debug!(connection = %self.connection_label(), pending, "stored envelopes left in store");
            }
            return;
        }
        let pending = store.take_pending();
        if pending.is_empty() {
            return;
        }

        let mut replayed = Vec::with_capacity(pending.len());
        let mut frames = Vec::with_capacity(pending.len());
        for envelope in pending {
            let envelope = envelope.with_correlation_id(None);
            match packet::encode(&envelope) {
                Ok(frame) => {
                    frames.push(frame);
                    replayed.push(envelope);
                }
                Err(err) => {
                    warn!(event = %envelope.event(), error = %err, "skipping unencodable stored envelope")
                }
            }
        }
        let count = frames.len();
        match self.write_batch(frames).await {
            Ok(()) => {
                info!(connection = %self.connection_label(), count, "replayed stored envelopes");
            }
            Err(err) => {
                warn!(connection = %self.connection_label(), error = %err, "stored envelope replay failed");
                for envelope in &replayed {
                    store.store_outgoing(envelope);
                }
            }
        }
    }

    fn on_message(&mut self, envelope: IncomingEnvelope) {
        self.health.record_message();
        let resolved = envelope
            .correlation_id
            .is_some_and(|id| self.shared.acks.resolve(id, envelope.payload.clone()));

        let report = self.shared.dispatcher.dispatch(envelope);
        for diagnostic in &report.diagnostics {
            self.shared.notify(SystemEvent::Error {
                error: WsEventError::Custom(diagnostic.describe()),
            });
        }
        if report.unhandled && !resolved && self.config.report_unhandled_events {
            self.shared.notify(SystemEvent::Error {
                error: WsEventError::UnknownEvent(report.event),
            });
        }
    }

    async fn server_closed(&mut self, error: Option<WsEventError>) {
        info!(connection = %self.connection_label(), error = ?error, "server closed the session");
        if let Some(err) = error.clone() {
            self.shared.notify(SystemEvent::Error { error: err });
        }
        let ack_error = error.clone().unwrap_or_else(|| {
            WsEventError::TransportUnavailable("server closed the session".to_string())
        });
        self.end_session(ack_error).await;
        self.reconnect.reset();
        self.shared.notify(SystemEvent::Disconnect {
            cause: DisconnectCause::ServerClosed { error },
        });
    }

    async fn connection_lost(&mut self, cause: DisconnectCause) {
        match self.shared.state() {
            ConnectionState::Open => {
                warn!(
                    connection = %self.connection_label(),
                    session = self.session,
                    reason = %cause.reason(),
                    "websocket session lost"
                );
                self.end_session(WsEventError::TransportUnavailable(cause.reason()))
                    .await;
                self.shared.notify(SystemEvent::Disconnect { cause });
                let decision = self.reconnect.on_connection_lost();
                self.apply_reconnect_decision(decision);
            }
            ConnectionState::Connecting => {
                self.attempt_failed(WsEventError::TransportUnavailable(cause.reason()))
                    .await;
            }
            ConnectionState::Closing | ConnectionState::Disconnected => {}
        }
    }

    /// Tear down an open session after a loss: pending acks fail with `ack_error`.
    async fn end_session(&mut self, ack_error: WsEventError) {
        self.teardown_session().await;
        self.shared.acks.cancel_all(ack_error);
        self.shared.set_state(ConnectionState::Disconnected);
        self.shared.set_connection_id(None);
    }

    async fn attempt_failed(&mut self, error: WsEventError) {
        self.health.record_error();
        self.teardown_session().await;
        self.shared.set_state(ConnectionState::Disconnected);
        self.shared.notify(SystemEvent::ConnectError { error });

        if self.reconnect.is_retrying() {
            let decision = self.reconnect.on_attempt_failed();
            self.apply_reconnect_decision(decision);
        }
    }

    fn apply_reconnect_decision(&mut self, decision: ReconnectDecision) {
        match decision {
            ReconnectDecision::Retry { attempt, delay } => {
                warn!(
                    connection = %self.connection_label(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "websocket reconnect scheduled"
                );
                let session = self.session;
                let actor_ref = self.actor_ref.clone();
                abort_task(&mut self.retry_task);
                self.retry_task = Some(tokio::spawn(async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    let _ = actor_ref
                        .tell(EngineEvent::RetryDue { session })
                        .send()
                        .await;
                }));
            }
            ReconnectDecision::Exhausted { attempts } => {
                warn!(
                    connection = %self.connection_label(),
                    attempts,
                    "websocket reconnect exhausted"
                );
                self.shared
                    .notify(SystemEvent::ReconnectFailed { attempts });
            }
            ReconnectDecision::Ignore => {}
        }
    }

    fn retry_due(&mut self) {
        if !self.reconnect.is_retrying() || self.shared.state() != ConnectionState::Disconnected {
            return;
        }
        let attempt = self.reconnect.begin_attempt();
        self.health.increment_reconnect();
        self.shared.notify(SystemEvent::Reconnecting { attempt });
        self.start_session();
    }

    fn start_ping_loop(&mut self) {
        abort_task(&mut self.ping_task);

        let session = self.session;
        let interval = self.keep_alive.interval();
        let actor_ref = self.actor_ref.clone();
        self.ping_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if actor_ref
                    .tell(EngineEvent::KeepAliveTick { session })
                    .send()
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }));
    }

    async fn keep_alive_tick(&mut self) {
        if self.shared.state() != ConnectionState::Open {
            return;
        }
        if self.keep_alive.is_stale() {
            warn!(
                connection = %self.connection_label(),
                window_ms = self.keep_alive.liveness_window().as_millis() as u64,
                "no inbound traffic within liveness window"
            );
            self.connection_lost(DisconnectCause::PongTimeout).await;
            return;
        }

        match self.write(packet::encode_ping()).await {
            Ok(()) => {
                self.keep_alive.record_ping_sent();
                self.shared.notify(SystemEvent::Ping);
            }
            Err(err) => {
                self.connection_lost(DisconnectCause::WriteFailure {
                    error: err.to_string(),
                })
                .await;
            }
        }
    }

    async fn handle_disconnect(&mut self) {
        let state = self.shared.state();
        let retry_pending = self.reconnect.is_retrying() || self.retry_task.is_some();
        let was_active = state != ConnectionState::Disconnected || retry_pending;

        self.reconnect.reset();
        abort_task(&mut self.retry_task);
        // Outstanding task output from the closing session becomes stale.
        self.session = self.session.wrapping_add(1);

        if state != ConnectionState::Disconnected {
            self.shared.set_state(ConnectionState::Closing);
        }
        if let Some(writer) = self.writer_ref.as_ref() {
            let frames = vec![
                packet::encode_close(None),
                WsFrame::normal_close("client disconnect"),
            ];
            let write = async { writer.ask(WriterWriteBatch { frames }).await };
            match tokio::time::timeout(self.config.close_timeout, write).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => debug!(error = ?err, "close packet not delivered"),
                Err(_) => debug!("close packet write timed out"),
            }
        }

        let cancelled = self.shared.acks.cancel_all(WsEventError::NotConnected);
        self.teardown_session().await;
        self.shared.set_state(ConnectionState::Disconnected);
        self.shared.set_connection_id(None);

        if was_active {
            info!(connection = %self.connection_label(), cancelled, "websocket disconnected by client");
            self.shared.notify(SystemEvent::Disconnect {
                cause: DisconnectCause::ClientRequested,
            });
        }
    }

    /// Stop every per-session task and the writer. The session number is left untouched.
    async fn teardown_session(&mut self) {
        abort_task(&mut self.handshake_task);
        abort_task(&mut self.ping_task);
        abort_task(&mut self.open_task);
        // The reader may be parked on a full mailbox; abort before joining.
        if let Some(reader) = self.reader_task.take() {
            reader.abort();
            if let Err(err) = reader.await
                && !err.is_cancelled()
            {
                warn!("reader task terminated with error: {err}");
            }
        }
        self.teardown_writer().await;
    }

    async fn teardown_writer(&mut self) {
        let Some(writer) = self.writer_ref.take() else {
            return;
        };
        // kameo panics when a stop signal is sent to an actor whose mailbox has closed.
        if writer.is_alive() {
            let _ = writer.stop_gracefully().await;
        }
        if tokio::time::timeout(self.config.close_timeout, writer.wait_for_shutdown())
            .await
            .is_err()
        {
            debug!("writer did not stop in time, killing it");
            writer.kill();
        }
        if let Some(supervisor) = self.writer_supervisor_ref.as_ref() {
            writer.unlink(supervisor).await;
        }
    }

    async fn write(&self, frame: WsFrame) -> WsEventResult<()> {
        let Some(writer) = self.writer_ref.as_ref() else {
            return Err(WsEventError::NotConnected);
        };
        writer
            .ask(WriterWrite { frame })
            .await
            .map_err(writer_error)
    }

    async fn write_batch(&self, frames: Vec<WsFrame>) -> WsEventResult<()> {
        let Some(writer) = self.writer_ref.as_ref() else {
            return Err(WsEventError::NotConnected);
        };
        writer
            .ask(WriterWriteBatch { frames })
            .await
            .map_err(writer_error)
    }
}

fn writer_error<M>(err: SendError<M, crate::core::WebSocketError>) -> WsEventError {
    match err {
        SendError::HandlerError(err) => err.into(),
        _ => WsEventError::TransportUnavailable("writer stopped".to_string()),
    }
}

fn abort_task(handle: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = handle.take() {
        handle.abort();
    }
}

/// Map an engine mailbox failure onto the public error taxonomy.
pub(crate) fn engine_error<M>(err: SendError<M, WsEventError>) -> WsEventError {
    match err {
        SendError::HandlerError(err) => err,
        _ => WsEventError::TransportUnavailable("connection engine stopped".to_string()),
    }
}
