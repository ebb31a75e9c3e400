use futures_util::{Sink, SinkExt};
use kameo::prelude::{Actor, ActorRef, Context, Message as KameoMessage};
use tracing::debug;

use crate::core::{WebSocketError, WebSocketResult, WsFrame};
use crate::supervision::TypedSupervisor;

/// Writer actor that owns the transport sink and serializes writes for one session.
///
/// Once a websocket close frame has been written the sink accepts nothing more.
pub struct WsWriterActor<W>
where
    W: Sink<WsFrame, Error = WebSocketError> + Send + Sync + Unpin + 'static,
{
    writer: W,
    closed: bool,
}

impl<W> WsWriterActor<W>
where
    W: Sink<WsFrame, Error = WebSocketError> + Send + Sync + Unpin + 'static,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            closed: false,
        }
    }
}

impl<W> Actor for WsWriterActor<W>
where
    W: Sink<WsFrame, Error = WebSocketError> + Send + Sync + Unpin + 'static,
{
    type Args = Self;
    type Error = WebSocketError;

    async fn on_start(args: Self::Args, _ctx: ActorRef<Self>) -> Result<Self, Self::Error> {
        Ok(args)
    }

    fn on_panic(
        &mut self,
        _actor_ref: kameo::actor::WeakActorRef<Self>,
        err: kameo::prelude::PanicError,
    ) -> impl std::future::Future<
        Output = Result<std::ops::ControlFlow<kameo::prelude::ActorStopReason>, Self::Error>,
    > + Send {
        async move {
            tracing::error!(error = ?err, "WsWriterActor panicked");
            Ok(std::ops::ControlFlow::Break(
                kameo::prelude::ActorStopReason::Panicked(err),
            ))
        }
    }
}

/// Write one frame and flush it.
#[derive(Clone, Debug)]
pub struct WriterWrite {
    pub frame: WsFrame,
}

impl<W> KameoMessage<WriterWrite> for WsWriterActor<W>
where
    W: Sink<WsFrame, Error = WebSocketError> + Send + Sync + Unpin + 'static,
{
    type Reply = WebSocketResult<()>;

    async fn handle(
        &mut self,
        msg: WriterWrite,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if self.closed {
            return Err(WebSocketError::InvalidState("writer closed".to_string()));
        }
        debug!(target: "ws-writer", "sending websocket frame to wire");
        self.closed = matches!(msg.frame, WsFrame::Close(_));
        self.writer.send(msg.frame).await
    }
}

/// Write several frames with a single flush.
#[derive(Clone, Debug)]
pub struct WriterWriteBatch {
    pub frames: Vec<WsFrame>,
}

impl<W> KameoMessage<WriterWriteBatch> for WsWriterActor<W>
where
    W: Sink<WsFrame, Error = WebSocketError> + Send + Sync + Unpin + 'static,
{
    type Reply = WebSocketResult<()>;

    async fn handle(
        &mut self,
        msg: WriterWriteBatch,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if self.closed {
            return Err(WebSocketError::InvalidState("writer closed".to_string()));
        }
        for frame in msg.frames {
            if self.closed {
                break;
            }
            self.closed = matches!(frame, WsFrame::Close(_));
            self.writer.feed(frame).await?;
        }
        self.writer.flush().await
    }
}

/// Spawn the supervisor that parents one engine's session writers.
pub fn spawn_writer_supervisor<W>() -> ActorRef<TypedSupervisor<WsWriterActor<W>>>
where
    W: Sink<WsFrame, Error = WebSocketError> + Send + Sync + Unpin + 'static,
{
    TypedSupervisor::spawn(TypedSupervisor::new("socket-events-writer"))
}

/// Spawn a writer and link it to an existing supervisor.
pub async fn spawn_writer_supervised_with<W>(
    supervisor: &ActorRef<TypedSupervisor<WsWriterActor<W>>>,
    writer: W,
) -> ActorRef<WsWriterActor<W>>
where
    W: Sink<WsFrame, Error = WebSocketError> + Send + Sync + Unpin + 'static,
{
    let actor = WsWriterActor::spawn(WsWriterActor::new(writer));
    actor.link(supervisor).await;
    actor
}
