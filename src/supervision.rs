//! Link-based parent for per-session child actors.
//!
//! Session children (the frame writer) are never restarted in place: a lost session is
//! recovered by opening a new transport, which spawns a new child. The supervisor only gives
//! those children a stable parent to link against and logs how they ended.

use std::convert::Infallible;
use std::marker::PhantomData;
use std::ops::ControlFlow;

use kameo::{
    Actor,
    actor::{ActorID, ActorRef, WeakActorRef},
    error::ActorStopReason,
};
use tracing::{debug, warn};

/// Typed supervisor for homogeneous child actors of type `A`.
pub struct TypedSupervisor<A>
where
    A: Actor + Send + Sync + 'static,
{
    name: String,
    children_stopped: u64,
    _phantom: PhantomData<A>,
}

impl<A> TypedSupervisor<A>
where
    A: Actor + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children_stopped: 0,
            _phantom: PhantomData,
        }
    }
}

impl<A> Actor for TypedSupervisor<A>
where
    A: Actor + Send + Sync + 'static,
{
    type Args = Self;
    type Error = Infallible;

    async fn on_start(args: Self::Args, _actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        Ok(args)
    }

    async fn on_link_died(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        id: ActorID,
        reason: ActorStopReason,
    ) -> Result<ControlFlow<ActorStopReason>, Self::Error> {
        self.children_stopped = self.children_stopped.saturating_add(1);
        match &reason {
            ActorStopReason::Normal | ActorStopReason::Killed => {
                debug!(
                    supervisor = %self.name,
                    child = ?id,
                    stopped = self.children_stopped,
                    "supervised child stopped"
                );
            }
            other => {
                warn!(
                    supervisor = %self.name,
                    child = ?id,
                    reason = ?other,
                    "supervised child died"
                );
            }
        }
        Ok(ControlFlow::Continue(()))
    }
}
