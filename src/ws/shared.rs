use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tracing::debug;

use super::ack::AckCorrelator;
use super::dispatch::EventDispatcher;
use super::system::{SystemEvent, SystemNotifier};
use crate::core::{ConnectionState, CorrelationId};
use crate::persistence::MessageStore;

/// State shared between a client handle and its connection actor.
///
/// Each table has its own lock. `state` and `connection_id` are written only by the actor;
/// handles read them without going through the mailbox.
pub(crate) struct EngineShared {
    state_tx: watch::Sender<ConnectionState>,
    connection_id: Mutex<Option<String>>,
    next_correlation_id: AtomicU64,
    pub(crate) dispatcher: EventDispatcher,
    pub(crate) acks: Arc<AckCorrelator>,
    pub(crate) system: SystemNotifier,
    pub(crate) store: Option<Arc<dyn MessageStore>>,
}

impl EngineShared {
    pub(crate) fn new(store: Option<Arc<dyn MessageStore>>) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            state_tx,
            connection_id: Mutex::new(None),
            next_correlation_id: AtomicU64::new(1),
            dispatcher: EventDispatcher::new(),
            acks: AckCorrelator::new(),
            system: SystemNotifier::new(),
            store,
        })
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub(crate) fn set_state(&self, next: ConnectionState) {
        let prev = self.state_tx.send_replace(next);
        if prev != next {
            debug!(from = %prev, to = %next, "connection state changed");
        }
    }

    pub(crate) fn connection_id(&self) -> Option<String> {
        self.connection_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_connection_id(&self, id: Option<String>) {
        *self
            .connection_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = id;
    }

    /// Process-lifetime unique id; never reused across reconnects.
    pub(crate) fn next_correlation_id(&self) -> CorrelationId {
        self.next_correlation_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn notify(&self, event: SystemEvent) {
        self.system.notify(event);
    }
}
