//! Optional store for outgoing envelopes.
//!
//! The engine hands the store each emit that could not be written (no open session, or the
//! writer refused it) and drains the pending envelopes when a session opens. Emits that reached
//! the socket are never stored, so a reconnect does not send them again.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use crate::core::OutgoingEnvelope;

/// Persistence collaborator for outgoing envelopes.
pub trait MessageStore: Send + Sync + 'static {
    fn store_outgoing(&self, envelope: &OutgoingEnvelope);

    /// Envelopes stored and not yet cleared, oldest first.
    fn retrieve_pending(&self) -> Vec<OutgoingEnvelope>;

    fn clear_stored(&self);

    /// Remove and return everything pending. Stores shared across threads should override this
    /// so an envelope stored between the read and the clear is not lost.
    fn take_pending(&self) -> Vec<OutgoingEnvelope> {
        let pending = self.retrieve_pending();
        self.clear_stored();
        pending
    }
}

/// Bounded in-process store; the oldest envelope is evicted once `capacity` is reached.
#[derive(Debug)]
pub struct InMemoryMessageStore {
    capacity: usize,
    entries: Mutex<VecDeque<OutgoingEnvelope>>,
}

impl InMemoryMessageStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl MessageStore for InMemoryMessageStore {
    fn store_outgoing(&self, envelope: &OutgoingEnvelope) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(envelope.clone());
    }

    fn retrieve_pending(&self) -> Vec<OutgoingEnvelope> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    fn clear_stored(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn take_pending(&self) -> Vec<OutgoingEnvelope> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *entries).into()
    }
}
