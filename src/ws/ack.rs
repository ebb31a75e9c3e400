//! Pending request/response table keyed by correlation id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::core::{CorrelationId, Value, WsEventError, WsEventResult};

/// Outcome handed to an ack callback.
pub type AckOutcome = Result<Value, WsEventError>;

/// Result callback for one ack. Runs at most once, never under the table lock.
pub type AckCallback = Box<dyn FnOnce(AckOutcome) + Send + 'static>;

struct AckEntry {
    deadline: Instant,
    callback: AckCallback,
    timer: AbortHandle,
}

/// Tracks outstanding acks and their deadlines.
///
/// Every mutation takes the single table lock; removal of an id and the decision to run its
/// callback happen under that lock, so exactly one of resolve, fail, timeout or cancel wins.
#[derive(Default)]
pub struct AckCorrelator {
    entries: Mutex<HashMap<CorrelationId, AckEntry>>,
}

impl AckCorrelator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn table(&self) -> MutexGuard<'_, HashMap<CorrelationId, AckEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install an entry for `id` and arm its deadline.
    ///
    /// Must be called from within a tokio runtime. A second registration for a live id is
    /// rejected and leaves the first one untouched.
    pub fn register(
        self: &Arc<Self>,
        id: CorrelationId,
        timeout: Duration,
        callback: impl FnOnce(AckOutcome) + Send + 'static,
    ) -> WsEventResult<()> {
        let mut table = self.table();
        if table.contains_key(&id) {
            return Err(WsEventError::Custom(format!("ack {id} is already pending")));
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(correlator) = weak.upgrade() {
                correlator.fail(id, WsEventError::AckTimeout { id });
            }
        })
        .abort_handle();

        table.insert(
            id,
            AckEntry {
                deadline: Instant::now() + timeout,
                callback: Box::new(callback),
                timer,
            },
        );
        Ok(())
    }

    /// Complete `id` with a value. Returns false when no entry was pending.
    pub fn resolve(&self, id: CorrelationId, value: Value) -> bool {
        self.complete(id, Ok(value))
    }

    /// Complete `id` with an error. Returns false when no entry was pending.
    pub fn fail(&self, id: CorrelationId, error: WsEventError) -> bool {
        self.complete(id, Err(error))
    }

    fn complete(&self, id: CorrelationId, outcome: AckOutcome) -> bool {
        let Some(entry) = self.table().remove(&id) else {
            debug!(id, "ack completion for unknown id ignored");
            return false;
        };
        entry.timer.abort();
        (entry.callback)(outcome);
        true
    }

    /// Fail every pending entry with `error` and empty the table. Returns how many were failed.
    pub fn cancel_all(&self, error: WsEventError) -> usize {
        let drained: Vec<(CorrelationId, AckEntry)> = self.table().drain().collect();
        let count = drained.len();
        for (_, entry) in drained {
            entry.timer.abort();
            (entry.callback)(Err(error.clone()));
        }
        if count > 0 {
            debug!(count, error = %error, "cancelled pending acks");
        }
        count
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    pub fn contains(&self, id: CorrelationId) -> bool {
        self.table().contains_key(&id)
    }

    /// Deadline of a pending entry.
    pub fn deadline(&self, id: CorrelationId) -> Option<Instant> {
        self.table().get(&id).map(|entry| entry.deadline)
    }
}
