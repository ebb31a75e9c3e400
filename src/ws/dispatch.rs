//! Inbound event routing: middleware chain, per-event listeners and catch-alls.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{error, warn};

use crate::core::{IncomingEnvelope, Value};

/// Listener for one event name.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync + 'static>;

/// Listener receiving every dispatched event.
pub type CatchAllListener = Arc<dyn Fn(&str, &Value) + Send + Sync + 'static>;

/// Inbound transform/filter applied before any listener runs.
pub type Middleware = Arc<dyn Fn(String, Value) -> MiddlewareAction + Send + Sync + 'static>;

/// Opaque handle returned by every registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerKind {
    Persistent,
    Once,
}

/// Result of one middleware step.
#[derive(Clone, Debug, PartialEq)]
pub enum MiddlewareAction {
    Forward { event: String, payload: Value },
    Drop,
}

impl MiddlewareAction {
    pub fn forward(event: impl Into<String>, payload: Value) -> Self {
        MiddlewareAction::Forward {
            event: event.into(),
            payload,
        }
    }
}

/// Non-fatal problem observed during one dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Diagnostic {
    /// Middleware at `index` dropped the event.
    Dropped { event: String, index: usize },
    ListenerPanicked { event: String, message: String },
    MiddlewarePanicked { event: String, index: usize, message: String },
}

impl Diagnostic {
    pub fn describe(&self) -> String {
        match self {
            Diagnostic::Dropped { event, index } => {
                format!("event `{event}` dropped by middleware #{index}")
            }
            Diagnostic::ListenerPanicked { event, message } => {
                format!("listener for `{event}` panicked: {message}")
            }
            Diagnostic::MiddlewarePanicked {
                event,
                index,
                message,
            } => format!("middleware #{index} panicked on `{event}`: {message}"),
        }
    }
}

/// What happened to one envelope.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Event name after middleware.
    pub event: String,
    pub invoked: usize,
    /// True when nothing (not even a catch-all) was registered for the event.
    pub unhandled: bool,
    pub diagnostics: Vec<Diagnostic>,
}

struct Registration<L> {
    handle: ListenerHandle,
    callback: L,
}

#[derive(Default)]
struct EventListeners {
    persistent: Vec<Registration<Listener>>,
    once: Vec<Registration<Listener>>,
}

impl EventListeners {
    fn is_empty(&self) -> bool {
        self.persistent.is_empty() && self.once.is_empty()
    }
}

#[derive(Default)]
struct ListenerTable {
    by_event: HashMap<String, EventListeners>,
    catch_all: Vec<Registration<CatchAllListener>>,
}

/// Per-client listener and middleware registry.
///
/// The listener table and the middleware chain are guarded by separate locks; both are only
/// held to copy out the callbacks for one dispatch, never while a callback runs.
#[derive(Default)]
pub struct EventDispatcher {
    listeners: Mutex<ListenerTable>,
    middleware: Mutex<Vec<Middleware>>,
    next_handle: AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn listeners(&self) -> MutexGuard<'_, ListenerTable> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&self) -> ListenerHandle {
        ListenerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    pub fn add_listener(
        &self,
        event: impl Into<String>,
        kind: ListenerKind,
        callback: impl Fn(&Value) + Send + Sync + 'static,
    ) -> ListenerHandle {
        let handle = self.handle();
        let registration = Registration {
            handle,
            callback: Arc::new(callback) as Listener,
        };
        let mut table = self.listeners();
        let entry = table.by_event.entry(event.into()).or_default();
        match kind {
            ListenerKind::Persistent => entry.persistent.push(registration),
            ListenerKind::Once => entry.once.push(registration),
        }
        handle
    }

    pub fn add_catch_all(
        &self,
        callback: impl Fn(&str, &Value) + Send + Sync + 'static,
    ) -> ListenerHandle {
        let handle = self.handle();
        self.listeners().catch_all.push(Registration {
            handle,
            callback: Arc::new(callback),
        });
        handle
    }

    /// Remove one registration of any kind. Unknown handles are ignored.
    pub fn remove_listener(&self, handle: ListenerHandle) -> bool {
        let mut table = self.listeners();
        let ListenerTable {
            by_event,
            catch_all,
        } = &mut *table;

        let before = catch_all.len();
        catch_all.retain(|r| r.handle != handle);
        if catch_all.len() != before {
            return true;
        }

        let mut removed = false;
        by_event.retain(|_, listeners| {
            if !removed {
                let before = listeners.persistent.len() + listeners.once.len();
                listeners.persistent.retain(|r| r.handle != handle);
                listeners.once.retain(|r| r.handle != handle);
                removed = before != listeners.persistent.len() + listeners.once.len();
            }
            !listeners.is_empty()
        });
        removed
    }

    /// Drop every persistent and once listener for `event`. Catch-alls are kept.
    pub fn remove_all(&self, event: &str) -> usize {
        self.listeners()
            .by_event
            .remove(event)
            .map(|l| l.persistent.len() + l.once.len())
            .unwrap_or(0)
    }

    pub fn add_middleware(
        &self,
        middleware: impl Fn(String, Value) -> MiddlewareAction + Send + Sync + 'static,
    ) {
        self.middleware
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(middleware));
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners()
            .by_event
            .get(event)
            .map(|l| l.persistent.len() + l.once.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        let table = self.listeners();
        table.by_event.is_empty() && table.catch_all.is_empty()
    }

    /// Route one envelope: middleware, persistent listeners, once listeners, catch-alls.
    pub fn dispatch(&self, envelope: IncomingEnvelope) -> DispatchReport {
        let mut report = DispatchReport::default();

        let chain: Vec<Middleware> = self
            .middleware
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut event = envelope.event;
        let mut payload = envelope.payload;
        for (index, middleware) in chain.iter().enumerate() {
            let name = event.clone();
            match catch_unwind(AssertUnwindSafe(|| middleware(event, payload))) {
                Ok(MiddlewareAction::Forward {
                    event: next_event,
                    payload: next_payload,
                }) => {
                    event = next_event;
                    payload = next_payload;
                }
                Ok(MiddlewareAction::Drop) => {
                    warn!(event = %name, index, "event dropped by middleware");
                    report.event = name.clone();
                    report.diagnostics.push(Diagnostic::Dropped { event: name, index });
                    return report;
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(event = %name, index, panic = %message, "middleware panicked");
                    report.event = name.clone();
                    report.diagnostics.push(Diagnostic::MiddlewarePanicked {
                        event: name,
                        index,
                        message,
                    });
                    return report;
                }
            }
        }

        let (persistent, once, catch_all) = {
            let mut table = self.listeners();
            let (persistent, once, now_empty) = match table.by_event.get_mut(&event) {
                Some(listeners) => {
                    let persistent: Vec<Listener> = listeners
                        .persistent
                        .iter()
                        .map(|r| r.callback.clone())
                        .collect();
                    let once: Vec<Listener> = std::mem::take(&mut listeners.once)
                        .into_iter()
                        .map(|r| r.callback)
                        .collect();
                    (persistent, once, listeners.is_empty())
                }
                None => (Vec::new(), Vec::new(), false),
            };
            if now_empty {
                table.by_event.remove(&event);
            }
            let catch_all: Vec<CatchAllListener> =
                table.catch_all.iter().map(|r| r.callback.clone()).collect();
            (persistent, once, catch_all)
        };

        report.unhandled = persistent.is_empty() && once.is_empty() && catch_all.is_empty();

        for listener in persistent.iter().chain(once.iter()) {
            report.invoked += 1;
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(&payload))) {
                report.diagnostics.push(listener_panicked(&event, panic.as_ref()));
            }
        }
        for listener in &catch_all {
            report.invoked += 1;
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(&event, &payload))) {
                report.diagnostics.push(listener_panicked(&event, panic.as_ref()));
            }
        }

        report.event = event;
        report
    }
}

fn listener_panicked(event: &str, panic: &(dyn std::any::Any + Send)) -> Diagnostic {
    let message = panic_message(panic);
    error!(event = %event, panic = %message, "event listener panicked");
    Diagnostic::ListenerPanicked {
        event: event.to_string(),
        message,
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
