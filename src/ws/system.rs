//! Lifecycle notification channel, separate from application events.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error};

use super::dispatch::panic_message;
use crate::core::{ConnectionState, DisconnectCause, WsEventError};

/// Notification emitted by the engine. Never passes through middleware.
#[derive(Clone, Debug, PartialEq)]
pub enum SystemEvent {
    ConnectStarted { url: String },
    ConnectSkipped { state: ConnectionState },
    Connect { connection_id: String },
    ConnectError { error: WsEventError },
    Disconnect { cause: DisconnectCause },
    Reconnecting { attempt: u32 },
    ReconnectFailed { attempts: u32 },
    Ping,
    Error { error: WsEventError },
}

impl SystemEvent {
    pub fn kind(&self) -> SystemEventKind {
        match self {
            SystemEvent::ConnectStarted { .. } => SystemEventKind::ConnectStarted,
            SystemEvent::ConnectSkipped { .. } => SystemEventKind::ConnectSkipped,
            SystemEvent::Connect { .. } => SystemEventKind::Connect,
            SystemEvent::ConnectError { .. } => SystemEventKind::ConnectError,
            SystemEvent::Disconnect { .. } => SystemEventKind::Disconnect,
            SystemEvent::Reconnecting { .. } => SystemEventKind::Reconnecting,
            SystemEvent::ReconnectFailed { .. } => SystemEventKind::ReconnectFailed,
            SystemEvent::Ping => SystemEventKind::Ping,
            SystemEvent::Error { .. } => SystemEventKind::Error,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }
}

/// Stable notification names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SystemEventKind {
    ConnectStarted,
    ConnectSkipped,
    Connect,
    ConnectError,
    Disconnect,
    Reconnecting,
    ReconnectFailed,
    Ping,
    Error,
}

impl SystemEventKind {
    pub const ALL: [SystemEventKind; 9] = [
        SystemEventKind::ConnectStarted,
        SystemEventKind::ConnectSkipped,
        SystemEventKind::Connect,
        SystemEventKind::ConnectError,
        SystemEventKind::Disconnect,
        SystemEventKind::Reconnecting,
        SystemEventKind::ReconnectFailed,
        SystemEventKind::Ping,
        SystemEventKind::Error,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SystemEventKind::ConnectStarted => "connect_started",
            SystemEventKind::ConnectSkipped => "connect_skipped",
            SystemEventKind::Connect => "connect",
            SystemEventKind::ConnectError => "connect_error",
            SystemEventKind::Disconnect => "disconnect",
            SystemEventKind::Reconnecting => "reconnecting",
            SystemEventKind::ReconnectFailed => "reconnect_failed",
            SystemEventKind::Ping => "ping",
            SystemEventKind::Error => "error",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl fmt::Display for SystemEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub type SystemListener = Arc<dyn Fn(&SystemEvent) + Send + Sync + 'static>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SystemHandle(u64);

struct SystemRegistration {
    handle: SystemHandle,
    /// `None` listens to every kind.
    kind: Option<SystemEventKind>,
    callback: SystemListener,
}

/// Registry and fan-out for [`SystemEvent`]s.
#[derive(Default)]
pub struct SystemNotifier {
    listeners: Mutex<Vec<SystemRegistration>>,
    next_handle: AtomicU64,
}

impl SystemNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, Vec<SystemRegistration>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add(&self, kind: Option<SystemEventKind>, callback: SystemListener) -> SystemHandle {
        let handle = SystemHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.table().push(SystemRegistration {
            handle,
            kind,
            callback,
        });
        handle
    }

    pub fn on_system(
        &self,
        kind: SystemEventKind,
        callback: impl Fn(&SystemEvent) + Send + Sync + 'static,
    ) -> SystemHandle {
        self.add(Some(kind), Arc::new(callback))
    }

    pub fn on_system_any(
        &self,
        callback: impl Fn(&SystemEvent) + Send + Sync + 'static,
    ) -> SystemHandle {
        self.add(None, Arc::new(callback))
    }

    pub fn off_system(&self, handle: SystemHandle) -> bool {
        let mut table = self.table();
        let before = table.len();
        table.retain(|r| r.handle != handle);
        table.len() != before
    }

    /// Deliver `event` to every matching listener, in registration order.
    pub fn notify(&self, event: SystemEvent) {
        let kind = event.kind();
        debug!(notification = kind.name(), event = ?event, "system notification");

        let targets: Vec<SystemListener> = self
            .table()
            .iter()
            .filter(|r| r.kind.is_none_or(|k| k == kind))
            .map(|r| r.callback.clone())
            .collect();

        for listener in targets {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                error!(
                    notification = kind.name(),
                    panic = %panic_message(panic.as_ref()),
                    "system listener panicked"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_stable() {
        let names: Vec<_> = SystemEventKind::ALL.iter().map(|k| k.name()).collect();
        assert_eq!(
            names,
            vec![
                "connect_started",
                "connect_skipped",
                "connect",
                "connect_error",
                "disconnect",
                "reconnecting",
                "reconnect_failed",
                "ping",
                "error"
            ]
        );
        assert_eq!(
            SystemEventKind::from_name("reconnect_failed"),
            Some(SystemEventKind::ReconnectFailed)
        );
        assert_eq!(SystemEventKind::from_name("nope"), None);
    }

    #[test]
    fn filtered_and_catch_all_listeners() {
        let notifier = SystemNotifier::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let pings = seen.clone();
        let handle = notifier.on_system(SystemEventKind::Ping, move |e| {
            pings.lock().unwrap().push(format!("ping:{}", e.name()))
        });
        let all = seen.clone();
        notifier.on_system_any(move |e| all.lock().unwrap().push(format!("any:{}", e.name())));

        notifier.notify(SystemEvent::Ping);
        notifier.notify(SystemEvent::Reconnecting { attempt: 1 });
        assert!(notifier.off_system(handle));
        assert!(!notifier.off_system(handle));
        notifier.notify(SystemEvent::Ping);

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["ping:ping", "any:ping", "any:reconnecting", "any:ping"]
        );
    }

    #[test]
    fn panicking_system_listener_is_contained() {
        let notifier = SystemNotifier::new();
        let hits = Arc::new(AtomicU64::new(0));
        notifier.on_system_any(|_| panic!("listener bug"));
        let counter = hits.clone();
        notifier.on_system_any(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        notifier.notify(SystemEvent::Ping);
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }
}
