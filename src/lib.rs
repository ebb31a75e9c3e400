//! Kameo-based real-time event client: named events over a websocket, with acks,
//! middleware, keep-alive and automatic reconnection.

pub mod core;
pub mod persistence;
pub mod supervision;
pub mod testing;
pub mod tls;
pub mod transport;
pub mod ws;

pub use crate::core::{
    ClientConfig, ConnectOptions, ConnectionState, ConnectionStats, DisconnectCause,
    IncomingEnvelope, OutgoingEnvelope, ReconnectPolicy, Value, WsEventError, WsEventResult,
};
pub use persistence::{InMemoryMessageStore, MessageStore};
pub use ws::{
    ClientArgs, ListenerHandle, MiddlewareAction, SystemEvent, SystemEventKind, SystemHandle,
    WsEventClient,
};
