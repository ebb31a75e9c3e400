pub mod ack;
pub mod actor;
pub mod client;
pub mod dispatch;
mod shared;
pub mod system;
pub mod writer;

pub use crate::core::*;

pub use ack::*;
pub use actor::{
    Connect, ConnectionActor, ConnectionActorArgs, Disconnect, EngineEvent, GetConnectionStats,
    SendFrame,
};
pub use client::*;
pub use dispatch::*;
pub use system::*;
pub use writer::*;
