pub mod frame;
pub mod health;
pub mod packet;
pub mod ping;
pub mod reconnect;
pub mod types;
pub mod value;

pub use frame::*;
pub use health::*;
pub use packet::{Handshake, IncomingEnvelope, OutgoingEnvelope, Packet};
pub use ping::*;
pub use reconnect::*;
pub use types::*;
pub use value::Value;
