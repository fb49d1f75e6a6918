//! STOMP 1.2 wire layer for the peripheral bridge.

pub mod codec;
pub mod command;
pub mod frame;
pub mod headers;
pub mod heartbeat;

pub use codec::{CodecError, Heartbeat, Inbound, StompCodec};
pub use command::Command;
pub use frame::Frame;
pub use headers::Headers;
pub use heartbeat::{HeartBeat, Negotiated};
