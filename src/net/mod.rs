//! Replication: bit streams, typed messages, frames and dispatch

pub mod channel;
pub mod dispatch;
pub mod message;
pub mod stream;

pub use channel::{decode_frame, encode_frame, Authority, Frame, MessageChannel, MessageSource, ProtocolError};
pub use message::{Message, MessageType};
pub use stream::{Resolution, Stream, StreamError, StreamRead, StreamWrite};
