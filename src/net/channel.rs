//! Message channel, authority discipline and frame packing

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;

use super::message::MessageType;
use super::stream::{Stream, StreamWrite};

/// Bumped whenever the wire layout changes
pub const PROTOCOL_VERSION: u8 = 1;

/// Who owns the truth in this process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Authority {
    Host,
    Client,
}

impl Authority {
    pub fn is_host(self) -> bool {
        self == Authority::Host
    }

    /// Host-side effects run exactly once per logical occurrence: on the host
    /// for its own messages, on a client for messages from the network.
    pub fn applies(self, source: MessageSource) -> bool {
        self.is_host() == (source == MessageSource::Loopback)
    }
}

/// Where a message being handled came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageSource {
    /// Produced by this process
    Loopback,
    /// Received from the network
    Remote,
}

/// Channel counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    pub sent: u64,
    pub received: u64,
    pub dropped: u64,
}

/// Outgoing message queue plus counters
#[derive(Debug, Default)]
pub struct MessageChannel {
    outgoing: Vec<Bytes>,
    stats: ChannelStats,
}

impl MessageChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a message of type `ty`
    pub fn msg_new(&self, ty: MessageType) -> StreamWrite {
        let mut writer = StreamWrite::new();
        let mut tag = ty;
        // Writing never fails
        let _ = writer.serialize_enum(&mut tag);
        writer
    }

    /// Seal a message and queue it for the network
    pub fn msg_finalize(&mut self, writer: StreamWrite) -> Bytes {
        let bytes = writer.finish();
        self.outgoing.push(bytes.clone());
        self.stats.sent += 1;
        bytes
    }

    /// Everything finalized since the last call, oldest first
    pub fn take_outgoing(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.outgoing)
    }

    pub(crate) fn record_received(&mut self) {
        self.stats.received += 1;
    }

    pub(crate) fn record_drop(&mut self) {
        self.stats.dropped += 1;
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }
}

/// Frame-level failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u8, actual: u8 },

    #[error("frame truncated")]
    Truncated,

    #[error("too many messages in one frame: {0}")]
    TooManyMessages(usize),
}

/// Messages sent by one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tick: u64,
    pub messages: Vec<Bytes>,
}

/// `[version u8][tick u64][count u16]([len u16][bytes])*`
pub fn encode_frame(tick: u64, messages: &[Bytes]) -> Result<Bytes, ProtocolError> {
    let count = u16::try_from(messages.len())
        .map_err(|_| ProtocolError::TooManyMessages(messages.len()))?;
    let body: usize = messages.iter().map(|m| m.len() + 2).sum();
    let mut buf = BytesMut::with_capacity(11 + body);
    buf.put_u8(PROTOCOL_VERSION);
    buf.put_u64(tick);
    buf.put_u16(count);
    for message in messages {
        // A message is a handful of fields, far below u16::MAX bytes
        buf.put_u16(message.len() as u16);
        buf.put_slice(message);
    }
    Ok(buf.freeze())
}

pub fn decode_frame(mut data: Bytes) -> Result<Frame, ProtocolError> {
    if data.remaining() < 1 {
        return Err(ProtocolError::Truncated);
    }
    let version = data.get_u8();
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            actual: version,
        });
    }
    if data.remaining() < 10 {
        return Err(ProtocolError::Truncated);
    }
    let tick = data.get_u64();
    let count = data.get_u16() as usize;
    let mut messages = Vec::with_capacity(count);
    for _ in 0..count {
        if data.remaining() < 2 {
            return Err(ProtocolError::Truncated);
        }
        let len = data.get_u16() as usize;
        if data.remaining() < len {
            return Err(ProtocolError::Truncated);
        }
        messages.push(data.split_to(len));
    }
    Ok(Frame { tick, messages })
}
