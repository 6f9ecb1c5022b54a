use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::core::{Error, Result};

/// Message kind identifiers, sent as the leading 4-byte tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageKind {
    /// Master → slaves, opens a sync round
    Sync = 0,
    /// Master → slaves, carries the send time of the preceding SYNC
    FollowUp = 1,
    /// Slave → master, opens a delay round
    DelayRequest = 2,
    /// Master → slave, carries the receipt time of the DELAY_REQUEST
    DelayResponse = 3,
}

impl MessageKind {
    /// Parses a wire tag
    pub fn from_tag(tag: u32) -> Result<Self> {
        match tag {
            0 => Ok(MessageKind::Sync),
            1 => Ok(MessageKind::FollowUp),
            2 => Ok(MessageKind::DelayRequest),
            3 => Ok(MessageKind::DelayResponse),
            other => Err(Error::malformed(format!("unknown message tag {}", other))),
        }
    }

    /// Returns the wire tag
    pub fn tag(self) -> u32 {
        self as u32
    }

    /// Whether messages of this kind carry a timestamp
    pub fn has_timestamp(self) -> bool {
        matches!(self, MessageKind::FollowUp | MessageKind::DelayResponse)
    }

    /// Encoded length of a message of this kind
    pub fn encoded_len(self) -> usize {
        if self.has_timestamp() {
            super::MAX_MESSAGE_SIZE
        } else {
            super::HEADER_SIZE
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Sync => write!(f, "SYNC"),
            MessageKind::FollowUp => write!(f, "FOLLOW_UP"),
            MessageKind::DelayRequest => write!(f, "DELAY_REQUEST"),
            MessageKind::DelayResponse => write!(f, "DELAY_RESPONSE"),
        }
    }
}

/// Protocol messages exchanged between master and slaves
///
/// Timestamps are milliseconds since the Unix epoch as read from the
/// sender's clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// Opens sync round `id`
    Sync {
        /// Sync round id
        id: u64,
    },
    /// Closes sync round `id` with the master's SYNC send time
    FollowUp {
        /// Sync round id
        id: u64,
        /// Master time at which the SYNC was sent
        timestamp: i64,
    },
    /// Opens delay round `id`
    DelayRequest {
        /// Delay round id
        id: u64,
    },
    /// Closes delay round `id` with the master's receipt time
    DelayResponse {
        /// Delay round id
        id: u64,
        /// Master time at which the DELAY_REQUEST was received
        timestamp: i64,
    },
}

impl Message {
    /// Returns the kind of this message
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Sync { .. } => MessageKind::Sync,
            Message::FollowUp { .. } => MessageKind::FollowUp,
            Message::DelayRequest { .. } => MessageKind::DelayRequest,
            Message::DelayResponse { .. } => MessageKind::DelayResponse,
        }
    }

    /// Returns the exchange id
    pub fn exchange_id(&self) -> u64 {
        match *self {
            Message::Sync { id }
            | Message::FollowUp { id, .. }
            | Message::DelayRequest { id }
            | Message::DelayResponse { id, .. } => id,
        }
    }

    /// Returns the timestamp, present on FOLLOW_UP and DELAY_RESPONSE
    pub fn timestamp(&self) -> Option<i64> {
        match *self {
            Message::FollowUp { timestamp, .. } | Message::DelayResponse { timestamp, .. } => {
                Some(timestamp)
            }
            Message::Sync { .. } | Message::DelayRequest { .. } => None,
        }
    }

    /// Appends the wire form of this message to `dst`
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(self.kind().encoded_len());
        dst.put_u32(self.kind().tag());
        dst.put_u64(self.exchange_id());
        if let Some(timestamp) = self.timestamp() {
            dst.put_i64(timestamp);
        }
    }

    /// Encodes this message into a fresh buffer
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.kind().encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Decodes a message from a datagram
    ///
    /// Only the declared fields are read; trailing padding is ignored.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < super::HEADER_SIZE {
            return Err(Error::malformed(format!(
                "datagram of {} bytes is shorter than the {}-byte header",
                data.len(),
                super::HEADER_SIZE
            )));
        }

        let mut buf = data;
        let kind = MessageKind::from_tag(buf.get_u32())?;
        let id = buf.get_u64();

        if kind.has_timestamp() && buf.remaining() < 8 {
            return Err(Error::malformed(format!(
                "{} of {} bytes is missing its timestamp",
                kind,
                data.len()
            )));
        }

        Ok(match kind {
            MessageKind::Sync => Message::Sync { id },
            MessageKind::FollowUp => Message::FollowUp { id, timestamp: buf.get_i64() },
            MessageKind::DelayRequest => Message::DelayRequest { id },
            MessageKind::DelayResponse => Message::DelayResponse { id, timestamp: buf.get_i64() },
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.timestamp() {
            Some(timestamp) => write!(f, "{}[{}] @ {}", self.kind(), self.exchange_id(), timestamp),
            None => write!(f, "{}[{}]", self.kind(), self.exchange_id()),
        }
    }
}
