use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::core::Error;
use super::message::Message;

/// Datagram codec for protocol messages
///
/// Each buffer handed to the decoder holds exactly one datagram. A decoded
/// datagram is consumed whole, padding included.
#[derive(Clone, Copy, Debug, Default)]
pub struct MessageCodec;

impl MessageCodec {
    /// Creates a new message codec
    pub fn new() -> Self {
        MessageCodec
    }

    /// Decodes one received datagram; an empty datagram is malformed
    pub fn decode_datagram(&mut self, datagram: &[u8]) -> Result<Message, Error> {
        let mut buf = BytesMut::from(datagram);
        self.decode(&mut buf)?
            .ok_or_else(|| Error::malformed("empty datagram"))
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let datagram = src.split();
        Message::decode(&datagram).map(Some)
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode_into(dst);
        Ok(())
    }
}
