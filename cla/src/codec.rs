use super::*;
use thiserror::Error;
use tokio_util::{
    bytes::{Buf, BufMut, BytesMut},
    codec::Decoder,
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid message type {0}")]
    InvalidMessageType(u8),

    #[error("Invalid transfer refusal reason code {0:#04x}")]
    InvalidRefusalCode(u8),

    #[error("Invalid status kind {0:#04x}")]
    InvalidStatusKind(u8),

    #[error("Truncated message")]
    Truncated,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid endpoint string: {0}")]
    InvalidEndpointUtf8(#[from] std::string::FromUtf8Error),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(#[from] bpv7::EidError),
}

#[repr(u8)]
#[allow(clippy::upper_case_acronyms)]
#[allow(non_camel_case_types)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MessageType {
    XFER_SEGMENT = 1,
    XFER_ACK = 2,
    XFER_REFUSE = 3,
    IDENTITY = 4,
    STATUS = 5,
}

impl TryFrom<u8> for MessageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::XFER_SEGMENT),
            2 => Ok(Self::XFER_ACK),
            3 => Ok(Self::XFER_REFUSE),
            4 => Ok(Self::IDENTITY),
            5 => Ok(Self::STATUS),
            n => Err(Error::InvalidMessageType(n)),
        }
    }
}

/*
+-----------------------------+
|       Message Header        |
+-----------------------------+
|      Segment MRU (U64)      |
+-----------------------------+
|    Endpoint Length (U16)    |
+-----------------------------+
|   Endpoint Data (variable)  |
+-----------------------------+ */

/// Sent first by each side of a session; announces the local endpoint and
/// the maximum segment size this side is willing to receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityMessage {
    pub segment_mru: u64,
    pub endpoint: EndpointId,
}

impl IdentityMessage {
    fn encode(self, dst: &mut BytesMut) -> Result<(), Error> {
        dst.put_u8(MessageType::IDENTITY as u8);
        dst.put_u64(self.segment_mru);
        let endpoint = self.endpoint.to_string();
        dst.put_u16(endpoint.len() as u16);
        dst.put(endpoint.as_bytes());
        Ok(())
    }

    fn decode(src: &mut BytesMut) -> Result<Option<Message>, Error> {
        if src.len() < 10 {
            // Not enough data to read the fixed identity fields
            return Ok(None);
        }
        let mut src_cloned = src.clone();
        let segment_mru = src_cloned.get_u64();
        let endpoint_len = src_cloned.get_u16() as usize;
        if src_cloned.len() < endpoint_len {
            // Not enough data to read the endpoint string
            return Ok(None);
        }
        let endpoint = String::from_utf8(src_cloned.split_to(endpoint_len).to_vec())?
            .parse::<EndpointId>()?;
        src.advance(10 + endpoint_len);
        Ok(Some(Message::Identity(IdentityMessage {
            segment_mru,
            endpoint,
        })))
    }
}

/*
+-----------------------------+
|       Message Header        |
+-----------------------------+
|         Kind (U8)           |
+-----------------------------+ */

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StatusKind {
    Heartbeat = 0x00,
    Shutdown = 0x01,
}

/// Session status notice: a heartbeat keeping the session alive, or a
/// shutdown announcement starting the closedown handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub kind: StatusKind,
}

impl StatusMessage {
    pub fn heartbeat() -> Self {
        Self {
            kind: StatusKind::Heartbeat,
        }
    }

    pub fn shutdown() -> Self {
        Self {
            kind: StatusKind::Shutdown,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self.kind, StatusKind::Shutdown)
    }

    fn encode(self, dst: &mut BytesMut) -> Result<(), Error> {
        dst.put_u8(MessageType::STATUS as u8);
        dst.put_u8(self.kind as u8);
        Ok(())
    }

    fn decode(src: &mut BytesMut) -> Result<Option<Message>, Error> {
        if src.is_empty() {
            return Ok(None);
        }
        let kind = match src.get_u8() {
            0x00 => StatusKind::Heartbeat,
            0x01 => StatusKind::Shutdown,
            n => return Err(Error::InvalidStatusKind(n)),
        };
        Ok(Some(Message::Status(StatusMessage { kind })))
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SegmentFlags {
    pub start: bool,
    pub end: bool,
}

impl From<u8> for SegmentFlags {
    fn from(value: u8) -> Self {
        Self {
            end: value & 1 != 0,
            start: value & 2 != 0,
        }
    }
}

impl From<SegmentFlags> for u8 {
    fn from(value: SegmentFlags) -> u8 {
        let mut flags = 0;
        if value.end {
            flags |= 1;
        }
        if value.start {
            flags |= 2;
        }
        flags
    }
}

/*
+------------------------------+
|       Message Header         |
+------------------------------+
|     Segment Flags (U8)       |
+------------------------------+
|      Transfer ID (U64)       |
+------------------------------+
|      Data length (U64)       |
+------------------------------+
| Data contents (octet string) |
+------------------------------+ */

/// One chunk of a bundle transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSegmentMessage {
    pub flags: SegmentFlags,
    pub transfer_id: u64,
    pub data: Vec<u8>,
}

impl TransferSegmentMessage {
    fn encode(self, dst: &mut BytesMut) -> Result<(), Error> {
        dst.put_u8(MessageType::XFER_SEGMENT as u8);
        dst.put_u8(self.flags.into());
        dst.put_u64(self.transfer_id);
        dst.put_u64(self.data.len() as u64);
        dst.put(self.data.as_slice());
        Ok(())
    }

    fn decode(src: &mut BytesMut) -> Result<Option<Message>, Error> {
        if src.len() < 17 {
            // Not enough data to read the segment header
            return Ok(None);
        }
        let mut src_cloned = src.clone();
        let flags = src_cloned.get_u8().into();
        let transfer_id = src_cloned.get_u64();
        let data_len = src_cloned.get_u64() as usize;
        if src_cloned.len() < data_len {
            // Not enough data to read the segment contents
            return Ok(None);
        }
        let data = src_cloned.split_to(data_len).to_vec();
        src.advance(17 + data_len);
        Ok(Some(Message::TransferSegment(TransferSegmentMessage {
            flags,
            transfer_id,
            data,
        })))
    }
}

/*
+-----------------------------+
|       Message Header        |
+-----------------------------+
|      Transfer ID (U64)      |
+-----------------------------+
| Acknowledged length (U64)   |
+-----------------------------+ */

/// Acknowledges a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferAckMessage {
    pub transfer_id: u64,
    pub acknowledged_length: u64,
}

impl TransferAckMessage {
    fn encode(self, dst: &mut BytesMut) -> Result<(), Error> {
        dst.put_u8(MessageType::XFER_ACK as u8);
        dst.put_u64(self.transfer_id);
        dst.put_u64(self.acknowledged_length);
        Ok(())
    }

    fn decode(src: &mut BytesMut) -> Result<Option<Message>, Error> {
        if src.len() < 16 {
            // Not enough data to read the ack
            return Ok(None);
        }
        Ok(Some(Message::TransferAck(TransferAckMessage {
            transfer_id: src.get_u64(),
            acknowledged_length: src.get_u64(),
        })))
    }
}

/// Refusal reason codes of a XFER_REFUSE message. Anything outside this set
/// is a decode error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransferRefusalCode {
    Unknown = 0x00,
    ExtensionFailure = 0x01,
    Completed = 0x02,
    NoResources = 0x03,
    Retransmit = 0x04,
}

impl TryFrom<u8> for TransferRefusalCode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Unknown),
            0x01 => Ok(Self::ExtensionFailure),
            0x02 => Ok(Self::Completed),
            0x03 => Ok(Self::NoResources),
            0x04 => Ok(Self::Retransmit),
            n => Err(Error::InvalidRefusalCode(n)),
        }
    }
}

/*
+-----------------------------+
|       Message Header        |
+-----------------------------+
|      Reason Code (U8)       |
+-----------------------------+
|      Transfer ID (U64)      |
+-----------------------------+ */

/// Rejects a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRefusalMessage {
    pub reason_code: TransferRefusalCode,
    pub transfer_id: u64,
}

impl TransferRefusalMessage {
    pub fn new(reason_code: TransferRefusalCode, transfer_id: u64) -> Self {
        Self {
            reason_code,
            transfer_id,
        }
    }

    fn encode(self, dst: &mut BytesMut) -> Result<(), Error> {
        dst.put_u8(MessageType::XFER_REFUSE as u8);
        dst.put_u8(self.reason_code as u8);
        dst.put_u64(self.transfer_id);
        Ok(())
    }

    fn decode(src: &mut BytesMut) -> Result<Option<Message>, Error> {
        if src.len() < 9 {
            // Not enough data to read the refusal
            return Ok(None);
        }
        Ok(Some(Message::TransferRefuse(TransferRefusalMessage {
            reason_code: src.get_u8().try_into()?,
            transfer_id: src.get_u64(),
        })))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Identity(IdentityMessage),
    Status(StatusMessage),
    TransferSegment(TransferSegmentMessage),
    TransferAck(TransferAckMessage),
    TransferRefuse(TransferRefusalMessage),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Identity(_) => MessageType::IDENTITY,
            Message::Status(_) => MessageType::STATUS,
            Message::TransferSegment(_) => MessageType::XFER_SEGMENT,
            Message::TransferAck(_) => MessageType::XFER_ACK,
            Message::TransferRefuse(_) => MessageType::XFER_REFUSE,
        }
    }

    /// One-shot encoding, for tests and diagnostics.
    pub fn to_bytes(self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        tokio_util::codec::Encoder::encode(&mut MessageCodec::new(), self, &mut buf)
            .expect("message encoding cannot fail");
        buf.to_vec()
    }

    /// One-shot decoding of a complete message.
    pub fn from_bytes(data: &[u8]) -> Result<Message, Error> {
        let mut buf = BytesMut::from(data);
        MessageCodec::new().decode(&mut buf)?.ok_or(Error::Truncated)
    }
}

/// Frames [`Message`]s over a byte stream.
pub struct MessageCodec {}

impl MessageCodec {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl tokio_util::codec::Decoder for MessageCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            // Not enough data to read the message header
            return Ok(None);
        }

        // Only advance past the header once the body parses completely
        let mut body = src.clone();
        let message_type = body.get_u8().try_into()?;
        let decoded = match message_type {
            MessageType::XFER_SEGMENT => TransferSegmentMessage::decode(&mut body),
            MessageType::XFER_ACK => TransferAckMessage::decode(&mut body),
            MessageType::XFER_REFUSE => TransferRefusalMessage::decode(&mut body),
            MessageType::IDENTITY => IdentityMessage::decode(&mut body),
            MessageType::STATUS => StatusMessage::decode(&mut body),
        }?;

        match decoded {
            None => Ok(None),
            Some(msg) => {
                let consumed = src.len() - body.len();
                src.advance(consumed);
                Ok(Some(msg))
            }
        }
    }
}

impl tokio_util::codec::Encoder<Message> for MessageCodec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Message::Identity(m) => m.encode(dst),
            Message::Status(m) => m.encode(dst),
            Message::TransferSegment(m) => m.encode(dst),
            Message::TransferAck(m) => m.encode(dst),
            Message::TransferRefuse(m) => m.encode(dst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_refusal_round_trip() {
        let msg = Message::TransferRefuse(TransferRefusalMessage::new(
            TransferRefusalCode::Completed,
            42,
        ));
        let data = msg.clone().to_bytes();
        assert_eq!(Message::from_bytes(&data).unwrap(), msg);
    }

    #[test]
    fn test_refusal_invalid_reason() {
        // Reason code 0x05 is outside the assigned range
        let data = hex!("03 05 000000000000002a");
        assert!(matches!(
            Message::from_bytes(&data),
            Err(Error::InvalidRefusalCode(0x05))
        ));
    }

    #[test]
    fn test_identity_round_trip() {
        let msg = Message::Identity(IdentityMessage {
            segment_mru: 65535,
            endpoint: "dtn://node/".parse().unwrap(),
        });
        let data = msg.clone().to_bytes();
        assert_eq!(Message::from_bytes(&data).unwrap(), msg);
    }

    #[test]
    fn test_status_round_trip() {
        for msg in [
            Message::Status(StatusMessage::heartbeat()),
            Message::Status(StatusMessage::shutdown()),
        ] {
            let data = msg.clone().to_bytes();
            assert_eq!(Message::from_bytes(&data).unwrap(), msg);
        }
        assert!(matches!(
            Message::from_bytes(&hex!("05 07")),
            Err(Error::InvalidStatusKind(0x07))
        ));
    }

    #[test]
    fn test_segment_and_ack_round_trip() {
        let msg = Message::TransferSegment(TransferSegmentMessage {
            flags: SegmentFlags {
                start: true,
                end: false,
            },
            transfer_id: 7,
            data: b"chunk".to_vec(),
        });
        let data = msg.clone().to_bytes();
        assert_eq!(Message::from_bytes(&data).unwrap(), msg);

        let msg = Message::TransferAck(TransferAckMessage {
            transfer_id: 7,
            acknowledged_length: 5,
        });
        let data = msg.clone().to_bytes();
        assert_eq!(Message::from_bytes(&data).unwrap(), msg);
    }

    #[test]
    fn test_unknown_message_type() {
        assert!(matches!(
            Message::from_bytes(&hex!("2a")),
            Err(Error::InvalidMessageType(0x2a))
        ));
    }

    #[test]
    fn test_partial_input_wants_more() {
        // A segment header announcing more data than present
        let mut buf = BytesMut::from(hex!("01 03 0000000000000001 0000000000000010").as_slice());
        assert!(MessageCodec::new().decode(&mut buf).unwrap().is_none());
        // Nothing consumed until the message completes
        assert_eq!(buf.len(), 18);
    }
}
