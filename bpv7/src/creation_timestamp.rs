use super::*;

/// The primary block's creation timestamp: a DTN time plus a sequence number
/// distinguishing bundles created within the same millisecond.
///
/// A creation time of zero marks a source without a clock; such bundles must
/// carry a Bundle Age block instead.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct CreationTimestamp {
    time: DtnTime,
    sequence_number: u64,
}

impl CreationTimestamp {
    pub fn new(time: DtnTime, sequence_number: u64) -> Self {
        Self {
            time,
            sequence_number,
        }
    }

    pub fn now() -> Self {
        Self::new(DtnTime::now(), 0)
    }

    pub fn epoch() -> Self {
        Self::new(DtnTime::EPOCH, 0)
    }

    pub fn dtn_time(&self) -> DtnTime {
        self.time
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn set_sequence_number(&mut self, sequence_number: u64) {
        self.sequence_number = sequence_number;
    }

    pub fn is_unknown(&self) -> bool {
        self.time.millisecs() == 0
    }
}

impl std::fmt::Display for CreationTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.time, self.sequence_number)
    }
}

impl cbor::encode::ToCbor for CreationTimestamp {
    fn to_cbor(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit_array_header(2);
        encoder.emit(&self.time);
        encoder.emit_uint(self.sequence_number);
    }
}

impl cbor::decode::FromCbor for CreationTimestamp {
    type Error = cbor::decode::Error;

    fn from_cbor(decoder: &mut cbor::decode::Decoder) -> Result<Self, Self::Error> {
        decoder.expect_array_header(2)?;
        Ok(Self {
            time: decoder.read()?,
            sequence_number: decoder.read_uint()?,
        })
    }
}
