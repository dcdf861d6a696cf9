use super::*;

const DTN_EPOCH: time::OffsetDateTime = time::macros::datetime!(2000-01-01 00:00:00 UTC);

/// Milliseconds since the DTN epoch, 2000-01-01T00:00:00 UTC.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DtnTime {
    millisecs: u64,
}

impl DtnTime {
    pub const EPOCH: DtnTime = DtnTime { millisecs: 0 };

    pub fn now() -> Self {
        Self {
            millisecs: (time::OffsetDateTime::now_utc() - DTN_EPOCH).whole_milliseconds() as u64,
        }
    }

    pub fn new(millisecs: u64) -> Self {
        Self { millisecs }
    }

    pub fn millisecs(&self) -> u64 {
        self.millisecs
    }

    /// Elapsed milliseconds since `earlier`, zero if `earlier` is in the future.
    pub fn millisecs_since(&self, earlier: DtnTime) -> u64 {
        self.millisecs.saturating_sub(earlier.millisecs)
    }
}

impl std::fmt::Display for DtnTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.millisecs)
    }
}

impl cbor::encode::ToCbor for DtnTime {
    fn to_cbor(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit_uint(self.millisecs)
    }
}

impl cbor::decode::FromCbor for DtnTime {
    type Error = cbor::decode::Error;

    fn from_cbor(decoder: &mut cbor::decode::Decoder) -> Result<Self, Self::Error> {
        decoder.read_uint().map(|millisecs| Self { millisecs })
    }
}
