use super::*;

/// Bundle processing control flags of the primary block.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BundleControlFlags(u64);

impl BundleControlFlags {
    pub const FRAGMENT: Self = Self(0x0001);
    pub const ADMINISTRATIVE_RECORD: Self = Self(0x0002);
    pub const MUST_NOT_FRAGMENT: Self = Self(0x0004);
    pub const REQUEST_USER_APPLICATION_ACK: Self = Self(0x0020);
    pub const REQUEST_STATUS_TIME: Self = Self(0x0040);
    pub const STATUS_REQUEST_RECEPTION: Self = Self(0x4000);
    pub const STATUS_REQUEST_FORWARD: Self = Self(0x10000);
    pub const STATUS_REQUEST_DELIVERY: Self = Self(0x20000);
    pub const STATUS_REQUEST_DELETION: Self = Self(0x40000);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(&self) -> u64 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn requests_any_report(&self) -> bool {
        self.0
            & (Self::STATUS_REQUEST_RECEPTION.0
                | Self::STATUS_REQUEST_FORWARD.0
                | Self::STATUS_REQUEST_DELIVERY.0
                | Self::STATUS_REQUEST_DELETION.0)
            != 0
    }
}

impl From<u64> for BundleControlFlags {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<BundleControlFlags> for u64 {
    fn from(value: BundleControlFlags) -> Self {
        value.0
    }
}

impl std::ops::BitOr for BundleControlFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for BundleControlFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl cbor::encode::ToCbor for BundleControlFlags {
    fn to_cbor(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit_uint(self.0)
    }
}

impl cbor::decode::FromCbor for BundleControlFlags {
    type Error = cbor::decode::Error;

    fn from_cbor(decoder: &mut cbor::decode::Decoder) -> Result<Self, Self::Error> {
        decoder.read_uint().map(Self)
    }
}

/// Block processing control flags of a canonical block.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BlockControlFlags(u64);

impl BlockControlFlags {
    pub const REPLICATE: Self = Self(0x01);
    /// Transmit a status report if the block cannot be processed.
    pub const STATUS_REPORT: Self = Self(0x02);
    pub const DELETE_BUNDLE: Self = Self(0x04);
    pub const REMOVE_BLOCK: Self = Self(0x10);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(&self) -> u64 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl From<u64> for BlockControlFlags {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<BlockControlFlags> for u64 {
    fn from(value: BlockControlFlags) -> Self {
        value.0
    }
}

impl std::ops::BitOr for BlockControlFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for BlockControlFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl cbor::encode::ToCbor for BlockControlFlags {
    fn to_cbor(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit_uint(self.0)
    }
}

impl cbor::decode::FromCbor for BlockControlFlags {
    type Error = cbor::decode::Error;

    fn from_cbor(decoder: &mut cbor::decode::Decoder) -> Result<Self, Self::Error> {
        decoder.read_uint().map(Self)
    }
}
