use super::*;
use error::CaptureFieldErr;

/// Block type codes this node recognizes. Anything else travels opaquely as
/// [`BlockType::Other`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockType {
    Payload,
    PreviousNode,
    BundleAge,
    HopCount,
    Other(u64),
}

impl From<u64> for BlockType {
    fn from(value: u64) -> Self {
        match value {
            1 => Self::Payload,
            6 => Self::PreviousNode,
            7 => Self::BundleAge,
            10 => Self::HopCount,
            v => Self::Other(v),
        }
    }
}

impl From<BlockType> for u64 {
    fn from(value: BlockType) -> Self {
        match value {
            BlockType::Payload => 1,
            BlockType::PreviousNode => 6,
            BlockType::BundleAge => 7,
            BlockType::HopCount => 10,
            BlockType::Other(v) => v,
        }
    }
}

/// Payload of a Hop Count block: the hop limit and the hops taken so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopCount {
    pub limit: u64,
    pub count: u64,
}

impl HopCount {
    pub fn new(limit: u64) -> Self {
        Self { limit, count: 0 }
    }

    /// Records another hop; true when the limit is now exceeded.
    pub fn increment(&mut self) -> bool {
        self.count += 1;
        self.is_exceeded()
    }

    pub fn is_exceeded(&self) -> bool {
        self.count > self.limit
    }
}

impl cbor::encode::ToCbor for HopCount {
    fn to_cbor(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit_array_header(2);
        encoder.emit_uint(self.limit);
        encoder.emit_uint(self.count);
    }
}

impl cbor::decode::FromCbor for HopCount {
    type Error = cbor::decode::Error;

    fn from_cbor(decoder: &mut cbor::decode::Decoder) -> Result<Self, Self::Error> {
        decoder.expect_array_header(2)?;
        Ok(Self {
            limit: decoder.read_uint()?,
            count: decoder.read_uint()?,
        })
    }
}

/// A canonical block: a block type code, a block number unique within the
/// bundle, control flags, an optional CRC and an opaque byte-string payload.
///
/// The block serializes as a definite-length array of 5 items without a CRC
/// or 6 items with one; the decoder dispatches on the array length and
/// rejects anything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalBlock {
    pub block_type: BlockType,
    pub block_number: u64,
    pub block_control_flags: BlockControlFlags,
    pub crc_type: CrcType,
    data: Vec<u8>,
    crc: Vec<u8>,
}

impl CanonicalBlock {
    pub fn new(
        block_type: BlockType,
        block_number: u64,
        block_control_flags: BlockControlFlags,
        data: Vec<u8>,
    ) -> Self {
        Self {
            block_type,
            block_number,
            block_control_flags,
            crc_type: CrcType::None,
            data,
            crc: Vec::new(),
        }
    }

    pub fn new_payload_block(data: Vec<u8>) -> Self {
        Self::new(BlockType::Payload, 1, BlockControlFlags::empty(), data)
    }

    pub fn new_previous_node_block(node: &EndpointId) -> Self {
        Self::new(
            BlockType::PreviousNode,
            0,
            BlockControlFlags::empty(),
            cbor::encode::emit(node),
        )
    }

    /// Bundle age in microseconds.
    pub fn new_bundle_age_block(age: u64) -> Self {
        Self::new(
            BlockType::BundleAge,
            0,
            BlockControlFlags::empty(),
            cbor::encode::emit(&age),
        )
    }

    pub fn new_hop_count_block(limit: u64) -> Self {
        Self::new(
            BlockType::HopCount,
            0,
            BlockControlFlags::empty(),
            cbor::encode::emit(&HopCount::new(limit)),
        )
    }

    /// The block-type-specific payload, opaque at this layer.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = data;
    }

    pub fn previous_node(&self) -> Option<EndpointId> {
        if !matches!(self.block_type, BlockType::PreviousNode) {
            return None;
        }
        cbor::decode::parse(&self.data).ok()
    }

    pub fn set_previous_node(&mut self, node: &EndpointId) {
        self.data = cbor::encode::emit(node);
    }

    pub fn bundle_age(&self) -> Option<u64> {
        if !matches!(self.block_type, BlockType::BundleAge) {
            return None;
        }
        cbor::decode::parse(&self.data).ok()
    }

    pub fn set_bundle_age(&mut self, age: u64) {
        self.data = cbor::encode::emit(&age);
    }

    pub fn hop_count(&self) -> Option<HopCount> {
        if !matches!(self.block_type, BlockType::HopCount) {
            return None;
        }
        cbor::decode::parse(&self.data).ok()
    }

    pub fn set_hop_count(&mut self, hop_count: &HopCount) {
        self.data = cbor::encode::emit(hop_count);
    }
}

impl Block for CanonicalBlock {
    fn crc_type(&self) -> CrcType {
        self.crc_type
    }

    fn set_crc_type(&mut self, crc_type: CrcType) {
        self.crc_type = crc_type;
        self.crc = vec![0; crc_type.crc_len()];
    }

    fn calculate_crc(&mut self) {
        self.crc = vec![0; self.crc_type.crc_len()];
        let data = cbor::encode::emit(self);
        self.crc = crc::digest(self.crc_type, &data);
    }

    fn check_crc(&mut self) -> bool {
        if matches!(self.crc_type, CrcType::None) {
            return true;
        }
        let stored = std::mem::replace(&mut self.crc, vec![0; self.crc_type.crc_len()]);
        let data = cbor::encode::emit(self);
        let computed = crc::digest(self.crc_type, &data);
        self.crc = stored;
        computed == self.crc
    }

    fn validate(&self, errors: &mut Vec<Error>) {
        if self.block_number == 0 {
            errors.push(Error::InvalidBlockNumber);
        }
        if matches!(self.block_type, BlockType::Payload) && self.block_number != 1 {
            errors.push(Error::InvalidPayloadBlockNumber(self.block_number));
        }
    }
}

impl cbor::encode::ToCbor for CanonicalBlock {
    fn to_cbor(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit_array_header(if matches!(self.crc_type, CrcType::None) {
            5
        } else {
            6
        });
        encoder.emit_uint(u64::from(self.block_type));
        encoder.emit_uint(self.block_number);
        encoder.emit(&self.block_control_flags);
        encoder.emit(&self.crc_type);
        encoder.emit_bytes(&self.data);
        if !matches!(self.crc_type, CrcType::None) {
            encoder.emit_bytes(&self.crc);
        }
    }
}

impl cbor::decode::FromCbor for CanonicalBlock {
    type Error = Error;

    fn from_cbor(decoder: &mut cbor::decode::Decoder) -> Result<Self, Self::Error> {
        let len = decoder.read_array_header()?;
        if len != 5 && len != 6 {
            return Err(Error::InvalidBlockArrayLength(len));
        }

        let block_type = decoder.read_uint().map_field_err("block type code")?.into();
        let block_number = decoder.read_uint().map_field_err("block number")?;
        let block_control_flags = decoder
            .read()
            .map_field_err("block processing control flags")?;
        let crc_type: CrcType = decoder.read()?;
        let data = decoder.read_bytes().map_field_err("block data")?;

        let mut block = Self {
            block_type,
            block_number,
            block_control_flags,
            crc_type,
            data,
            crc: Vec::new(),
        };

        if len == 6 {
            if matches!(crc_type, CrcType::None) {
                return Err(Error::UnexpectedCrcValue);
            }
            block.crc = decoder.read_bytes().map_field_err("CRC value")?;
            if block.crc.len() != crc_type.crc_len() {
                return Err(Error::InvalidCrcLength(block.crc.len()));
            }
        } else if !matches!(crc_type, CrcType::None) {
            return Err(Error::MissingCrcValue);
        }

        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for crc_type in [CrcType::None, CrcType::Crc16, CrcType::Crc32] {
            let mut block = CanonicalBlock::new_payload_block(b"hello world!".to_vec());
            block.set_crc_type(crc_type);
            block.calculate_crc();

            let data = cbor::encode::emit(&block);
            let decoded: CanonicalBlock = cbor::decode::parse(&data).unwrap();
            assert_eq!(decoded, block);
        }
    }

    #[test]
    fn test_crc_flipped_payload() {
        let mut block = CanonicalBlock::new_payload_block(b"hello world!".to_vec());
        block.set_crc_type(CrcType::Crc16);
        block.calculate_crc();
        assert!(block.check_crc());

        let mut data = block.data().to_vec();
        data[0] ^= 0x01;
        block.set_data(data);
        assert!(!block.check_crc());
    }

    #[test]
    fn test_bad_array_length() {
        let mut e = cbor::encode::Encoder::new();
        e.emit_array_header(4);
        e.emit_uint(1);
        e.emit_uint(1);
        e.emit_uint(0);
        e.emit_uint(0);
        assert!(matches!(
            cbor::decode::parse::<CanonicalBlock>(&e.into_vec()),
            Err(Error::InvalidBlockArrayLength(4))
        ));

        let mut e = cbor::encode::Encoder::new();
        e.emit_array_header(7);
        assert!(matches!(
            cbor::decode::parse::<CanonicalBlock>(&e.into_vec()),
            Err(Error::InvalidBlockArrayLength(7))
        ));
    }

    #[test]
    fn test_typed_payloads() {
        let node: EndpointId = "dtn://node/".parse().unwrap();
        let block = CanonicalBlock::new_previous_node_block(&node);
        assert_eq!(block.previous_node(), Some(node));
        assert_eq!(block.bundle_age(), None);

        let block = CanonicalBlock::new_bundle_age_block(1000);
        assert_eq!(block.bundle_age(), Some(1000));

        let mut block = CanonicalBlock::new_hop_count_block(5);
        let mut hops = block.hop_count().unwrap();
        assert_eq!(hops, HopCount { limit: 5, count: 0 });
        assert!(!hops.increment());
        block.set_hop_count(&hops);
        assert_eq!(block.hop_count().unwrap().count, 1);
    }

    #[test]
    fn test_hop_count_exceeded() {
        let mut hops = HopCount::new(1);
        assert!(!hops.increment());
        assert!(hops.increment());
        assert!(hops.is_exceeded());
    }
}
