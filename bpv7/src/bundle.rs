use super::*;
use std::collections::{HashMap, HashSet};

/// A bundle: one primary block plus an ordered sequence of canonical blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub primary_block: PrimaryBlock,
    pub canonical_blocks: Vec<CanonicalBlock>,
}

/// The fingerprint that identifies a bundle in transit: source node, creation
/// timestamp and, for fragments, the fragment offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BundleId {
    pub source: EndpointId,
    pub timestamp: CreationTimestamp,
    pub fragment_offset: Option<u64>,
}

impl std::fmt::Display for BundleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.source, self.timestamp)?;
        if let Some(offset) = self.fragment_offset {
            write!(f, "-{offset}")?;
        }
        Ok(())
    }
}

impl Bundle {
    /// Creates a new bundle, checking the §4.2.1 invariants.
    pub fn new(
        primary_block: PrimaryBlock,
        canonical_blocks: Vec<CanonicalBlock>,
    ) -> Result<Self, Error> {
        let bundle = Self::must_new(primary_block, canonical_blocks);
        bundle.validate()?;
        Ok(bundle)
    }

    /// Creates a new bundle without any validity check.
    pub fn must_new(primary_block: PrimaryBlock, canonical_blocks: Vec<CanonicalBlock>) -> Self {
        Self {
            primary_block,
            canonical_blocks,
        }
    }

    pub fn id(&self) -> BundleId {
        BundleId {
            source: self.primary_block.source.clone(),
            timestamp: self.primary_block.creation_timestamp,
            fragment_offset: self
                .primary_block
                .has_fragmentation()
                .then_some(self.primary_block.fragment_offset),
        }
    }

    pub fn is_administrative_record(&self) -> bool {
        self.primary_block
            .bundle_control_flags
            .contains(BundleControlFlags::ADMINISTRATIVE_RECORD)
    }

    pub fn extension_block(&self, block_type: BlockType) -> Option<&CanonicalBlock> {
        self.canonical_blocks
            .iter()
            .find(|cb| cb.block_type == block_type)
    }

    pub fn extension_block_mut(&mut self, block_type: BlockType) -> Option<&mut CanonicalBlock> {
        self.canonical_blocks
            .iter_mut()
            .find(|cb| cb.block_type == block_type)
    }

    pub fn payload_block(&self) -> Option<&CanonicalBlock> {
        self.extension_block(BlockType::Payload)
    }

    /// Adds a canonical block, assigning the lowest unused block number.
    /// Block number 0 belongs to the primary block and is never assigned.
    pub fn add_extension_block(&mut self, mut block: CanonicalBlock) {
        let used: HashSet<u64> = self
            .canonical_blocks
            .iter()
            .map(|cb| cb.block_number)
            .collect();

        let mut number = 1;
        while used.contains(&number) {
            number += 1;
        }
        block.block_number = number;
        self.canonical_blocks.push(block);
    }

    fn for_each_block(&mut self, mut f: impl FnMut(&mut dyn Block)) {
        f(&mut self.primary_block);
        for cb in &mut self.canonical_blocks {
            f(cb);
        }
    }

    /// Sets the CRC type on every block. Call [`Bundle::calculate_crc`] to
    /// also store the values.
    pub fn set_crc_type(&mut self, crc_type: CrcType) {
        self.for_each_block(|b| b.set_crc_type(crc_type));
    }

    pub fn calculate_crc(&mut self) {
        self.for_each_block(|b| b.calculate_crc());
    }

    /// Verifies the CRC of every block. Mutates CRC fields in place while
    /// recomputing, so this is not thread safe.
    pub fn check_crc(&mut self) -> bool {
        let mut ok = true;
        self.for_each_block(|b| {
            if !b.check_crc() {
                ok = false;
            }
        });
        ok
    }

    /// Checks the bundle invariants, accumulating every violation instead of
    /// stopping at the first.
    pub fn validate(&self) -> Result<(), Error> {
        let mut errors = Vec::new();

        self.primary_block.validate(&mut errors);
        for cb in &self.canonical_blocks {
            cb.validate(&mut errors);
        }

        if self.is_administrative_record() || matches!(self.primary_block.source, EndpointId::Null)
        {
            for cb in &self.canonical_blocks {
                if cb
                    .block_control_flags
                    .contains(BlockControlFlags::STATUS_REPORT)
                {
                    errors.push(Error::ForbiddenStatusReportFlag);
                }
            }
        }

        let mut numbers = HashSet::new();
        let mut types: HashMap<BlockType, usize> = HashMap::new();
        for cb in &self.canonical_blocks {
            if !numbers.insert(cb.block_number) {
                errors.push(Error::DuplicateBlockNumber(cb.block_number));
            }
            *types.entry(cb.block_type).or_default() += 1;
        }
        for block_type in [
            BlockType::Payload,
            BlockType::PreviousNode,
            BlockType::BundleAge,
            BlockType::HopCount,
        ] {
            if types.get(&block_type).copied().unwrap_or_default() > 1 {
                errors.push(Error::DuplicateBlockType(block_type.into()));
            }
        }
        if !types.contains_key(&BlockType::Payload) {
            errors.push(Error::MissingPayload);
        }

        if self.primary_block.creation_timestamp.is_unknown()
            && !types.contains_key(&BlockType::BundleAge)
        {
            errors.push(Error::MissingBundleAge);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Invalid(errors))
        }
    }

    /// Serializes the bundle as a CBOR indefinite-length array of its blocks.
    pub fn to_cbor(&self) -> Vec<u8> {
        let mut encoder = cbor::encode::Encoder::new();
        encoder.emit_indefinite_array_header();
        encoder.emit(&self.primary_block);
        for cb in &self.canonical_blocks {
            encoder.emit(cb);
        }
        encoder.emit_break();
        encoder.into_vec()
    }

    /// Decodes a bundle, then runs validation and the CRC checks, returning
    /// every failure at once.
    pub fn from_cbor(data: &[u8]) -> Result<Self, Error> {
        let mut decoder = cbor::decode::Decoder::new(data);
        decoder.expect_indefinite_array_header()?;

        let primary_block = decoder.read()?;
        let mut canonical_blocks = Vec::new();
        loop {
            match decoder.read::<CanonicalBlock>() {
                Ok(cb) => canonical_blocks.push(cb),
                Err(Error::InvalidCbor(cbor::decode::Error::Break)) => break,
                Err(e) => return Err(e),
            }
        }

        let mut bundle = Self::must_new(primary_block, canonical_blocks);

        let mut errors = Vec::new();
        match bundle.validate() {
            Ok(()) => {}
            Err(Error::Invalid(errs)) => errors.extend(errs),
            Err(e) => errors.push(e),
        }
        if !bundle.check_crc() {
            errors.push(Error::CrcCheckFailed);
        }

        if errors.is_empty() {
            Ok(bundle)
        } else {
            Err(Error::Invalid(errors))
        }
    }
}

impl std::fmt::Display for Bundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use builder::Builder;

    fn test_bundle() -> Bundle {
        Builder::new()
            .source("dtn://src/")
            .destination("dtn://dest/")
            .creation_timestamp_now()
            .lifetime("30m")
            .hop_count_block(64)
            .payload_block(b"hello world!".to_vec())
            .crc(CrcType::Crc32)
            .build()
            .unwrap()
    }

    #[test]
    fn test_cbor_round_trip() {
        let bundle = test_bundle();
        let decoded = Bundle::from_cbor(&bundle.to_cbor()).unwrap();
        assert_eq!(decoded, bundle);
    }

    #[test]
    fn test_corrupted_wire_data_fails_crc() {
        let bundle = test_bundle();
        let mut data = bundle.to_cbor();
        // Flip a bit inside the payload bytes
        let pos = data.len() - 4;
        data[pos] ^= 0x01;
        match Bundle::from_cbor(&data) {
            Err(Error::Invalid(errors)) => {
                assert!(errors.iter().any(|e| matches!(e, Error::CrcCheckFailed)));
            }
            other => panic!("expected CRC failure, got {other:?}"),
        }
    }

    #[test]
    fn test_add_extension_block_numbers() {
        let mut bundle = test_bundle();
        let numbers: HashSet<u64> = bundle
            .canonical_blocks
            .iter()
            .map(|cb| cb.block_number)
            .collect();
        assert_eq!(numbers.len(), bundle.canonical_blocks.len());

        bundle.add_extension_block(CanonicalBlock::new_bundle_age_block(0));
        bundle.add_extension_block(CanonicalBlock::new_previous_node_block(
            &"dtn://prev/".parse().unwrap(),
        ));

        let mut numbers: Vec<u64> = bundle
            .canonical_blocks
            .iter()
            .map(|cb| cb.block_number)
            .collect();
        numbers.sort_unstable();
        numbers.dedup();
        assert_eq!(numbers.len(), bundle.canonical_blocks.len());
        assert!(!numbers.contains(&0));
    }

    #[test]
    fn test_zero_timestamp_requires_bundle_age() {
        let primary = PrimaryBlock::new(
            BundleControlFlags::empty(),
            "dtn://dest/".parse().unwrap(),
            "dtn://src/".parse().unwrap(),
            CreationTimestamp::epoch(),
            60_000_000,
        );

        let payload = CanonicalBlock::new_payload_block(b"hello world!".to_vec());
        match Bundle::new(primary.clone(), vec![payload.clone()]) {
            Err(Error::Invalid(errors)) => {
                assert!(errors.iter().any(|e| matches!(e, Error::MissingBundleAge)));
            }
            other => panic!("expected MissingBundleAge, got {other:?}"),
        }

        let mut bundle = Bundle::must_new(primary, vec![payload]);
        bundle.add_extension_block(CanonicalBlock::new_bundle_age_block(0));
        bundle.validate().unwrap();
    }

    #[test]
    fn test_duplicate_blocks_rejected() {
        let primary = PrimaryBlock::new(
            BundleControlFlags::empty(),
            "dtn://dest/".parse().unwrap(),
            "dtn://src/".parse().unwrap(),
            CreationTimestamp::now(),
            60_000_000,
        );
        let mut bundle = Bundle::must_new(
            primary,
            vec![CanonicalBlock::new_payload_block(b"data".to_vec())],
        );
        bundle.add_extension_block(CanonicalBlock::new_hop_count_block(5));
        bundle.add_extension_block(CanonicalBlock::new_hop_count_block(7));

        match bundle.validate() {
            Err(Error::Invalid(errors)) => {
                assert!(errors
                    .iter()
                    .any(|e| matches!(e, Error::DuplicateBlockType(10))));
            }
            other => panic!("expected DuplicateBlockType, got {other:?}"),
        }
    }

    #[test]
    fn test_status_report_flag_forbidden_for_admin_records() {
        let primary = PrimaryBlock::new(
            BundleControlFlags::ADMINISTRATIVE_RECORD,
            "dtn://dest/".parse().unwrap(),
            "dtn://src/".parse().unwrap(),
            CreationTimestamp::now(),
            60_000_000,
        );
        let mut payload = CanonicalBlock::new_payload_block(b"data".to_vec());
        payload.block_control_flags = BlockControlFlags::STATUS_REPORT;

        match Bundle::new(primary, vec![payload]) {
            Err(Error::Invalid(errors)) => {
                assert!(errors
                    .iter()
                    .any(|e| matches!(e, Error::ForbiddenStatusReportFlag)));
            }
            other => panic!("expected ForbiddenStatusReportFlag, got {other:?}"),
        }
    }

    #[test]
    fn test_bundle_id_display() {
        let bundle = Builder::new()
            .source("dtn://src/")
            .destination("dtn://dest/")
            .creation_timestamp(CreationTimestamp::new(DtnTime::new(23), 7))
            .lifetime("60s")
            .payload_block(b"x".to_vec())
            .build()
            .unwrap();
        assert_eq!(bundle.id().to_string(), "dtn://src/-23-7");
    }
}
