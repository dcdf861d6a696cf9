use super::*;
use error::CaptureFieldErr;

/// The primary block of a bundle; exactly one per bundle.
///
/// The block serializes as a definite-length array: 8 items with no CRC and
/// no fragment fields, 9 with a CRC only, 10 with fragment fields only, 11
/// with both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryBlock {
    pub version: u64,
    pub bundle_control_flags: BundleControlFlags,
    pub crc_type: CrcType,
    pub destination: EndpointId,
    pub source: EndpointId,
    pub report_to: EndpointId,
    pub creation_timestamp: CreationTimestamp,
    /// Lifetime in microseconds.
    pub lifetime: u64,
    pub fragment_offset: u64,
    pub total_data_length: u64,
    crc: Vec<u8>,
}

impl PrimaryBlock {
    pub fn new(
        bundle_control_flags: BundleControlFlags,
        destination: EndpointId,
        source: EndpointId,
        creation_timestamp: CreationTimestamp,
        lifetime: u64,
    ) -> Self {
        Self {
            version: 7,
            bundle_control_flags,
            crc_type: CrcType::None,
            destination,
            report_to: source.clone(),
            source,
            creation_timestamp,
            lifetime,
            fragment_offset: 0,
            total_data_length: 0,
            crc: Vec::new(),
        }
    }

    pub fn has_fragmentation(&self) -> bool {
        self.bundle_control_flags
            .contains(BundleControlFlags::FRAGMENT)
    }

    /// True once the creation time plus lifetime lies in the past. Bundles
    /// from clock-less sources defer to their Bundle Age block instead.
    pub fn is_lifetime_exceeded(&self) -> bool {
        if self.creation_timestamp.is_unknown() {
            return false;
        }
        DtnTime::now().millisecs()
            > self
                .creation_timestamp
                .dtn_time()
                .millisecs()
                .saturating_add(self.lifetime / 1000)
    }

    fn array_len(&self) -> u64 {
        let mut len = 8;
        if self.has_fragmentation() {
            len += 2;
        }
        if !matches!(self.crc_type, CrcType::None) {
            len += 1;
        }
        len
    }
}

impl Block for PrimaryBlock {
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
        if self.version != 7 {
            errors.push(Error::UnsupportedVersion(self.version));
        }
        let flags = &self.bundle_control_flags;
        if matches!(self.source, EndpointId::Null)
            && (flags.contains(BundleControlFlags::FRAGMENT) || flags.requests_any_report())
        {
            errors.push(Error::InvalidAnonymousFlags);
        } else if flags.contains(BundleControlFlags::ADMINISTRATIVE_RECORD)
            && flags.requests_any_report()
        {
            errors.push(Error::InvalidAdministrativeFlags);
        }
    }
}

impl cbor::encode::ToCbor for PrimaryBlock {
    fn to_cbor(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit_array_header(self.array_len());
        encoder.emit_uint(self.version);
        encoder.emit(&self.bundle_control_flags);
        encoder.emit(&self.crc_type);
        encoder.emit(&self.destination);
        encoder.emit(&self.source);
        encoder.emit(&self.report_to);
        encoder.emit(&self.creation_timestamp);
        encoder.emit_uint(self.lifetime);
        if self.has_fragmentation() {
            encoder.emit_uint(self.fragment_offset);
            encoder.emit_uint(self.total_data_length);
        }
        if !matches!(self.crc_type, CrcType::None) {
            encoder.emit_bytes(&self.crc);
        }
    }
}

impl cbor::decode::FromCbor for PrimaryBlock {
    type Error = Error;

    fn from_cbor(decoder: &mut cbor::decode::Decoder) -> Result<Self, Self::Error> {
        let len = decoder.read_array_header()?;
        if !(8..=11).contains(&len) {
            return Err(Error::InvalidPrimaryArrayLength(len));
        }

        let version = decoder.read_uint().map_field_err("version")?;
        if version != 7 {
            return Err(Error::UnsupportedVersion(version));
        }

        let bundle_control_flags = decoder
            .read()
            .map_field_err("bundle processing control flags")?;
        let crc_type: CrcType = decoder.read()?;
        let destination = decoder.read().map_field_err("destination EID")?;
        let source: EndpointId = decoder.read().map_field_err("source EID")?;
        let report_to = decoder.read().map_field_err("report-to EID")?;
        let creation_timestamp = decoder.read().map_field_err("creation timestamp")?;
        let lifetime = decoder.read_uint().map_field_err("lifetime")?;

        let mut block = Self {
            version,
            bundle_control_flags,
            crc_type,
            destination,
            source,
            report_to,
            creation_timestamp,
            lifetime,
            fragment_offset: 0,
            total_data_length: 0,
            crc: Vec::new(),
        };

        let mut expected = 8;
        if block.has_fragmentation() {
            expected += 2;
            block.fragment_offset = decoder.read_uint().map_field_err("fragment offset")?;
            block.total_data_length = decoder
                .read_uint()
                .map_field_err("total application data unit length")?;
        }
        if !matches!(crc_type, CrcType::None) {
            expected += 1;
            block.crc = decoder.read_bytes().map_field_err("CRC value")?;
            if block.crc.len() != crc_type.crc_len() {
                return Err(Error::InvalidCrcLength(block.crc.len()));
            }
        }
        if len != expected {
            return Err(Error::InvalidPrimaryArrayLength(len));
        }

        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_block() -> PrimaryBlock {
        PrimaryBlock::new(
            BundleControlFlags::MUST_NOT_FRAGMENT,
            "dtn://dest/".parse().unwrap(),
            "dtn://src/".parse().unwrap(),
            CreationTimestamp::new(DtnTime::new(23), 42),
            60_000_000,
        )
    }

    #[test]
    fn test_round_trip() {
        for crc_type in [CrcType::None, CrcType::Crc16, CrcType::Crc32] {
            let mut block = test_block();
            block.set_crc_type(crc_type);
            block.calculate_crc();

            let data = cbor::encode::emit(&block);
            let decoded: PrimaryBlock = cbor::decode::parse(&data).unwrap();
            assert_eq!(decoded, block);
        }
    }

    #[test]
    fn test_crc_laws() {
        for crc_type in [CrcType::Crc16, CrcType::Crc32] {
            let mut block = test_block();
            block.set_crc_type(crc_type);
            block.calculate_crc();
            assert!(block.check_crc());

            block.lifetime += 1;
            assert!(!block.check_crc());
        }
    }

    #[test]
    fn test_fragment_fields() {
        let mut block = test_block();
        block.bundle_control_flags = BundleControlFlags::FRAGMENT;
        block.fragment_offset = 17;
        block.total_data_length = 1024;
        block.set_crc_type(CrcType::Crc32);
        block.calculate_crc();

        let data = cbor::encode::emit(&block);
        let decoded: PrimaryBlock = cbor::decode::parse(&data).unwrap();
        assert_eq!(decoded.fragment_offset, 17);
        assert_eq!(decoded.total_data_length, 1024);
    }

    #[test]
    fn test_bad_array_length() {
        let mut e = cbor::encode::Encoder::new();
        e.emit_array_header(4);
        e.emit_uint(7);
        e.emit_uint(0);
        e.emit_uint(0);
        e.emit_uint(0);
        assert!(matches!(
            cbor::decode::parse::<PrimaryBlock>(&e.into_vec()),
            Err(Error::InvalidPrimaryArrayLength(4))
        ));
    }
}
