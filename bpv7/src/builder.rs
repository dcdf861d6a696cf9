use super::*;

/// Conversion into an [`EndpointId`] for builder arguments, so callers can
/// pass either parsed identifiers or their string forms.
pub trait ToEndpointId {
    fn to_endpoint_id(self) -> Result<EndpointId, EidError>;
}

impl ToEndpointId for EndpointId {
    fn to_endpoint_id(self) -> Result<EndpointId, EidError> {
        Ok(self)
    }
}

impl ToEndpointId for &EndpointId {
    fn to_endpoint_id(self) -> Result<EndpointId, EidError> {
        Ok(self.clone())
    }
}

impl ToEndpointId for &str {
    fn to_endpoint_id(self) -> Result<EndpointId, EidError> {
        self.parse()
    }
}

/// Fluent construction of a bundle. Errors are deferred: the first one wins
/// and surfaces from [`Builder::build`], which also runs the §4.2.1 validity
/// checks and calculates all CRC values.
pub struct Builder {
    err: Option<Error>,
    bundle_control_flags: BundleControlFlags,
    crc_type: CrcType,
    source: EndpointId,
    destination: EndpointId,
    report_to: Option<EndpointId>,
    creation_timestamp: CreationTimestamp,
    lifetime: u64,
    canonicals: Vec<CanonicalBlock>,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            err: None,
            bundle_control_flags: BundleControlFlags::empty(),
            crc_type: CrcType::None,
            source: EndpointId::Null,
            destination: EndpointId::Null,
            report_to: None,
            creation_timestamp: CreationTimestamp::now(),
            lifetime: 24 * 60 * 60 * 1_000_000,
            canonicals: Vec::new(),
        }
    }
}

impl Builder {
    pub fn new() -> Self {
        Default::default()
    }

    fn record_err(&mut self, err: Error) {
        if self.err.is_none() {
            self.err = Some(err);
        }
    }

    fn eid<E: ToEndpointId>(&mut self, eid: E) -> EndpointId {
        match eid.to_endpoint_id() {
            Ok(eid) => eid,
            Err(e) => {
                self.record_err(e.into());
                EndpointId::Null
            }
        }
    }

    pub fn source<E: ToEndpointId>(mut self, source: E) -> Self {
        self.source = self.eid(source);
        self
    }

    pub fn destination<E: ToEndpointId>(mut self, destination: E) -> Self {
        self.destination = self.eid(destination);
        self
    }

    /// Defaults to the source if never called.
    pub fn report_to<E: ToEndpointId>(mut self, report_to: E) -> Self {
        self.report_to = Some(self.eid(report_to));
        self
    }

    pub fn creation_timestamp(mut self, timestamp: CreationTimestamp) -> Self {
        self.creation_timestamp = timestamp;
        self
    }

    pub fn creation_timestamp_now(self) -> Self {
        self.creation_timestamp(CreationTimestamp::now())
    }

    /// A zero timestamp for clock-less sources; requires a bundle age block.
    pub fn creation_timestamp_epoch(self) -> Self {
        self.creation_timestamp(CreationTimestamp::epoch())
    }

    /// Parses a human-readable duration, e.g. `"60s"` or `"30m"`.
    pub fn lifetime(mut self, lifetime: &str) -> Self {
        match humantime::parse_duration(lifetime) {
            Ok(d) => self.lifetime = d.as_micros() as u64,
            Err(e) => self.record_err(e.into()),
        }
        self
    }

    pub fn lifetime_micros(mut self, lifetime: u64) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn bundle_ctrl_flags(mut self, flags: BundleControlFlags) -> Self {
        self.bundle_control_flags = flags;
        self
    }

    pub fn crc(mut self, crc_type: CrcType) -> Self {
        self.crc_type = crc_type;
        self
    }

    pub fn payload_block(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.canonicals
            .push(CanonicalBlock::new_payload_block(data.into()));
        self
    }

    /// Bundle age in microseconds.
    pub fn bundle_age_block(mut self, age: u64) -> Self {
        self.canonicals
            .push(CanonicalBlock::new_bundle_age_block(age));
        self
    }

    pub fn hop_count_block(mut self, limit: u64) -> Self {
        self.canonicals
            .push(CanonicalBlock::new_hop_count_block(limit));
        self
    }

    pub fn previous_node_block<E: ToEndpointId>(mut self, node: E) -> Self {
        let node = self.eid(node);
        self.canonicals
            .push(CanonicalBlock::new_previous_node_block(&node));
        self
    }

    pub fn canonical(mut self, block: CanonicalBlock) -> Self {
        self.canonicals.push(block);
        self
    }

    pub fn build(mut self) -> Result<Bundle, Error> {
        if let Some(err) = self.err.take() {
            return Err(err);
        }

        let mut primary = PrimaryBlock::new(
            self.bundle_control_flags,
            self.destination,
            self.source,
            self.creation_timestamp,
            self.lifetime,
        );
        if let Some(report_to) = self.report_to.take() {
            primary.report_to = report_to;
        }

        let mut bundle = Bundle::must_new(primary, Vec::new());

        // The payload takes block number 1, extensions the numbers above it
        let mut extensions = Vec::new();
        for cb in self.canonicals {
            if matches!(cb.block_type, BlockType::Payload) {
                bundle.canonical_blocks.push(cb);
            } else {
                extensions.push(cb);
            }
        }
        if bundle.canonical_blocks.is_empty() {
            return Err(Error::MissingPayload);
        }
        for cb in extensions {
            bundle.add_extension_block(cb);
        }

        bundle.set_crc_type(self.crc_type);
        bundle.calculate_crc();
        bundle.validate()?;
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build() {
        let bundle = Builder::new()
            .source("dtn://src/")
            .destination("dtn://dest/")
            .creation_timestamp_epoch()
            .lifetime("60s")
            .bundle_ctrl_flags(
                BundleControlFlags::MUST_NOT_FRAGMENT | BundleControlFlags::REQUEST_STATUS_TIME,
            )
            .bundle_age_block(0)
            .payload_block(b"hello world!".to_vec())
            .build()
            .unwrap();

        assert_eq!(bundle.primary_block.source.to_string(), "dtn://src/");
        assert_eq!(bundle.primary_block.report_to, bundle.primary_block.source);
        assert_eq!(bundle.primary_block.lifetime, 60_000_000);
        assert_eq!(
            bundle.payload_block().unwrap().data(),
            b"hello world!".as_slice()
        );
    }

    #[test]
    fn test_missing_payload() {
        let r = Builder::new()
            .source("dtn://src/")
            .destination("dtn://dest/")
            .lifetime("60s")
            .build();
        assert!(matches!(r, Err(Error::MissingPayload)));
    }

    #[test]
    fn test_invalid_eid_surfaces_at_build() {
        let r = Builder::new()
            .source("uhm://src/")
            .destination("dtn://dest/")
            .payload_block(b"x".to_vec())
            .build();
        assert!(matches!(r, Err(Error::InvalidEid(_))));
    }

    #[test]
    fn test_invalid_lifetime() {
        let r = Builder::new()
            .source("dtn://src/")
            .destination("dtn://dest/")
            .lifetime("one eternity")
            .payload_block(b"x".to_vec())
            .build();
        assert!(matches!(r, Err(Error::InvalidLifetime(_))));
    }

    #[test]
    fn test_crc_applied_to_all_blocks() {
        let mut bundle = Builder::new()
            .source("dtn://src/")
            .destination("dtn://dest/")
            .crc(CrcType::Crc16)
            .hop_count_block(64)
            .payload_block(b"x".to_vec())
            .build()
            .unwrap();

        assert!(matches!(
            bundle.primary_block.crc_type(),
            CrcType::Crc16
        ));
        assert!(bundle.check_crc());
    }
}
