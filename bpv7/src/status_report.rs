use super::*;
use error::CaptureFieldErr;

/// Reason codes carried in a bundle status report.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum StatusReportReason {
    #[default]
    NoInformation,
    LifetimeExpired,
    ForwardUnidirectional,
    TransmissionCanceled,
    DepletedStorage,
    DestinationUnintelligible,
    NoRouteToDestination,
    NoTimelyContact,
    BlockUnintelligible,
    HopLimitExceeded,
    Unassigned(u64),
}

impl From<StatusReportReason> for u64 {
    fn from(value: StatusReportReason) -> Self {
        match value {
            StatusReportReason::NoInformation => 0,
            StatusReportReason::LifetimeExpired => 1,
            StatusReportReason::ForwardUnidirectional => 2,
            StatusReportReason::TransmissionCanceled => 3,
            StatusReportReason::DepletedStorage => 4,
            StatusReportReason::DestinationUnintelligible => 5,
            StatusReportReason::NoRouteToDestination => 6,
            StatusReportReason::NoTimelyContact => 7,
            StatusReportReason::BlockUnintelligible => 8,
            StatusReportReason::HopLimitExceeded => 9,
            StatusReportReason::Unassigned(v) => v,
        }
    }
}

impl From<u64> for StatusReportReason {
    fn from(value: u64) -> Self {
        match value {
            0 => Self::NoInformation,
            1 => Self::LifetimeExpired,
            2 => Self::ForwardUnidirectional,
            3 => Self::TransmissionCanceled,
            4 => Self::DepletedStorage,
            5 => Self::DestinationUnintelligible,
            6 => Self::NoRouteToDestination,
            7 => Self::NoTimelyContact,
            8 => Self::BlockUnintelligible,
            9 => Self::HopLimitExceeded,
            v => Self::Unassigned(v),
        }
    }
}

/// Index into the status information array of a report.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StatusInformationPos {
    ReceivedBundle = 0,
    ForwardedBundle = 1,
    DeliveredBundle = 2,
    DeletedBundle = 3,
}

/// One slot of the status information array: whether the status is asserted,
/// and at what time if the subject bundle requested status times.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct StatusAssertion {
    pub asserted: bool,
    pub time: Option<DtnTime>,
}

impl cbor::encode::ToCbor for StatusAssertion {
    fn to_cbor(&self, encoder: &mut cbor::encode::Encoder) {
        match (self.asserted, self.time) {
            (true, Some(time)) => {
                encoder.emit_array_header(2);
                encoder.emit_bool(true);
                encoder.emit(&time);
            }
            (asserted, _) => {
                encoder.emit_array_header(1);
                encoder.emit_bool(asserted);
            }
        }
    }
}

impl cbor::decode::FromCbor for StatusAssertion {
    type Error = cbor::decode::Error;

    fn from_cbor(decoder: &mut cbor::decode::Decoder) -> Result<Self, Self::Error> {
        let len = decoder.read_array_header()?;
        let asserted = decoder.read_bool()?;
        match len {
            1 => Ok(Self {
                asserted,
                time: None,
            }),
            2 => Ok(Self {
                asserted,
                time: Some(decoder.read()?),
            }),
            actual => Err(cbor::decode::Error::WrongArrayLength {
                expected: 2,
                actual,
            }),
        }
    }
}

/// A bundle status report, the payload of an administrative record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status_information: [StatusAssertion; 4],
    pub reason: StatusReportReason,
    pub source: EndpointId,
    pub timestamp: CreationTimestamp,
    /// Fragment offset and total application data unit length, for reports
    /// about fragments.
    pub fragment: Option<(u64, u64)>,
}

impl StatusReport {
    pub fn new(
        bundle: &Bundle,
        status: StatusInformationPos,
        reason: StatusReportReason,
        time: DtnTime,
    ) -> Self {
        let primary = &bundle.primary_block;
        let mut status_information = [StatusAssertion::default(); 4];
        status_information[status as usize] = StatusAssertion {
            asserted: true,
            time: primary
                .bundle_control_flags
                .contains(BundleControlFlags::REQUEST_STATUS_TIME)
                .then_some(time),
        };

        Self {
            status_information,
            reason,
            source: primary.source.clone(),
            timestamp: primary.creation_timestamp,
            fragment: primary
                .has_fragmentation()
                .then_some((primary.fragment_offset, primary.total_data_length)),
        }
    }

    /// The id of the bundle this report refers to.
    pub fn refers_to(&self) -> BundleId {
        BundleId {
            source: self.source.clone(),
            timestamp: self.timestamp,
            fragment_offset: self.fragment.map(|(offset, _)| offset),
        }
    }
}

impl cbor::encode::ToCbor for StatusReport {
    fn to_cbor(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit_array_header(if self.fragment.is_some() { 6 } else { 4 });
        encoder.emit_array_header(4);
        for assertion in &self.status_information {
            encoder.emit(assertion);
        }
        encoder.emit_uint(u64::from(self.reason));
        encoder.emit(&self.source);
        encoder.emit(&self.timestamp);
        if let Some((offset, total_len)) = self.fragment {
            encoder.emit_uint(offset);
            encoder.emit_uint(total_len);
        }
    }
}

impl cbor::decode::FromCbor for StatusReport {
    type Error = Error;

    fn from_cbor(decoder: &mut cbor::decode::Decoder) -> Result<Self, Self::Error> {
        let len = decoder.read_array_header()?;
        if len != 4 && len != 6 {
            return Err(cbor::decode::Error::WrongArrayLength {
                expected: 4,
                actual: len,
            }
            .into());
        }

        decoder.expect_array_header(4)?;
        let mut status_information = [StatusAssertion::default(); 4];
        for slot in &mut status_information {
            *slot = decoder.read().map_field_err("status assertion")?;
        }

        let reason = decoder.read_uint().map_field_err("reason code")?.into();
        let source = decoder.read().map_field_err("source EID")?;
        let timestamp = decoder.read().map_field_err("creation timestamp")?;

        let fragment = if len == 6 {
            Some((
                decoder.read_uint().map_field_err("fragment offset")?,
                decoder
                    .read_uint()
                    .map_field_err("total application data unit length")?,
            ))
        } else {
            None
        };

        Ok(Self {
            status_information,
            reason,
            source,
            timestamp,
            fragment,
        })
    }
}

/// Record type code of a bundle status report.
pub const BUNDLE_STATUS_REPORT_TYPE_CODE: u64 = 1;

/// An administrative record: a protocol-level payload rather than
/// application data, wrapped as `[type code, content]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdministrativeRecord {
    BundleStatusReport(StatusReport),
}

impl AdministrativeRecord {
    /// Wraps this record as the payload block of a new bundle.
    pub fn to_payload_block(&self) -> CanonicalBlock {
        CanonicalBlock::new_payload_block(cbor::encode::emit(self))
    }

    pub fn from_payload_block(block: &CanonicalBlock) -> Result<Self, Error> {
        cbor::decode::parse(block.data())
    }
}

impl cbor::encode::ToCbor for AdministrativeRecord {
    fn to_cbor(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit_array_header(2);
        match self {
            Self::BundleStatusReport(report) => {
                encoder.emit_uint(BUNDLE_STATUS_REPORT_TYPE_CODE);
                encoder.emit(report);
            }
        }
    }
}

impl cbor::decode::FromCbor for AdministrativeRecord {
    type Error = Error;

    fn from_cbor(decoder: &mut cbor::decode::Decoder) -> Result<Self, Self::Error> {
        decoder.expect_array_header(2)?;
        match decoder.read_uint().map_field_err("record type code")? {
            BUNDLE_STATUS_REPORT_TYPE_CODE => Ok(Self::BundleStatusReport(
                decoder.read().map_field_err("bundle status report")?,
            )),
            v => Err(Error::UnknownAdminRecordType(v)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use builder::Builder;

    fn subject_bundle(flags: BundleControlFlags) -> Bundle {
        Builder::new()
            .source("dtn://src/")
            .destination("dtn://dest/")
            .creation_timestamp(CreationTimestamp::new(DtnTime::new(4000), 2))
            .lifetime("60s")
            .bundle_ctrl_flags(flags)
            .payload_block(b"hello world!".to_vec())
            .build()
            .unwrap()
    }

    #[test]
    fn test_round_trip() {
        let bundle = subject_bundle(BundleControlFlags::REQUEST_STATUS_TIME);
        let report = StatusReport::new(
            &bundle,
            StatusInformationPos::ReceivedBundle,
            StatusReportReason::NoInformation,
            DtnTime::new(5000),
        );
        let record = AdministrativeRecord::BundleStatusReport(report);

        let block = record.to_payload_block();
        let decoded = AdministrativeRecord::from_payload_block(&block).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_status_time_only_when_requested() {
        let bundle = subject_bundle(BundleControlFlags::empty());
        let report = StatusReport::new(
            &bundle,
            StatusInformationPos::DeletedBundle,
            StatusReportReason::HopLimitExceeded,
            DtnTime::new(5000),
        );

        let deleted = report.status_information[StatusInformationPos::DeletedBundle as usize];
        assert!(deleted.asserted);
        assert!(deleted.time.is_none());
        assert_eq!(report.refers_to(), bundle.id());
    }

    #[test]
    fn test_unknown_record_type() {
        let mut e = cbor::encode::Encoder::new();
        e.emit_array_header(2);
        e.emit_uint(9);
        e.emit_uint(0);
        assert!(matches!(
            cbor::decode::parse::<AdministrativeRecord>(&e.into_vec()),
            Err(Error::UnknownAdminRecordType(9))
        ));
    }
}
