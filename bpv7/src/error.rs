use super::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsupported bundle protocol version {0}")]
    UnsupportedVersion(u64),

    #[error("Invalid CRC type {0}")]
    InvalidCrcType(u64),

    #[error("Block has unexpected CRC value length {0}")]
    InvalidCrcLength(usize),

    #[error("Block declares no CRC type but carries a CRC value")]
    UnexpectedCrcValue,

    #[error("Block declares a CRC type but carries no CRC value")]
    MissingCrcValue,

    #[error("CRC verification failed")]
    CrcCheckFailed,

    #[error("Invalid canonical block array length {0}")]
    InvalidBlockArrayLength(u64),

    #[error("Invalid primary block array length {0}")]
    InvalidPrimaryArrayLength(u64),

    #[error("Block number {0} occurred multiple times")]
    DuplicateBlockNumber(u64),

    #[error("Block type {0} occurred multiple times")]
    DuplicateBlockType(u64),

    #[error("Canonical block must not use block number 0")]
    InvalidBlockNumber,

    #[error("Payload block must use block number 1, not {0}")]
    InvalidPayloadBlockNumber(u64),

    #[error("Bundle has no payload block")]
    MissingPayload,

    #[error("Creation timestamp is zero, but no bundle age block is present")]
    MissingBundleAge,

    #[error(
        "Bundle is an administrative record or has an anonymous source, \
         but a canonical block requests status reports"
    )]
    ForbiddenStatusReportFlag,

    #[error("Anonymous bundles must not be fragments or request status reports")]
    InvalidAnonymousFlags,

    #[error("Administrative records must not request status reports")]
    InvalidAdministrativeFlags,

    #[error("Unknown administrative record type code {0}")]
    UnknownAdminRecordType(u64),

    #[error("Invalid lifetime duration: {0}")]
    InvalidLifetime(#[from] humantime::DurationError),

    #[error("Failed to parse {field}: {source}")]
    InvalidField {
        field: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    InvalidEid(#[from] eid::EidError),

    #[error(transparent)]
    InvalidCbor(#[from] cbor::decode::Error),

    #[error("Bundle is invalid: {}", list_errors(.0))]
    Invalid(Vec<Error>),
}

fn list_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub trait CaptureFieldErr<T> {
    fn map_field_err(self, field: &'static str) -> Result<T, Error>;
}

impl<T, E: Into<Box<dyn std::error::Error + Send + Sync>>> CaptureFieldErr<T>
    for std::result::Result<T, E>
{
    fn map_field_err(self, field: &'static str) -> Result<T, Error> {
        self.map_err(|e| Error::InvalidField {
            field,
            source: e.into(),
        })
    }
}
