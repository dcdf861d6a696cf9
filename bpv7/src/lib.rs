/*!
An implementation of the Bundle Protocol Version 7 (BPv7) data model, as
defined in [RFC 9171](https://www.rfc-editor.org/rfc/rfc9171.html).

A [`Bundle`] is one [`PrimaryBlock`] followed by an ordered sequence of
[`CanonicalBlock`]s, framed on the wire as a CBOR indefinite-length array.
Both block shapes share the [`Block`] capability set for CRC handling and
validation. New bundles are put together with the fluent [`builder::Builder`].
*/

use drover_cbor as cbor;

pub mod block;
pub mod builder;
pub mod bundle;
pub mod canonical_block;
pub mod creation_timestamp;
pub mod crc;
pub mod dtn_time;
pub mod eid;
pub mod flags;
pub mod primary_block;
pub mod status_report;

mod error;

pub use block::Block;
pub use bundle::{Bundle, BundleId};
pub use canonical_block::{BlockType, CanonicalBlock, HopCount};
pub use creation_timestamp::CreationTimestamp;
pub use crc::CrcType;
pub use dtn_time::DtnTime;
pub use eid::{EidError, EndpointId};
pub use error::Error;
pub use flags::{BlockControlFlags, BundleControlFlags};
pub use primary_block::PrimaryBlock;
pub use status_report::{
    AdministrativeRecord, StatusInformationPos, StatusReport, StatusReportReason,
};
