/*!
The processing core of a DTN node. The [`processor::Processor`] accepts
bundles from convergence layer adapters, applies a pluggable
[`routing::RoutingAlgorithm`], and hands bundles to outgoing CLAs or to
local [`agent::ApplicationAgent`]s. Bundles in transit are tracked as
[`bundle_pack::BundlePack`]s inside a [`store::Store`].
*/

use drover_bpv7 as bpv7;
use drover_cbor as cbor;
use drover_cla as cla;

pub mod agent;
pub mod bundle_pack;
pub mod id_keeper;
pub mod processor;
pub mod routing;
pub mod store;

pub use agent::{ApplicationAgent, ChannelAgent};
pub use bundle_pack::{BundlePack, Constraint};
pub use id_keeper::IdKeeper;
pub use processor::Processor;
pub use routing::RoutingAlgorithm;
pub use store::{MemoryStore, Store, StoreError};
