use super::*;
use bpv7::EndpointId;
use bundle_pack::BundlePack;
use cla::{Convergence, ConvergenceSender};
use std::sync::Arc;

pub mod dtlsr;
pub mod epidemic;

pub use dtlsr::Dtlsr;
pub use epidemic::Epidemic;

/// The pluggable routing decision layer: given a bundle in transit and the
/// currently known outgoing CLAs, pick the candidates to forward over.
///
/// Strategies may also inspect incoming bundles (e.g. for in-band gossip
/// blocks) and get told about peers appearing and disappearing.
pub trait RoutingAlgorithm: Send {
    /// Called for every bundle entering the node, before dispatch.
    fn notify_incoming(&mut self, pack: &BundlePack);

    /// Picks the senders a bundle should be forwarded over. The pack is
    /// mutable so strategies can attach extension blocks to the outgoing
    /// bundle.
    fn senders_for_bundle(
        &mut self,
        pack: &mut BundlePack,
        senders: &[Arc<dyn ConvergenceSender>],
    ) -> Vec<Arc<dyn ConvergenceSender>>;

    /// Called when forwarding over the given sender failed.
    fn report_failure(&mut self, pack: &BundlePack, sender: &Arc<dyn ConvergenceSender>);

    fn report_peer_appeared(&mut self, peer: EndpointId);

    fn report_peer_disappeared(&mut self, peer: EndpointId);
}
