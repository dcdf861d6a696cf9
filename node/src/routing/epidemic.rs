use super::*;

/// Broadcast routing: every bundle goes out over every known sender.
#[derive(Default)]
pub struct Epidemic {}

impl Epidemic {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoutingAlgorithm for Epidemic {
    fn notify_incoming(&mut self, _pack: &BundlePack) {}

    fn senders_for_bundle(
        &mut self,
        _pack: &mut BundlePack,
        senders: &[Arc<dyn ConvergenceSender>],
    ) -> Vec<Arc<dyn ConvergenceSender>> {
        senders.to_vec()
    }

    fn report_failure(&mut self, _pack: &BundlePack, _sender: &Arc<dyn ConvergenceSender>) {}

    fn report_peer_appeared(&mut self, _peer: EndpointId) {}

    fn report_peer_disappeared(&mut self, _peer: EndpointId) {}
}
