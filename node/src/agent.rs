use super::*;
use bpv7::{Bundle, EndpointId};

/// An application endpoint living on this node. The processor delivers
/// bundles destined to the agent's endpoint into its inbox and drains its
/// outbox into the ingress path as if locally originated.
pub trait ApplicationAgent: Send + Sync {
    fn endpoint_id(&self) -> EndpointId;

    /// Stream of outgoing bundles the agent wants transmitted.
    fn outbox(&self) -> flume::Receiver<Bundle>;

    /// Sink for bundles delivered to this agent.
    fn inbox(&self) -> flume::Sender<Bundle>;
}

/// A channel-backed reference agent.
pub struct ChannelAgent {
    endpoint: EndpointId,
    outbox_tx: flume::Sender<Bundle>,
    outbox_rx: flume::Receiver<Bundle>,
    inbox_tx: flume::Sender<Bundle>,
    inbox_rx: flume::Receiver<Bundle>,
}

impl ChannelAgent {
    pub fn new(endpoint: EndpointId) -> Self {
        let (outbox_tx, outbox_rx) = flume::unbounded();
        let (inbox_tx, inbox_rx) = flume::unbounded();
        Self {
            endpoint,
            outbox_tx,
            outbox_rx,
            inbox_tx,
            inbox_rx,
        }
    }

    /// Queues a bundle for transmission by the node.
    pub fn submit(&self, bundle: Bundle) {
        _ = self.outbox_tx.send(bundle);
    }

    /// Bundles delivered to this agent.
    pub fn delivered(&self) -> flume::Receiver<Bundle> {
        self.inbox_rx.clone()
    }
}

impl ApplicationAgent for ChannelAgent {
    fn endpoint_id(&self) -> EndpointId {
        self.endpoint.clone()
    }

    fn outbox(&self) -> flume::Receiver<Bundle> {
        self.outbox_rx.clone()
    }

    fn inbox(&self) -> flume::Sender<Bundle> {
        self.inbox_tx.clone()
    }
}
