use super::*;
use agent::ApplicationAgent;
use bpv7::builder::Builder;
use bpv7::{
    AdministrativeRecord, BlockType, Bundle, BundleControlFlags, CanonicalBlock, DtnTime,
    EndpointId, StatusInformationPos, StatusReport, StatusReportReason,
};
use bundle_pack::{BundlePack, Constraint};
use cla::{Convergence, ConvergenceReceiver, ConvergenceSender, ConvergenceStatus, StatusEvent};
use futures::future::BoxFuture;
use id_keeper::IdKeeper;
use routing::RoutingAlgorithm;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use store::Store;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Backoff before re-attempting a failed CLA registration that hinted at
/// retry.
const REGISTRATION_BACKOFF: Duration = Duration::from_secs(5);

/// How often stored bundles with open constraints are retried.
const RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Hop limit attached to freshly created status report bundles.
const STATUS_REPORT_HOP_LIMIT: u64 = 5;

/// The bundle processing core: accepts bundles from convergence layers and
/// local agents, applies routing, and hands bundles onwards or delivers them
/// locally.
pub struct Processor {
    inner: Arc<Inner>,
}

struct Inner {
    node_id: EndpointId,
    store: Box<dyn Store>,
    id_keeper: Mutex<IdKeeper>,
    routing: Mutex<Box<dyn RoutingAlgorithm>>,
    agents: Mutex<Vec<Arc<dyn ApplicationAgent>>>,
    senders: Mutex<Vec<Arc<dyn ConvergenceSender>>>,
    receivers: Mutex<Vec<Arc<dyn ConvergenceReceiver>>>,
    reload_tx: flume::Sender<()>,
    reload_rx: flume::Receiver<()>,
    stop: CancellationToken,
    stop_ack_tx: flume::Sender<()>,
    stop_ack_rx: flume::Receiver<()>,
}

impl Processor {
    pub fn new(
        node_id: EndpointId,
        store: Box<dyn Store>,
        routing: Box<dyn RoutingAlgorithm>,
    ) -> Self {
        let (reload_tx, reload_rx) = flume::unbounded();
        let (stop_ack_tx, stop_ack_rx) = flume::bounded(1);
        let inner = Arc::new(Inner {
            node_id,
            store,
            id_keeper: Mutex::new(IdKeeper::new()),
            routing: Mutex::new(routing),
            agents: Mutex::new(Vec::new()),
            senders: Mutex::new(Vec::new()),
            receivers: Mutex::new(Vec::new()),
            reload_tx,
            reload_rx,
            stop: CancellationToken::new(),
            stop_ack_tx,
            stop_ack_rx,
        });

        tokio::spawn(inner.clone().run());

        Self { inner }
    }

    pub fn node_id(&self) -> &EndpointId {
        &self.inner.node_id
    }

    /// Registers an outgoing CLA. It is started first; a start failure with
    /// the retry hint set is re-attempted after a fixed backoff.
    pub fn register_sender(&self, sender: Arc<dyn ConvergenceSender>) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            if start_with_retry(&inner, sender.clone()).await {
                inner
                    .senders
                    .lock()
                    .expect("failed to lock mutex")
                    .push(sender);
            }
        });
    }

    /// Registers an incoming CLA and re-derives the joined event channel.
    pub fn register_receiver(&self, receiver: Arc<dyn ConvergenceReceiver>) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            if start_with_retry(&inner, receiver.clone()).await {
                inner
                    .receivers
                    .lock()
                    .expect("failed to lock mutex")
                    .push(receiver);
                _ = inner.reload_tx.send(());
            }
        });
    }

    /// Registers a CLA that both sends and receives, starting it only once.
    pub fn register_sender_receiver<T>(&self, cla: Arc<T>)
    where
        T: ConvergenceSender + ConvergenceReceiver + 'static,
    {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            if start_with_retry(&inner, cla.clone()).await {
                inner
                    .senders
                    .lock()
                    .expect("failed to lock mutex")
                    .push(cla.clone());
                inner
                    .receivers
                    .lock()
                    .expect("failed to lock mutex")
                    .push(cla);
                _ = inner.reload_tx.send(());
            }
        });
    }

    /// Registers a local application agent and starts draining its outbox.
    pub fn register_agent(&self, agent: Arc<dyn ApplicationAgent>) {
        info!(endpoint = %agent.endpoint_id(), "registered application agent");
        self.inner
            .agents
            .lock()
            .expect("failed to lock mutex")
            .push(agent.clone());

        let inner = self.inner.clone();
        let outbox = agent.outbox();
        tokio::spawn(async move {
            loop {
                let bundle = tokio::select! {
                    _ = inner.stop.cancelled() => break,
                    bundle = outbox.recv_async() => bundle,
                };
                match bundle {
                    Ok(bundle) => inner.transmit(BundlePack::new_local(bundle)).await,
                    Err(_) => break,
                }
            }
        });
    }

    /// Injects a locally originated bundle into the processing core.
    pub fn transmit(&self, bundle: Bundle) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.transmit(BundlePack::new_local(bundle)).await;
        });
    }

    /// Shuts the core down: all registered receivers are closed, then the
    /// event loop acknowledges its own termination.
    pub async fn close(&self) {
        self.inner.stop.cancel();
        _ = self.inner.stop_ack_rx.recv_async().await;
    }
}

async fn start_with_retry<T>(inner: &Arc<Inner>, cla_instance: Arc<T>) -> bool
where
    T: Convergence + ?Sized,
{
    loop {
        if inner.stop.is_cancelled() {
            return false;
        }
        let (result, retry) = cla_instance.start().await;
        match result {
            Ok(()) => {
                info!(cla = %cla_instance.address(), "started CLA");
                return true;
            }
            Err(e) if retry => {
                warn!(cla = %cla_instance.address(), "failed to start CLA, retrying: {e}");
                tokio::select! {
                    _ = inner.stop.cancelled() => return false,
                    _ = tokio::time::sleep(REGISTRATION_BACKOFF) => {}
                }
            }
            Err(e) => {
                warn!(cla = %cla_instance.address(), "failed to start CLA, dropping: {e}");
                return false;
            }
        }
    }
}

impl Inner {
    async fn run(self: Arc<Self>) {
        // Placeholder channel until the first receiver registers; the held
        // sender keeps it from reporting closure
        let (mut _hold, mut chnl) = flume::unbounded::<StatusEvent>();
        let mut retry_interval = tokio::time::interval(RETRY_INTERVAL);
        retry_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => {
                    let receivers = std::mem::take(
                        &mut *self.receivers.lock().expect("failed to lock mutex"),
                    );
                    for receiver in receivers {
                        receiver.close().await;
                    }
                    _ = self.stop_ack_tx.send(());
                    return;
                }

                // Invoked by receiver registration; re-derives the joined channel
                _ = self.reload_rx.recv_async() => {
                    let channels: Vec<_> = self
                        .receivers
                        .lock()
                        .expect("failed to lock mutex")
                        .iter()
                        .map(|receiver| receiver.channel())
                        .collect();
                    chnl = cla::join_receivers(channels);
                }

                event = chnl.recv_async() => match event {
                    Ok(event) => self.handle_event(event).await,
                    Err(_) => {
                        // Every joined source closed; park until reloaded
                        let (tx, rx) = flume::unbounded();
                        _hold = tx;
                        chnl = rx;
                    }
                },

                _ = retry_interval.tick() => self.retry_pending().await,
            }
        }
    }

    async fn handle_event(&self, event: StatusEvent) {
        match event.status {
            ConvergenceStatus::ReceivedBundle { endpoint, bundle } => {
                self.receive(BundlePack::new_received(*bundle, endpoint)).await;
            }
            ConvergenceStatus::PeerAppeared(peer) => {
                info!(%peer, "peer appeared");
                self.routing
                    .lock()
                    .expect("failed to lock mutex")
                    .report_peer_appeared(peer);
            }
            ConvergenceStatus::PeerDisappeared(peer) => {
                info!(%peer, "peer disappeared");
                self.routing
                    .lock()
                    .expect("failed to lock mutex")
                    .report_peer_disappeared(peer);
            }
        }
    }

    /// Ingress of a bundle received from a CLA.
    async fn receive(&self, mut pack: BundlePack) {
        if self.store.knows(&pack.id()) {
            debug!(bundle = %pack, "discarding known bundle");
            return;
        }

        if let Err(e) = pack.bundle.validate() {
            warn!(bundle = %pack, "received invalid bundle: {e}");
            self.send_status_report(
                &pack,
                StatusInformationPos::DeletedBundle,
                StatusReportReason::BlockUnintelligible,
            )
            .await;
            return;
        }

        // Hop count and bundle age advance exactly once per hop, here at
        // ingress; retries of the same hop must not touch them again
        let mut hop_limit_exceeded = false;
        if let Some(block) = pack.bundle.extension_block_mut(BlockType::HopCount) {
            if let Some(mut hops) = block.hop_count() {
                hop_limit_exceeded = hops.increment();
                block.set_hop_count(&hops);
            }
        }
        if hop_limit_exceeded {
            info!(bundle = %pack, "hop limit exceeded");
            self.drop_bundle(pack, StatusReportReason::HopLimitExceeded).await;
            return;
        }
        if self.update_bundle_age(&mut pack) {
            info!(bundle = %pack, "lifetime expired on arrival");
            self.drop_bundle(pack, StatusReportReason::LifetimeExpired).await;
            return;
        }

        pack.add_constraint(Constraint::DispatchPending);
        if let Err(e) = self.store.push(&pack) {
            warn!(bundle = %pack, "failed to store bundle: {e}");
        }

        if pack
            .bundle
            .primary_block
            .bundle_control_flags
            .contains(BundleControlFlags::STATUS_REQUEST_RECEPTION)
        {
            self.send_status_report(
                &pack,
                StatusInformationPos::ReceivedBundle,
                StatusReportReason::NoInformation,
            )
            .await;
        }

        self.dispatch(pack).await;
    }

    /// Ingress of a locally originated bundle.
    async fn transmit(&self, mut pack: BundlePack) {
        self.id_keeper
            .lock()
            .expect("failed to lock mutex")
            .update(&mut pack.bundle);
        pack.bundle.calculate_crc();

        info!(bundle = %pack, "transmitting locally originated bundle");

        pack.add_constraint(Constraint::DispatchPending);
        if let Err(e) = self.store.push(&pack) {
            warn!(bundle = %pack, "failed to store bundle: {e}");
        }
        self.dispatch(pack).await;
    }

    async fn dispatch(&self, pack: BundlePack) {
        self.routing
            .lock()
            .expect("failed to lock mutex")
            .notify_incoming(&pack);

        if self.has_endpoint(&pack.bundle.primary_block.destination) {
            self.local_delivery(pack).await
        } else {
            self.forward(pack).await
        }
    }

    async fn forward(&self, mut pack: BundlePack) {
        pack.remove_constraint(Constraint::DispatchPending);
        pack.add_constraint(Constraint::ForwardPending);
        if let Err(e) = self.store.update(&pack) {
            warn!(bundle = %pack, "failed to update stored bundle: {e}");
        }

        if self.is_expired(&pack) {
            info!(bundle = %pack, "lifetime expired");
            self.drop_bundle(pack, StatusReportReason::LifetimeExpired).await;
            return;
        }

        // Mark ourselves as the previous node before the bundle leaves
        if let Some(block) = pack.bundle.extension_block_mut(BlockType::PreviousNode) {
            block.set_previous_node(&self.node_id);
        } else {
            pack.bundle
                .add_extension_block(CanonicalBlock::new_previous_node_block(&self.node_id));
        }
        pack.bundle.calculate_crc();

        let senders: Vec<Arc<dyn ConvergenceSender>> = self
            .senders
            .lock()
            .expect("failed to lock mutex")
            .clone();
        let candidates = self
            .routing
            .lock()
            .expect("failed to lock mutex")
            .senders_for_bundle(&mut pack, &senders);

        if candidates.is_empty() {
            debug!(bundle = %pack, "no route to destination, retrying later");
            pack.add_constraint(Constraint::Contraindicated);
            if let Err(e) = self.store.update(&pack) {
                warn!(bundle = %pack, "failed to update stored bundle: {e}");
            }
            return;
        }

        let mut sent = 0usize;
        let mut failed = Vec::new();
        for sender in candidates {
            match sender.send(&pack.bundle).await {
                Ok(()) => {
                    info!(bundle = %pack, peer = %sender.address(), "forwarded bundle");
                    sent += 1;
                }
                Err(e) => {
                    warn!(bundle = %pack, peer = %sender.address(), "forwarding failed: {e}");
                    failed.push(sender);
                }
            }
        }
        for sender in &failed {
            self.routing
                .lock()
                .expect("failed to lock mutex")
                .report_failure(&pack, sender);
        }

        if sent > 0
            && pack
                .bundle
                .primary_block
                .bundle_control_flags
                .contains(BundleControlFlags::STATUS_REQUEST_FORWARD)
        {
            self.send_status_report(
                &pack,
                StatusInformationPos::ForwardedBundle,
                StatusReportReason::NoInformation,
            )
            .await;
        }

        if sent > 0 && failed.is_empty() {
            pack.remove_constraint(Constraint::ForwardPending);
            pack.remove_constraint(Constraint::Contraindicated);
        } else {
            // At least one candidate failed; keep the pack for the retry tick
            pack.add_constraint(Constraint::Contraindicated);
        }
        if let Err(e) = self.store.update(&pack) {
            warn!(bundle = %pack, "failed to update stored bundle: {e}");
        }
    }

    async fn local_delivery(&self, mut pack: BundlePack) {
        pack.remove_constraint(Constraint::DispatchPending);
        pack.add_constraint(Constraint::LocalEndpoint);

        if pack.bundle.is_administrative_record() {
            if let Some(payload) = pack.bundle.payload_block() {
                match AdministrativeRecord::from_payload_block(payload) {
                    Ok(AdministrativeRecord::BundleStatusReport(report)) => {
                        info!(
                            bundle = %pack,
                            refers_to = %report.refers_to(),
                            reason = ?report.reason,
                            "received bundle status report"
                        );
                    }
                    Err(e) => warn!(bundle = %pack, "undecodable administrative record: {e}"),
                }
            }
        }

        let destination = pack.bundle.primary_block.destination.clone();
        let agent = self
            .agents
            .lock()
            .expect("failed to lock mutex")
            .iter()
            .find(|agent| agent.endpoint_id() == destination)
            .cloned();

        if let Some(agent) = agent {
            _ = agent.inbox().send(pack.bundle.clone());
            info!(bundle = %pack, endpoint = %destination, "delivered bundle");
        } else {
            debug!(bundle = %pack, endpoint = %destination, "destination endpoint has no agent");
        }

        if pack
            .bundle
            .primary_block
            .bundle_control_flags
            .contains(BundleControlFlags::STATUS_REQUEST_DELIVERY)
        {
            self.send_status_report(
                &pack,
                StatusInformationPos::DeliveredBundle,
                StatusReportReason::NoInformation,
            )
            .await;
        }

        pack.purge_constraints();
        if let Err(e) = self.store.update(&pack) {
            warn!(bundle = %pack, "failed to update stored bundle: {e}");
        }
    }

    /// Advances the bundle age block by the time spent on this node so far.
    /// True when the age now exceeds the lifetime.
    fn update_bundle_age(&self, pack: &mut BundlePack) -> bool {
        let received_at = pack.received_at;
        let lifetime = pack.bundle.primary_block.lifetime;
        let Some(block) = pack.bundle.extension_block_mut(BlockType::BundleAge) else {
            return false;
        };
        let Some(age) = block.bundle_age() else {
            return false;
        };

        let elapsed_micros = DtnTime::now().millisecs_since(received_at) * 1000;
        let new_age = age.saturating_add(elapsed_micros);
        block.set_bundle_age(new_age);
        new_age >= lifetime
    }

    /// Read-only expiry check used on (re-)forwarding attempts.
    fn is_expired(&self, pack: &BundlePack) -> bool {
        if pack.bundle.primary_block.is_lifetime_exceeded() {
            return true;
        }
        if let Some(block) = pack.bundle.extension_block(BlockType::BundleAge) {
            if let Some(age) = block.bundle_age() {
                let elapsed_micros = DtnTime::now().millisecs_since(pack.received_at) * 1000;
                return age.saturating_add(elapsed_micros) >= pack.bundle.primary_block.lifetime;
            }
        }
        false
    }

    async fn drop_bundle(&self, mut pack: BundlePack, reason: StatusReportReason) {
        if pack
            .bundle
            .primary_block
            .bundle_control_flags
            .contains(BundleControlFlags::STATUS_REQUEST_DELETION)
        {
            self.send_status_report(&pack, StatusInformationPos::DeletedBundle, reason)
                .await;
        }

        pack.purge_constraints();
        if self.store.knows(&pack.id()) {
            if let Err(e) = self.store.update(&pack) {
                warn!(bundle = %pack, "failed to update stored bundle: {e}");
            }
        } else if let Err(e) = self.store.push(&pack) {
            warn!(bundle = %pack, "failed to store dropped bundle: {e}");
        }
        info!(bundle = %pack, ?reason, "dropped bundle");
    }

    fn has_endpoint(&self, endpoint: &EndpointId) -> bool {
        if self
            .agents
            .lock()
            .expect("failed to lock mutex")
            .iter()
            .any(|agent| agent.endpoint_id() == *endpoint)
        {
            return true;
        }
        self.receivers
            .lock()
            .expect("failed to lock mutex")
            .iter()
            .any(|receiver| receiver.endpoint_id() == *endpoint)
    }

    /// Creates and transmits a status report about the given pack, unless
    /// the pack itself is an administrative record or the report would loop
    /// back to any local endpoint.
    async fn send_status_report(
        &self,
        pack: &BundlePack,
        status: StatusInformationPos,
        reason: StatusReportReason,
    ) {
        // Don't respond to other administrative records
        if pack.bundle.is_administrative_record() {
            return;
        }

        let report_to = pack.bundle.primary_block.report_to.clone();
        if report_to.is_none() {
            return;
        }
        // Don't respond to ourselves, whichever local endpoint it names
        if self.has_endpoint(&report_to) {
            return;
        }

        let receiver = pack.receiver.clone();
        if !self.has_endpoint(&receiver) {
            warn!(
                bundle = %pack,
                %receiver,
                "cannot report: receiver is not a current endpoint"
            );
            return;
        }

        info!(bundle = %pack, ?status, ?reason, "creating status report");

        let report = StatusReport::new(&pack.bundle, status, reason, DtnTime::now());
        let record = AdministrativeRecord::BundleStatusReport(report);

        let bundle = Builder::new()
            .bundle_ctrl_flags(BundleControlFlags::ADMINISTRATIVE_RECORD)
            .source(&receiver)
            .destination(&report_to)
            .creation_timestamp_now()
            .lifetime("60m")
            .hop_count_block(STATUS_REPORT_HOP_LIMIT)
            .canonical(record.to_payload_block())
            .build();

        match bundle {
            Ok(bundle) => self.transmit_boxed(BundlePack::new_local(bundle)).await,
            Err(e) => warn!(bundle = %pack, "creating status report failed: {e}"),
        }
    }

    /// Boxed indirection breaking the transmit, dispatch, forward,
    /// send_status_report recursion.
    fn transmit_boxed(&self, pack: BundlePack) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.transmit(pack).await })
    }

    async fn retry_pending(&self) {
        let pending = self.store.pending();
        if pending.is_empty() {
            return;
        }
        debug!(count = pending.len(), "retrying pending bundles");

        for mut pack in pending {
            if pack.has_constraint(Constraint::ForwardPending)
                || pack.has_constraint(Constraint::Contraindicated)
            {
                pack.remove_constraint(Constraint::Contraindicated);
                self.forward(pack).await;
            } else if pack.has_constraint(Constraint::DispatchPending) {
                self.dispatch(pack).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent::ChannelAgent;
    use routing::Epidemic;
    use store::MemoryStore;

    fn new_processor() -> Processor {
        Processor::new(
            "dtn://node/".parse().unwrap(),
            Box::new(MemoryStore::new()),
            Box::new(Epidemic::new()),
        )
    }

    fn bundle_between(source: &str, destination: &str) -> Bundle {
        Builder::new()
            .source(source)
            .destination(destination)
            .creation_timestamp_now()
            .lifetime("60s")
            .payload_block(b"hello world!".to_vec())
            .build()
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_agent_to_agent_delivery() {
        let processor = new_processor();

        let alice = Arc::new(ChannelAgent::new("dtn://node/alice".parse().unwrap()));
        let bob = Arc::new(ChannelAgent::new("dtn://node/bob".parse().unwrap()));
        processor.register_agent(alice.clone());
        processor.register_agent(bob.clone());

        alice.submit(bundle_between("dtn://node/alice", "dtn://node/bob"));

        let delivered = tokio::time::timeout(
            Duration::from_secs(5),
            bob.delivered().recv_async(),
        )
        .await
        .expect("delivery timed out")
        .expect("delivery channel closed");
        assert_eq!(delivered.payload_block().unwrap().data(), b"hello world!");

        processor.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_transmit_assigns_sequence_numbers() {
        let processor = new_processor();
        let sink = Arc::new(ChannelAgent::new("dtn://node/sink".parse().unwrap()));
        processor.register_agent(sink.clone());

        let template = || {
            Builder::new()
                .source("dtn://node/")
                .destination("dtn://node/sink")
                .creation_timestamp(bpv7::CreationTimestamp::new(DtnTime::new(1000), 0))
                .lifetime("60s")
                .payload_block(b"x".to_vec())
                .build()
                .unwrap()
        };
        processor.transmit(template());
        processor.transmit(template());

        let mut sequences = Vec::new();
        for _ in 0..2 {
            let bundle = tokio::time::timeout(
                Duration::from_secs(5),
                sink.delivered().recv_async(),
            )
            .await
            .expect("delivery timed out")
            .expect("delivery channel closed");
            sequences.push(bundle.primary_block.creation_timestamp.sequence_number());
        }
        sequences.sort_unstable();
        assert_eq!(sequences, vec![0, 1]);

        processor.close().await;
    }
}
