use super::*;
use bpv7::{BlockType, CanonicalBlock};
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Block type code of the DTLSR gossip extension block.
pub const DTLSR_BLOCK_TYPE: u64 = 193;

#[derive(Error, Debug)]
pub enum DtlsrError {
    #[error("Expected 3 fields, got {0}")]
    WrongFieldCount(u64),

    #[error("Key-value array size mismatch: keys {keys}, values {values}")]
    KeyValueMismatch { keys: u64, values: u64 },

    #[error(transparent)]
    InvalidEid(#[from] bpv7::EidError),

    #[error(transparent)]
    InvalidCbor(#[from] cbor::decode::Error),
}

fn timestamp_now() -> u64 {
    time::OffsetDateTime::now_utc().unix_timestamp() as u64
}

/// One node's view of its neighbours: who it has seen, and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerData {
    /// The observing node.
    pub id: EndpointId,
    /// Seconds since the Unix epoch of the last change.
    pub timestamp: u64,
    /// Last-seen timestamps per neighbour.
    pub peers: HashMap<EndpointId, u64>,
}

impl PeerData {
    pub fn new(id: EndpointId) -> Self {
        Self {
            id,
            timestamp: timestamp_now(),
            peers: HashMap::new(),
        }
    }

    /// Strictly newer; gossip with an equal timestamp is ignored.
    pub fn is_newer_than(&self, other: &PeerData) -> bool {
        self.timestamp > other.timestamp
    }
}

impl cbor::encode::ToCbor for PeerData {
    fn to_cbor(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit_array_header(3);
        encoder.emit(&self.id);
        encoder.emit_uint(self.timestamp);

        // The peers map travels as two parallel arrays, keys then values
        encoder.emit_array_header(self.peers.len() as u64);
        let mut keys: Vec<&EndpointId> = self.peers.keys().collect();
        keys.sort();
        for key in &keys {
            encoder.emit(*key);
        }
        encoder.emit_array_header(self.peers.len() as u64);
        for key in &keys {
            encoder.emit_uint(self.peers[*key]);
        }
    }
}

impl cbor::decode::FromCbor for PeerData {
    type Error = DtlsrError;

    fn from_cbor(decoder: &mut cbor::decode::Decoder) -> Result<Self, Self::Error> {
        let fields = decoder.read_array_header()?;
        if fields != 3 {
            return Err(DtlsrError::WrongFieldCount(fields));
        }

        let id: EndpointId = decoder.read()?;
        let timestamp = decoder.read_uint()?;

        let key_count = decoder.read_array_header()?;
        let mut keys = Vec::with_capacity(key_count as usize);
        for _ in 0..key_count {
            keys.push(decoder.read::<EndpointId>()?);
        }

        let value_count = decoder.read_array_header()?;
        if key_count != value_count {
            return Err(DtlsrError::KeyValueMismatch {
                keys: key_count,
                values: value_count,
            });
        }
        let mut values = Vec::with_capacity(value_count as usize);
        for _ in 0..value_count {
            values.push(decoder.read_uint()?);
        }

        Ok(Self {
            id,
            timestamp,
            peers: keys.into_iter().zip(values).collect(),
        })
    }
}

/// Delay-Tolerant Link-State Routing.
///
/// Each node gossips its `PeerData` in-band through extension block 193 on
/// outgoing bundles. The routing table is a shortest-path next-hop map over
/// the union graph of this node's own peers and everything learned from
/// gossip, recomputed lazily whenever either input changed.
pub struct Dtlsr {
    node_id: EndpointId,
    routing_table: HashMap<EndpointId, EndpointId>,
    peers: PeerData,
    /// Set after our own peer set changed and the table is stale.
    peer_change: bool,
    /// Set after fresh gossip arrived and the table is stale.
    received_change: bool,
    received_data: HashMap<EndpointId, PeerData>,
    /// Set once our peer data should ride on outgoing bundles.
    broadcast: bool,
}

impl Dtlsr {
    pub fn new(node_id: EndpointId) -> Self {
        debug!("initialised DTLSR");
        Self {
            node_id: node_id.clone(),
            routing_table: HashMap::new(),
            peers: PeerData::new(node_id),
            peer_change: false,
            received_change: false,
            received_data: HashMap::new(),
            broadcast: false,
        }
    }

    /// Wraps our current peer data as a gossip extension block.
    fn gossip_block(&self) -> CanonicalBlock {
        CanonicalBlock::new(
            BlockType::Other(DTLSR_BLOCK_TYPE),
            0,
            bpv7::BlockControlFlags::empty(),
            cbor::encode::emit(&self.peers),
        )
    }

    fn note_peer(&mut self, peer: EndpointId) {
        let now = timestamp_now();
        self.peers.peers.insert(peer, now);
        self.peers.timestamp = now;
        self.peer_change = true;
        self.broadcast = true;
    }

    /// Shortest-path next hops over the union graph, skipping edges whose
    /// last-seen timestamp lies before `cutoff`.
    fn compute_routing_table(&mut self, cutoff: u64) {
        // Union of our own view and all received views
        let mut views: Vec<&PeerData> = vec![&self.peers];
        views.extend(self.received_data.values());

        let mut edges: HashMap<&EndpointId, Vec<&EndpointId>> = HashMap::new();
        for view in &views {
            let targets: Vec<&EndpointId> = view
                .peers
                .iter()
                .filter(|(_, last_seen)| **last_seen >= cutoff)
                .map(|(peer, _)| peer)
                .collect();
            edges.entry(&view.id).or_default().extend(targets);
        }

        // Breadth-first search from this node; the table keeps the first
        // hop of the shortest path to every reachable destination
        let mut table = HashMap::new();
        let mut visited: HashSet<&EndpointId> = HashSet::new();
        let mut queue: VecDeque<(&EndpointId, Option<&EndpointId>)> = VecDeque::new();

        visited.insert(&self.node_id);
        queue.push_back((&self.node_id, None));

        while let Some((node, first_hop)) = queue.pop_front() {
            if let Some(neighbours) = edges.get(node) {
                for neighbour in neighbours.clone() {
                    if visited.insert(neighbour) {
                        let hop = first_hop.unwrap_or(neighbour);
                        table.insert(neighbour.clone(), hop.clone());
                        queue.push_back((neighbour, Some(hop)));
                    }
                }
            }
        }

        trace!(entries = table.len(), "recomputed DTLSR routing table");
        self.routing_table = table;
    }
}

impl RoutingAlgorithm for Dtlsr {
    fn notify_incoming(&mut self, pack: &BundlePack) {
        let Some(block) = pack
            .bundle
            .extension_block(BlockType::Other(DTLSR_BLOCK_TYPE))
        else {
            return;
        };

        match cbor::decode::parse::<PeerData>(block.data()) {
            Ok(data) => {
                let keep = match self.received_data.get(&data.id) {
                    Some(known) => data.is_newer_than(known),
                    None => true,
                };
                if keep {
                    debug!(node = %data.id, "received fresh DTLSR peer data");
                    self.received_data.insert(data.id.clone(), data);
                    self.received_change = true;
                }
            }
            Err(e) => warn!("undecodable DTLSR block: {e}"),
        }
    }

    fn senders_for_bundle(
        &mut self,
        pack: &mut BundlePack,
        senders: &[Arc<dyn ConvergenceSender>],
    ) -> Vec<Arc<dyn ConvergenceSender>> {
        // Piggyback our own peer data while a broadcast is due; bundles
        // already carrying another node's gossip keep it untouched
        if self.broadcast
            && pack
                .bundle
                .extension_block(BlockType::Other(DTLSR_BLOCK_TYPE))
                .is_none()
        {
            pack.bundle.add_extension_block(self.gossip_block());
        }

        if self.peer_change || self.received_change {
            let lifetime_secs = pack.bundle.primary_block.lifetime / 1_000_000;
            let cutoff = timestamp_now().saturating_sub(lifetime_secs);
            self.compute_routing_table(cutoff);
            self.peer_change = false;
            self.received_change = false;
        }

        let destination = &pack.bundle.primary_block.destination;
        if let Some(next_hop) = self.routing_table.get(destination) {
            let matches: Vec<_> = senders
                .iter()
                .filter(|sender| sender.peer_endpoint_id() == *next_hop)
                .cloned()
                .collect();
            if !matches.is_empty() {
                return matches;
            }
        }

        // No route known: fall back to broadcasting over everything
        senders.to_vec()
    }

    fn report_failure(&mut self, pack: &BundlePack, sender: &Arc<dyn ConvergenceSender>) {
        debug!(
            bundle = %pack.bundle,
            sender = %sender.address(),
            "forwarding failed, keeping table"
        );
    }

    fn report_peer_appeared(&mut self, peer: EndpointId) {
        self.note_peer(peer);
    }

    fn report_peer_disappeared(&mut self, peer: EndpointId) {
        // The last-seen timestamp keeps the encounter; ageing via the
        // cutoff removes the edge once it grows stale
        self.note_peer(peer);
    }
}
