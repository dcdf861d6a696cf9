use super::*;
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock, Weak};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SEGMENT_MRU: u64 = 65535;

/// How often an in-flight `send` re-checks the acknowledgement set and the
/// session liveness.
const ACK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Any async byte stream will do: TCP, Unix domain sockets, pipes.
pub trait SessionStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> SessionStream for T {}

pub type BoxedStream = Box<dyn SessionStream>;

/// Outcome of the transport-establishment hook: the stream, or an error plus
/// a hint whether a later retry might succeed.
pub type ConnectResult = (std::io::Result<BoxedStream>, bool);

type ConnectFn = Box<dyn Fn() -> BoxFuture<'static, ConnectResult> + Send + Sync>;
type AddressFn = Box<dyn Fn() -> String + Send + Sync>;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionState {
    New,
    Starting,
    Established,
    Closing,
    Closed,
}

/// Static configuration of a [`Session`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// This node's endpoint, not the peer's.
    pub endpoint: EndpointId,
    /// Permanent sessions are not evicted on transient failures.
    pub permanent: bool,
    /// Whether the session may be started again, e.g. after connectivity
    /// issues.
    pub restartable: bool,
    /// Maximum idle duration before a heartbeat is sent; twice this without
    /// traffic from the peer closes the session.
    pub heartbeat_timeout: Duration,
    /// Largest transfer segment this side is willing to receive.
    pub segment_mru: u64,
}

impl SessionConfig {
    pub fn new(endpoint: EndpointId) -> Self {
        Self {
            endpoint,
            permanent: false,
            restartable: false,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            segment_mru: DEFAULT_SEGMENT_MRU,
        }
    }
}

/// A point-to-point session between this node and one peer, carrying chunked
/// bundle transfers over a byte stream.
///
/// A started session owns three cooperating tasks: an inbound reader, an
/// outbound writer and a heartbeat timer. All shared state lives behind its
/// own lock; the session is only handled through `Arc`.
pub struct Session {
    config: SessionConfig,
    address_fn: AddressFn,
    connect_fn: Option<ConnectFn>,
    initial_transport: Mutex<Option<BoxedStream>>,
    weak_self: Weak<Session>,

    state: RwLock<SessionState>,
    was_started_once: AtomicBool,
    peer_endpoint: RwLock<EndpointId>,
    /// The peer's announced receive MRU; segments we send never exceed it.
    peer_mru: AtomicU64,
    status_tx: flume::Sender<StatusEvent>,
    status_rx: flume::Receiver<StatusEvent>,
    out_tx: Mutex<Option<mpsc::UnboundedSender<codec::Message>>>,
    transfer_acks: Mutex<HashSet<u64>>,
    transfer_refusals: Mutex<HashMap<u64, codec::TransferRefusalCode>>,
    next_transfer_id: AtomicU64,
    last_received: RwLock<Instant>,
    last_sent: RwLock<Instant>,
    close_pending: AtomicBool,
    cancel: Mutex<CancellationToken>,
}

impl Session {
    fn new(
        config: SessionConfig,
        address_fn: AddressFn,
        connect_fn: Option<ConnectFn>,
        initial_transport: Option<BoxedStream>,
    ) -> Arc<Self> {
        let (status_tx, status_rx) = flume::unbounded();
        Arc::new_cyclic(|weak_self| Self {
            config,
            address_fn,
            connect_fn,
            initial_transport: Mutex::new(initial_transport),
            weak_self: weak_self.clone(),
            state: RwLock::new(SessionState::New),
            was_started_once: AtomicBool::new(false),
            peer_endpoint: RwLock::new(EndpointId::Null),
            peer_mru: AtomicU64::new(DEFAULT_SEGMENT_MRU),
            status_tx,
            status_rx,
            out_tx: Mutex::new(None),
            transfer_acks: Mutex::new(HashSet::new()),
            transfer_refusals: Mutex::new(HashMap::new()),
            next_transfer_id: AtomicU64::new(0),
            last_received: RwLock::new(Instant::now()),
            last_sent: RwLock::new(Instant::now()),
            close_pending: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
        })
    }

    /// An active session that establishes its transport through `connect`
    /// each time it starts.
    pub fn connector<A, C, F>(config: SessionConfig, address: A, connect: C) -> Arc<Self>
    where
        A: Fn() -> String + Send + Sync + 'static,
        C: Fn() -> F + Send + Sync + 'static,
        F: std::future::Future<Output = ConnectResult> + Send + 'static,
    {
        Self::new(
            config,
            Box::new(address),
            Some(Box::new(move || {
                let fut: BoxFuture<'static, ConnectResult> = Box::pin(connect());
                fut
            })),
            None,
        )
    }

    /// A passive session over an already accepted transport.
    pub fn accepted<A>(config: SessionConfig, address: A, transport: BoxedStream) -> Arc<Self>
    where
        A: Fn() -> String + Send + Sync + 'static,
    {
        Self::new(config, Box::new(address), None, Some(transport))
    }

    pub fn state(&self) -> SessionState {
        *self.state.read().expect("failed to lock session state")
    }

    pub fn is_established(&self) -> bool {
        matches!(self.state(), SessionState::Established)
    }

    /// Active means not yet in a closed state.
    pub fn is_active(&self) -> bool {
        !matches!(self.state(), SessionState::Closed)
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write().expect("failed to lock session state") = state;
    }

    fn emit_event(&self, status: ConvergenceStatus) {
        if let Some(session) = self.weak_self.upgrade() {
            _ = self.status_tx.send(StatusEvent {
                sender: session,
                status,
            });
        }
    }

    fn enqueue(&self, msg: codec::Message) -> bool {
        let guard = self.out_tx.lock().expect("failed to lock mutex");
        match guard.as_ref() {
            Some(tx) => tx.send(msg).is_ok(),
            None => false,
        }
    }

    async fn do_start(&self) -> (Result<()>, bool) {
        if !self.config.restartable && self.was_started_once.swap(true, Ordering::SeqCst) {
            return (Err(Error::NotRestartable), false);
        }
        self.was_started_once.store(true, Ordering::SeqCst);

        // Reset per-start state
        self.set_state(SessionState::Starting);
        *self
            .peer_endpoint
            .write()
            .expect("failed to lock peer endpoint") = EndpointId::Null;
        self.peer_mru
            .store(DEFAULT_SEGMENT_MRU, Ordering::Relaxed);
        self.transfer_acks
            .lock()
            .expect("failed to lock mutex")
            .clear();
        self.transfer_refusals
            .lock()
            .expect("failed to lock mutex")
            .clear();
        *self
            .last_received
            .write()
            .expect("failed to lock timestamp") = Instant::now();
        *self.last_sent.write().expect("failed to lock timestamp") = Instant::now();
        self.close_pending.store(false, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        *self.cancel.lock().expect("failed to lock mutex") = cancel.clone();

        // Establish the transport, either through the hook or from the
        // already accepted stream
        let transport = if let Some(connect) = &self.connect_fn {
            let (result, retry) = connect().await;
            match result {
                Ok(transport) => transport,
                Err(e) => {
                    self.set_state(SessionState::Closed);
                    return (Err(e.into()), retry);
                }
            }
        } else {
            match self
                .initial_transport
                .lock()
                .expect("failed to lock mutex")
                .take()
            {
                Some(transport) => transport,
                None => {
                    self.set_state(SessionState::Closed);
                    return (Err(Error::NoTransport), false);
                }
            }
        };

        info!(session = %self.address(), "starting new CLA session");

        let (read_half, write_half) = tokio::io::split(transport);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        *self.out_tx.lock().expect("failed to lock mutex") = Some(out_tx.clone());

        let session = self
            .weak_self
            .upgrade()
            .expect("session dropped during start");
        tokio::spawn(session.clone().run_outbound(write_half, out_rx, cancel.clone()));
        tokio::spawn(session.clone().run_inbound(read_half, cancel.clone()));
        tokio::spawn(session.run_heartbeat(cancel));

        // Introduce ourselves before anything else flows
        _ = out_tx.send(codec::Message::Identity(codec::IdentityMessage {
            segment_mru: self.config.segment_mru,
            endpoint: self.config.endpoint.clone(),
        }));

        (Ok(()), false)
    }

    async fn run_outbound(
        self: Arc<Self>,
        write_half: tokio::io::WriteHalf<BoxedStream>,
        mut out_rx: mpsc::UnboundedReceiver<codec::Message>,
        cancel: CancellationToken,
    ) {
        let mut framed = FramedWrite::new(write_half, codec::MessageCodec::new());
        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => break,
                msg = out_rx.recv() => msg,
            };
            let Some(msg) = msg else { break };

            let msg_type = msg.message_type();
            if let Err(e) = framed.send(msg).await {
                info!(session = %self.address(), "failed to send {msg_type:?} to peer: {e}");
                self.close_action();
                break;
            }
            *self.last_sent.write().expect("failed to lock timestamp") = Instant::now();
        }

        _ = framed.get_mut().shutdown().await;
    }

    async fn run_inbound(
        self: Arc<Self>,
        read_half: tokio::io::ReadHalf<BoxedStream>,
        cancel: CancellationToken,
    ) {
        let mut framed = FramedRead::new(read_half, codec::MessageCodec::new());
        let mut ingress: Option<(u64, Vec<u8>)> = None;

        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => break,
                frame = framed.next() => frame,
            };

            match frame {
                None => {
                    info!(session = %self.address(), "peer hung up");
                    self.close_action();
                    break;
                }
                Some(Err(e)) => {
                    info!(session = %self.address(), "peer sent invalid data: {e}");
                    self.close_action();
                    break;
                }
                Some(Ok(msg)) => {
                    *self
                        .last_received
                        .write()
                        .expect("failed to lock timestamp") = Instant::now();

                    match msg {
                        codec::Message::Identity(m) => self.on_identity(m),
                        codec::Message::Status(m) if m.is_shutdown() => {
                            debug!(session = %self.address(), "peer started shutdown");
                            self.set_state(SessionState::Closing);
                            self.close_action();
                            break;
                        }
                        codec::Message::Status(_) => {
                            // Heartbeat; freshness was recorded above
                        }
                        codec::Message::TransferSegment(m) => {
                            self.on_transfer_segment(m, &mut ingress)
                        }
                        codec::Message::TransferAck(m) => {
                            self.transfer_acks
                                .lock()
                                .expect("failed to lock mutex")
                                .insert(m.transfer_id);
                        }
                        codec::Message::TransferRefuse(m) => {
                            info!(
                                session = %self.address(),
                                "peer refused transfer {}: {:?}", m.transfer_id, m.reason_code
                            );
                            self.transfer_refusals
                                .lock()
                                .expect("failed to lock mutex")
                                .insert(m.transfer_id, m.reason_code);
                        }
                    }
                }
            }
        }
    }

    fn on_identity(&self, msg: codec::IdentityMessage) {
        *self
            .peer_endpoint
            .write()
            .expect("failed to lock peer endpoint") = msg.endpoint.clone();
        self.peer_mru
            .store(msg.segment_mru.max(1), Ordering::Relaxed);
        self.set_state(SessionState::Established);
        self.emit_event(ConvergenceStatus::PeerAppeared(msg.endpoint));
    }

    fn on_transfer_segment(
        &self,
        msg: codec::TransferSegmentMessage,
        ingress: &mut Option<(u64, Vec<u8>)>,
    ) {
        if msg.flags.start {
            if ingress.is_some() {
                warn!(session = %self.address(), "out of order segment, restarting reassembly");
            }
            *ingress = Some((msg.transfer_id, Vec::with_capacity(msg.data.len())));
        }

        let Some((transfer_id, buffer)) = ingress.as_mut() else {
            warn!(session = %self.address(), "transfer segment without a started transfer");
            return;
        };
        if *transfer_id != msg.transfer_id {
            warn!(
                session = %self.address(),
                "segment for transfer {} while assembling {transfer_id}", msg.transfer_id
            );
            return;
        }
        buffer.extend_from_slice(&msg.data);

        if msg.flags.end {
            let Some((transfer_id, buffer)) = ingress.take() else {
                return;
            };
            let acknowledged_length = buffer.len() as u64;

            match bpv7::Bundle::from_cbor(&buffer) {
                Ok(bundle) => {
                    self.enqueue(codec::Message::TransferAck(codec::TransferAckMessage {
                        transfer_id,
                        acknowledged_length,
                    }));
                    self.emit_event(ConvergenceStatus::ReceivedBundle {
                        endpoint: self.config.endpoint.clone(),
                        bundle: Box::new(bundle),
                    });
                }
                Err(e) => {
                    warn!(session = %self.address(), "received undecodable bundle: {e}");
                    self.enqueue(codec::Message::TransferRefuse(
                        codec::TransferRefusalMessage::new(
                            codec::TransferRefusalCode::Unknown,
                            transfer_id,
                        ),
                    ));
                }
            }
        }
    }

    async fn run_heartbeat(self: Arc<Self>, cancel: CancellationToken) {
        let period = (self.config.heartbeat_timeout / 2).max(Duration::from_millis(100));
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let since_received = self
                        .last_received
                        .read()
                        .expect("failed to lock timestamp")
                        .elapsed();
                    if since_received >= self.config.heartbeat_timeout * 2 {
                        info!(session = %self.address(), "peer missed heartbeats, closing");
                        self.do_close().await;
                        break;
                    }

                    let since_sent = self
                        .last_sent
                        .read()
                        .expect("failed to lock timestamp")
                        .elapsed();
                    if since_sent >= self.config.heartbeat_timeout {
                        self.enqueue(codec::Message::Status(codec::StatusMessage::heartbeat()));
                    }
                }
            }
        }
    }

    /// Sends a bundle and waits for the peer's acknowledgement of the
    /// transfer. Fails once the session closes before the ack arrives.
    async fn do_send(&self, bundle: &bpv7::Bundle) -> Result<()> {
        if !self.is_active() {
            return Err(Error::ConnectionTimeout);
        }

        let data = bundle.to_cbor();
        let transfer_id = self.next_transfer_id.fetch_add(1, Ordering::SeqCst);
        let mru = self.peer_mru.load(Ordering::Relaxed).max(1) as usize;

        // Chunk to the peer's MRU. The end flag goes on the segment carrying
        // fewer bytes than the MRU, so an exact multiple produces a trailing
        // empty segment.
        let mut rest = data.as_slice();
        let mut start = true;
        while rest.len() >= mru {
            let (chunk, tail) = rest.split_at(mru);
            if !self.enqueue(codec::Message::TransferSegment(
                codec::TransferSegmentMessage {
                    flags: codec::SegmentFlags { start, end: false },
                    transfer_id,
                    data: chunk.to_vec(),
                },
            )) {
                return Err(Error::ConnectionTimeout);
            }
            start = false;
            rest = tail;
        }
        if !self.enqueue(codec::Message::TransferSegment(
            codec::TransferSegmentMessage {
                flags: codec::SegmentFlags { start, end: true },
                transfer_id,
                data: rest.to_vec(),
            },
        )) {
            return Err(Error::ConnectionTimeout);
        }

        loop {
            if self
                .transfer_acks
                .lock()
                .expect("failed to lock mutex")
                .remove(&transfer_id)
            {
                return Ok(());
            }
            if let Some(reason) = self
                .transfer_refusals
                .lock()
                .expect("failed to lock mutex")
                .remove(&transfer_id)
            {
                return Err(Error::TransferRefused(transfer_id, reason));
            }
            if !self.is_active() {
                return Err(Error::ConnectionTimeout);
            }
            tokio::time::sleep(ACK_POLL_INTERVAL).await;
        }
    }

    /// Closes the session, telling the peer to do the same if it still can.
    async fn do_close(&self) {
        if self.is_active() {
            self.set_state(SessionState::Closing);
            if self.enqueue(codec::Message::Status(codec::StatusMessage::shutdown())) {
                // Give the writer a moment to flush the shutdown notice
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
        self.close_action();
    }

    /// The single-fire closedown: mark inactive, publish the disappearance,
    /// stop all three tasks, drop the transport. Safe to call concurrently.
    fn close_action(&self) {
        if self.close_pending.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(session = %self.address(), "closing down");
        self.set_state(SessionState::Closed);
        self.emit_event(ConvergenceStatus::PeerDisappeared(self.peer_endpoint_id()));
        self.cancel.lock().expect("failed to lock mutex").cancel();
        *self.out_tx.lock().expect("failed to lock mutex") = None;
    }
}

#[async_trait]
impl Convergence for Session {
    fn address(&self) -> String {
        (self.address_fn)()
    }

    fn is_permanent(&self) -> bool {
        self.config.permanent
    }

    async fn start(&self) -> (Result<()>, bool) {
        self.do_start().await
    }

    async fn close(&self) {
        self.do_close().await
    }

    fn channel(&self) -> flume::Receiver<StatusEvent> {
        self.status_rx.clone()
    }
}

#[async_trait]
impl ConvergenceSender for Session {
    async fn send(&self, bundle: &bpv7::Bundle) -> Result<()> {
        self.do_send(bundle).await
    }

    fn peer_endpoint_id(&self) -> EndpointId {
        self.peer_endpoint
            .read()
            .expect("failed to lock peer endpoint")
            .clone()
    }
}

impl ConvergenceReceiver for Session {
    fn endpoint_id(&self) -> EndpointId {
        self.config.endpoint.clone()
    }
}
