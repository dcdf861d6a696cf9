use super::*;
use session::{BoxedStream, Session, SessionConfig};
use std::net::SocketAddr;
use std::sync::{Mutex, RwLock, Weak};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

/// Creates a dialing TCP session towards `address`. The transport is
/// established at start time and again on restarts, so registration retries
/// ride out peers that are not up yet.
pub fn dial(address: &str, endpoint: EndpointId, permanent: bool) -> Arc<Session> {
    let address = address.to_string();
    let connect_address = address.clone();

    let mut config = SessionConfig::new(endpoint);
    config.permanent = permanent;
    config.restartable = true;

    Session::connector(
        config,
        move || format!("tcp://{address}"),
        move || {
            let address = connect_address.clone();
            async move {
                match TcpStream::connect(&address).await {
                    Ok(stream) => {
                        _ = stream.set_nodelay(true);
                        (Ok(Box::new(stream) as BoxedStream), true)
                    }
                    Err(e) => (Err(e), true),
                }
            }
        },
    )
}

/// A listening TCP convergence layer. Every accepted connection becomes its
/// own passive [`Session`] whose events feed the listener's channel.
pub struct Listener {
    address: String,
    endpoint: EndpointId,
    heartbeat_timeout: std::time::Duration,
    segment_mru: u64,
    weak_self: Weak<Listener>,
    status_tx: flume::Sender<StatusEvent>,
    status_rx: flume::Receiver<StatusEvent>,
    local_addr: RwLock<Option<SocketAddr>>,
    sessions: Mutex<Vec<Arc<Session>>>,
    cancel: Mutex<CancellationToken>,
}

impl Listener {
    pub fn new(address: &str, endpoint: EndpointId) -> Arc<Self> {
        let (status_tx, status_rx) = flume::unbounded();
        std::sync::Arc::new_cyclic(|weak_self| Self {
            address: address.to_string(),
            endpoint,
            heartbeat_timeout: session::DEFAULT_HEARTBEAT_TIMEOUT,
            segment_mru: session::DEFAULT_SEGMENT_MRU,
            weak_self: weak_self.clone(),
            status_tx,
            status_rx,
            local_addr: RwLock::new(None),
            sessions: Mutex::new(Vec::new()),
            cancel: Mutex::new(CancellationToken::new()),
        })
    }

    /// The bound socket address, once started. Useful with ephemeral ports.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read().expect("failed to lock address")
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener, cancel: CancellationToken) {
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    _ = stream.set_nodelay(true);

                    let mut config = SessionConfig::new(self.endpoint.clone());
                    config.heartbeat_timeout = self.heartbeat_timeout;
                    config.segment_mru = self.segment_mru;

                    let session = Session::accepted(
                        config,
                        move || format!("tcp://{peer_addr}"),
                        Box::new(stream) as BoxedStream,
                    );

                    let (result, _) = Convergence::start(session.as_ref()).await;
                    if let Err(e) = result {
                        warn!("failed to start session for {peer_addr}: {e}");
                        continue;
                    }

                    // Feed the session's events into the listener's channel
                    let rx = session.channel();
                    let tx = self.status_tx.clone();
                    tokio::spawn(async move {
                        while let Ok(event) = rx.recv_async().await {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                    });

                    self.sessions
                        .lock()
                        .expect("failed to lock mutex")
                        .push(session);
                }
                Err(e) => {
                    warn!("failed to accept connection: {e}");
                }
            }
        }
    }
}

#[async_trait]
impl Convergence for Listener {
    fn address(&self) -> String {
        match self.local_addr() {
            Some(addr) => format!("tcp://{addr}"),
            None => format!("tcp://{}", self.address),
        }
    }

    fn is_permanent(&self) -> bool {
        true
    }

    async fn start(&self) -> (Result<()>, bool) {
        let listener = match TcpListener::bind(&self.address).await {
            Ok(listener) => listener,
            Err(e) => return (Err(e.into()), true),
        };
        *self.local_addr.write().expect("failed to lock address") = listener.local_addr().ok();

        info!(address = %self.address(), "TCP convergence layer listening");

        let cancel = CancellationToken::new();
        *self.cancel.lock().expect("failed to lock mutex") = cancel.clone();

        let listener_self = self
            .weak_self
            .upgrade()
            .expect("listener dropped during start");
        tokio::spawn(listener_self.accept_loop(listener, cancel));

        (Ok(()), false)
    }

    async fn close(&self) {
        self.cancel.lock().expect("failed to lock mutex").cancel();

        let sessions = std::mem::take(
            &mut *self.sessions.lock().expect("failed to lock mutex"),
        );
        for session in sessions {
            Convergence::close(session.as_ref()).await;
        }
    }

    fn channel(&self) -> flume::Receiver<StatusEvent> {
        self.status_rx.clone()
    }
}

impl ConvergenceReceiver for Listener {
    fn endpoint_id(&self) -> EndpointId {
        self.endpoint.clone()
    }
}
