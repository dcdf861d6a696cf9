/*!
Convergence layer adapters (CLAs) carry bundles between neighbouring DTN
nodes over some transport. This crate provides the protocol-agnostic
[`session::Session`] state machine for stream transports, the [`codec`] for
its wire messages, TCP listener/dialer bindings in [`tcp`], and the
[`manager::Manager`] that multiplexes status events from every registered
adapter into one channel.
*/

use drover_bpv7 as bpv7;

pub mod codec;
pub mod manager;
pub mod session;
pub mod tcp;

use async_trait::async_trait;
use bpv7::EndpointId;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection timed out before an acknowledgement was received")]
    ConnectionTimeout,

    #[error("Transfer {0} was refused by the peer: {1:?}")]
    TransferRefused(u64, codec::TransferRefusalCode),

    #[error("Session was already started once and is marked as not restartable")]
    NotRestartable,

    #[error("Session has no transport to start")]
    NoTransport,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] codec::Error),

    #[error(transparent)]
    Bundle(#[from] bpv7::Error),
}

/// Status information flowing out of a CLA.
#[derive(Debug)]
pub enum ConvergenceStatus {
    /// A complete bundle arrived; `endpoint` is the receiving CLA's own EID.
    ReceivedBundle {
        endpoint: EndpointId,
        bundle: Box<bpv7::Bundle>,
    },
    PeerAppeared(EndpointId),
    PeerDisappeared(EndpointId),
}

/// A status event plus a handle onto the session that produced it, so that
/// consumers can immediately send bundles back.
pub struct StatusEvent {
    pub sender: Arc<dyn ConvergenceSender>,
    pub status: ConvergenceStatus,
}

/// Common surface of every convergence layer adapter instance.
#[async_trait]
pub trait Convergence: Send + Sync {
    /// A human-readable, reasonably unique identifier, e.g. `tcp://host:port`.
    fn address(&self) -> String;

    /// Permanent CLAs are not evicted on transient failures.
    fn is_permanent(&self) -> bool;

    /// Starts the adapter. On error, the boolean hints whether a later retry
    /// might succeed.
    async fn start(&self) -> (Result<()>, bool);

    async fn close(&self);

    /// Status information and received bundles.
    fn channel(&self) -> flume::Receiver<StatusEvent>;
}

/// A CLA that can send bundles to a known peer.
#[async_trait]
pub trait ConvergenceSender: Convergence {
    /// Sends a bundle and waits for the peer's reception acknowledgement.
    async fn send(&self, bundle: &bpv7::Bundle) -> Result<()>;

    /// The peer's endpoint identifier, or `dtn:none` until the handshake
    /// completes.
    fn peer_endpoint_id(&self) -> EndpointId;
}

/// A CLA that receives bundles addressed to this node's endpoint.
pub trait ConvergenceReceiver: Convergence {
    fn endpoint_id(&self) -> EndpointId;
}

/// Multiplexes multiple receiver event streams into one. The joined channel
/// is cheap to re-derive whenever the receiver set changes; forwarder tasks
/// exit once their source closes or the joined receiver is dropped.
pub fn join_receivers(receivers: Vec<flume::Receiver<StatusEvent>>) -> flume::Receiver<StatusEvent> {
    let (tx, rx) = flume::unbounded();
    for receiver in receivers {
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Ok(event) = receiver.recv_async().await {
                if tx.send(event).is_err() {
                    break;
                }
            }
        });
    }
    rx
}
