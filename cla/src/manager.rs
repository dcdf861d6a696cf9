use super::*;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Backoff before re-attempting a failed registration that hinted at retry.
const REGISTRATION_BACKOFF: Duration = Duration::from_secs(5);

/// Owns the set of registered convergence layer adapters and multiplexes
/// their status events into a single channel.
pub struct Manager {
    inner: Arc<Inner>,
}

struct Inner {
    clas: Mutex<Vec<Arc<dyn Convergence>>>,
    status_tx: flume::Sender<StatusEvent>,
    status_rx: flume::Receiver<StatusEvent>,
    cancel: CancellationToken,
}

impl Manager {
    pub fn new() -> Self {
        let (status_tx, status_rx) = flume::unbounded();
        Self {
            inner: Arc::new(Inner {
                clas: Mutex::new(Vec::new()),
                status_tx,
                status_rx,
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// The multiplexed status channel of every registered CLA.
    pub fn channel(&self) -> flume::Receiver<StatusEvent> {
        self.inner.status_rx.clone()
    }

    /// Starts and registers a CLA. A start failure with the retry hint set
    /// schedules another attempt after a fixed backoff; without the hint the
    /// CLA is dropped.
    pub fn register(&self, cla: Arc<dyn Convergence>) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                if inner.cancel.is_cancelled() {
                    return;
                }
                let (result, retry) = cla.start().await;
                match result {
                    Ok(()) => break,
                    Err(e) if retry => {
                        warn!(cla = %cla.address(), "failed to start CLA, retrying: {e}");
                        tokio::select! {
                            _ = inner.cancel.cancelled() => return,
                            _ = tokio::time::sleep(REGISTRATION_BACKOFF) => {}
                        }
                    }
                    Err(e) => {
                        warn!(cla = %cla.address(), "failed to start CLA, dropping: {e}");
                        return;
                    }
                }
            }

            info!(cla = %cla.address(), "registered CLA");

            // Fan its events into the manager's channel
            let rx = cla.channel();
            let tx = inner.status_tx.clone();
            let cancel = inner.cancel.clone();
            tokio::spawn(async move {
                loop {
                    let event = tokio::select! {
                        _ = cancel.cancelled() => break,
                        event = rx.recv_async() => event,
                    };
                    match event {
                        Ok(event) => {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
            });

            inner.clas.lock().expect("failed to lock mutex").push(cla);
        });
    }

    /// Closes every registered CLA.
    pub async fn close(&self) {
        self.inner.cancel.cancel();
        let clas = std::mem::take(
            &mut *self.inner.clas.lock().expect("failed to lock mutex"),
        );
        for cla in clas {
            cla.close().await;
        }
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}
