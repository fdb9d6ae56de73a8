//! Single-consumer, many-producer audit logger.

use crate::error::{AuditError, AuditResult};
use crate::event::AuditEvent;
use crate::store::{EventFilter, EventStore};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

enum LoggerMsg {
    Event(AuditEvent),
    Flush(oneshot::Sender<()>),
}

struct Running {
    tx: mpsc::UnboundedSender<LoggerMsg>,
    handle: JoinHandle<()>,
}

/// Non-blocking audit sink.
///
/// `log()` enqueues on an unbounded channel and returns immediately no
/// matter how many producers are active. Exactly one consumer task drains
/// the channel in FIFO order into the SQLite store, so no event ever
/// overtakes one enqueued earlier. Write failures are logged locally and
/// swallowed; durability is best-effort and must never stall the decision
/// path.
pub struct AuditLogger {
    path: PathBuf,
    running: Mutex<Option<Running>>,
}

impl AuditLogger {
    /// Create a logger that persists to the store at `path`. The consumer
    /// is not started until [`start`](Self::start) is called.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            running: Mutex::new(None),
        }
    }

    /// Spawn the consumer task. Idempotent.
    ///
    /// The store is opened here so schema errors surface to the caller
    /// instead of dying silently inside the task.
    pub fn start(&self) -> AuditResult<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Ok(());
        }

        let store = EventStore::open(&self.path)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(consume(rx, store));

        *running = Some(Running { tx, handle });
        info!(path = %self.path.display(), "audit logger started");
        Ok(())
    }

    /// Enqueue one event. Never blocks; if the consumer is not running the
    /// event is dropped with a local warning.
    pub fn log(&self, event: AuditEvent) {
        let running = self.running.lock();
        match running.as_ref() {
            Some(r) => {
                if r.tx.send(LoggerMsg::Event(event)).is_err() {
                    warn!("audit consumer gone; event dropped");
                }
            }
            None => {
                warn!(event_type = %event.event_type, "audit logger not running; event dropped");
            }
        }
    }

    /// Wait until every event enqueued before this call is durably written.
    ///
    /// Implemented as a marker pushed through the same FIFO channel; when
    /// the consumer acks it, everything ahead of it has been written.
    pub async fn flush(&self) -> AuditResult<()> {
        let tx = {
            let running = self.running.lock();
            match running.as_ref() {
                Some(r) => r.tx.clone(),
                None => return Ok(()),
            }
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send(LoggerMsg::Flush(ack_tx))
            .map_err(|_| AuditError::NotRunning)?;
        ack_rx.await.map_err(|_| AuditError::NotRunning)?;
        Ok(())
    }

    /// Flush, close the channel, and join the consumer. Idempotent.
    pub async fn stop(&self) -> AuditResult<()> {
        self.flush().await?;

        let running = {
            let mut guard = self.running.lock();
            guard.take()
        };

        if let Some(running) = running {
            drop(running.tx);
            if let Err(e) = running.handle.await {
                warn!(?e, "audit consumer join failed");
            }
            info!("audit logger stopped");
        }
        Ok(())
    }

    /// Synchronous read over the persisted table.
    ///
    /// Intended to be called after [`flush`](Self::flush) for
    /// read-after-write consistency; opens its own connection so reads
    /// never contend with the consumer's writes.
    pub fn query(&self, filter: &EventFilter, limit: usize) -> AuditResult<Vec<AuditEvent>> {
        let store = EventStore::open(&self.path)?;
        store.query(filter, limit)
    }
}

async fn consume(mut rx: mpsc::UnboundedReceiver<LoggerMsg>, store: EventStore) {
    let mut written: u64 = 0;
    let mut failed: u64 = 0;

    while let Some(msg) = rx.recv().await {
        match msg {
            LoggerMsg::Event(event) => match store.insert(&event) {
                Ok(()) => written += 1,
                Err(e) => {
                    // Best-effort durability: record the failure locally and
                    // keep draining so the pipeline never sees it.
                    failed += 1;
                    error!(?e, event_type = %event.event_type, "audit write failed");
                }
            },
            LoggerMsg::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }

    debug!(written, failed, "audit consumer exited");
}
