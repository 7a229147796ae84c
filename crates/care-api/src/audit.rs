//! # Audit Logger
//!
//! Request handlers never write audit rows themselves. They hand a
//! [`NewAuditEntry`] to [`AuditLogger::record`], which queues it on a
//! bounded channel and returns immediately. One writer task drains the
//! channel and appends each entry through [`Datastore::append_audit`]
//! under a process-wide async lock, so hashes chain in arrival order.
//!
//! ```text
//! handler ──try_send──▶ [bounded mpsc] ──▶ writer task ──lock──▶ AppendAuditTx
//! ```
//!
//! A full queue or a closed writer drops the entry with a warning; a
//! failed append is logged and skipped. Neither ever reaches the caller.
//!
//! [`Datastore::append_audit`]: crate::db::Datastore::append_audit

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use care_core::audit::{AuditEntry, NewAuditEntry};

use crate::db::{Store, StoreError};

/// Default queue depth.
pub const DEFAULT_CAPACITY: usize = 1024;

enum Message {
    Append(NewAuditEntry),
    /// Acknowledged once every earlier message has been written.
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to the audit writer. Cheap to clone.
#[derive(Clone)]
pub struct AuditLogger {
    tx: mpsc::Sender<Message>,
    store: Store,
    write_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("queued", &(self.tx.max_capacity() - self.tx.capacity()))
            .finish_non_exhaustive()
    }
}

impl AuditLogger {
    /// Start the writer task on the current runtime.
    pub fn spawn(store: Store, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let write_lock = Arc::new(Mutex::new(()));
        let handle = tokio::spawn(writer(rx, store.clone(), write_lock.clone()));
        (
            Self {
                tx,
                store,
                write_lock,
            },
            handle,
        )
    }

    /// Queue an entry. Never blocks and never fails the caller.
    pub fn record(&self, entry: NewAuditEntry) {
        match self.tx.try_send(Message::Append(entry)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("audit queue full; entry dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("audit writer stopped; entry dropped");
            }
        }
    }

    /// Append synchronously, bypassing the queue. Used for events that
    /// must be chained before the caller continues (bootstrap).
    pub async fn append_now(&self, entry: NewAuditEntry) -> Result<AuditEntry, StoreError> {
        let _guard = self.write_lock.lock().await;
        self.store
            .append_audit(entry, care_core::new_id(), care_core::now_micros())
            .await
    }

    /// Wait until everything queued before this call has been written.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Message::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }

    /// Drain the queue and stop the writer. Later entries are dropped.
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Message::Shutdown(ack)).await.is_ok() {
            let _ = done.await;
        }
        tracing::info!("audit writer stopped");
    }
}

async fn writer(mut rx: mpsc::Receiver<Message>, store: Store, write_lock: Arc<Mutex<()>>) {
    while let Some(message) = rx.recv().await {
        match message {
            Message::Append(entry) => {
                let _guard = write_lock.lock().await;
                let resource_type = entry.resource_type.clone();
                if let Err(e) = store
                    .append_audit(entry, care_core::new_id(), care_core::now_micros())
                    .await
                {
                    tracing::warn!(error = %e, resource_type = %resource_type, "audit append failed");
                }
            }
            Message::Flush(ack) => {
                let _ = ack.send(());
            }
            Message::Shutdown(ack) => {
                rx.close();
                while let Ok(Message::Append(entry)) = rx.try_recv() {
                    let _guard = write_lock.lock().await;
                    if let Err(e) = store
                        .append_audit(entry, care_core::new_id(), care_core::now_micros())
                        .await
                    {
                        tracing::warn!(error = %e, "audit append failed during shutdown");
                    }
                }
                let _ = ack.send(());
                return;
            }
        }
    }
}
