//! Replicated log session
//!
//! A [`LogSession`] owns the lifecycle of exactly one log:
//!
//! ```text
//!  Idle ──open──▶ Opening ──ok──▶ Open ──close──▶ Closed
//!    ▲               │
//!    └────error──────┘
//! ```
//!
//! `open` may be retried after a transport failure, but never called twice
//! successfully on the same session.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::address::{LogKind, WriterSet};
use super::entry::{EntryHash, LogEntry, Operation};
use super::index::LogIndex;
use super::replicator::{self, Replica};
use super::LogHandle;
use crate::config::ReplicationConfig;
use crate::error::{ChatError, ChatResult};
use crate::identity::LocalIdentity;
use crate::storage::Storage;
use crate::sync::{LogEvent, ReplicationMessage, Transport};

struct Running {
    replica: Arc<Replica>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

enum Lifecycle {
    Idle,
    Opening,
    Open(Running),
    Closed,
}

/// Owner of one replicated log instance.
pub struct LogSession {
    identity: Arc<LocalIdentity>,
    transport: Arc<dyn Transport>,
    storage: Option<Storage>,
    config: ReplicationConfig,
    events: broadcast::Sender<LogEvent>,
    lifecycle: Mutex<Lifecycle>,
}

impl LogSession {
    /// Create a session that writes as `identity` and replicates over
    /// `transport`. Nothing happens until [`open`](Self::open).
    pub fn new(
        identity: Arc<LocalIdentity>,
        transport: Arc<dyn Transport>,
        storage: Option<Storage>,
        config: ReplicationConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        Self {
            identity,
            transport,
            storage,
            config,
            events,
            lifecycle: Mutex::new(Lifecycle::Idle),
        }
    }

    /// Open (or create) the log addressed by `(name, kind, writers)`.
    ///
    /// Loads any locally persisted entries, joins the log's topic and starts
    /// replicating.
    ///
    /// # Errors
    ///
    /// - `AlreadyOpen` if this session was opened before
    /// - `TransportUnavailable` if the transport cannot be reached; the
    ///   session stays idle and `open` may be retried
    pub async fn open(
        &self,
        name: &str,
        writers: WriterSet,
        kind: LogKind,
        meta: serde_json::Value,
    ) -> ChatResult<LogHandle> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if !matches!(*lifecycle, Lifecycle::Idle) {
                return Err(ChatError::AlreadyOpen);
            }
            *lifecycle = Lifecycle::Opening;
        }

        let handle = LogHandle::new(name, kind, writers, meta);
        let running = match self.start(handle.clone()).await {
            Ok(running) => running,
            Err(e) => {
                warn!(address = %handle.address, error = %e, "Failed to open log");
                *self.lifecycle.lock() = Lifecycle::Idle;
                return Err(e);
            }
        };

        let mut lifecycle = self.lifecycle.lock();
        if !matches!(*lifecycle, Lifecycle::Opening) {
            // Closed while opening
            running.cancel.cancel();
            return Err(ChatError::NotOpen);
        }
        *lifecycle = Lifecycle::Open(running);
        info!(address = %handle.address, name = %handle.name, kind = %handle.kind, "Log opened");
        Ok(handle)
    }

    async fn start(&self, handle: LogHandle) -> ChatResult<Running> {
        let mut index = LogIndex::new(handle.address, handle.kind, handle.writers.clone());

        if let Some(storage) = &self.storage {
            let stored = storage.load_entries(&handle.address)?;
            let count = stored.len();
            for entry in stored {
                let hash = entry.hash;
                if let Err(e) = index.insert(entry) {
                    warn!(hash = %hash.short(), error = %e, "Skipping invalid stored entry");
                }
            }
            debug!(address = %handle.address, entries = count, "Loaded stored entries");
            storage.save_manifest(&handle)?;
        }

        let link = self.transport.join(handle.address).await?;

        let replica = Arc::new(Replica::new(
            handle,
            index,
            self.storage.clone(),
            self.events.clone(),
            link.outbound,
            self.config.entry_batch_size,
        ));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(replicator::run(
            replica.clone(),
            link.inbound,
            self.config.announce_interval,
            cancel.clone(),
        ));

        Ok(Running {
            replica,
            cancel,
            task,
        })
    }

    fn replica(&self) -> ChatResult<Arc<Replica>> {
        match &*self.lifecycle.lock() {
            Lifecycle::Open(running) => Ok(running.replica.clone()),
            _ => Err(ChatError::NotOpen),
        }
    }

    /// Append a JSON payload authored by the local identity.
    ///
    /// # Errors
    ///
    /// - `NotOpen` before `open` succeeded or after `close`
    /// - `WriteRejected` if the local identity is not a writer of this log
    pub async fn append(&self, payload: &serde_json::Value) -> ChatResult<EntryHash> {
        let value = serde_json::to_string(payload)?;
        self.append_operation(Operation::Add { value }).await
    }

    async fn append_operation(&self, payload: Operation) -> ChatResult<EntryHash> {
        let replica = self.replica()?;
        let address = replica.handle.address;

        if !replica.handle.writers.contains(self.identity.did()) {
            return Err(ChatError::WriteRejected(format!(
                "{} is not a writer of {}",
                self.identity.did(),
                address
            )));
        }

        let entry = {
            let mut index = replica.index.write();
            let entry = LogEntry::create(
                &self.identity,
                address,
                index.next_clock(),
                index.heads(),
                payload,
            )?;
            index.insert(entry.clone())?;
            entry
        };
        let hash = entry.hash;
        debug!(%address, hash = %hash.short(), clock = entry.clock, "Appended entry");

        replica.persist(std::slice::from_ref(&entry));
        replica.emit(LogEvent::Write { hash });
        replica
            .publish(ReplicationMessage::Entries {
                address,
                entries: vec![entry],
            })
            .await;

        Ok(hash)
    }

    /// Visible entries in linear order (oldest first).
    ///
    /// With `since`, only entries after that entry. Reads a consistent
    /// snapshot; concurrent replication never exposes a partial entry.
    pub async fn collect(&self, since: Option<&EntryHash>) -> ChatResult<Vec<LogEntry>> {
        let replica = self.replica()?;
        let index = replica.index.read();
        match since {
            Some(hash) => index.visible_since(hash),
            None => Ok(index.visible()),
        }
    }

    /// The newest `limit` visible entries, oldest first.
    pub async fn collect_latest(&self, limit: usize) -> ChatResult<Vec<LogEntry>> {
        let replica = self.replica()?;
        let entries = replica.index.read().visible_latest(limit);
        Ok(entries)
    }

    /// Receive every future mutation event.
    ///
    /// Available before `open`, so a consumer can subscribe first and not
    /// miss the initial replication burst.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.events.subscribe()
    }

    /// Run `callback` for every mutation until the returned listener is
    /// dropped. Must be called inside a tokio runtime.
    pub fn on_mutation<F>(&self, callback: F) -> MutationListener
    where
        F: Fn(&LogEvent) + Send + 'static,
    {
        let mut events = self.events.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => callback(&event),
                    Err(RecvError::Lagged(missed)) => callback(&LogEvent::Lagged { missed }),
                    Err(RecvError::Closed) => break,
                }
            }
        });
        MutationListener { task }
    }

    /// Whether this log can remove entries. `false` while not open.
    pub fn supports_removal(&self) -> bool {
        self.replica()
            .map(|replica| replica.handle.kind.supports_removal())
            .unwrap_or(false)
    }

    /// Hide an entry by appending a tombstone.
    ///
    /// # Errors
    ///
    /// - `RemovalUnsupported` for event logs
    /// - `EntryNotFound` if the entry is not known locally
    pub async fn remove(&self, hash: &EntryHash) -> ChatResult<EntryHash> {
        let replica = self.replica()?;
        let kind = replica.handle.kind;
        if !kind.supports_removal() {
            return Err(ChatError::RemovalUnsupported(kind));
        }
        if !replica.index.read().contains(hash) {
            return Err(ChatError::EntryNotFound(hash.to_hex()));
        }
        self.append_operation(Operation::Del { target: *hash }).await
    }

    /// The handle of the open log.
    pub fn handle(&self) -> Option<LogHandle> {
        self.replica().ok().map(|replica| replica.handle.clone())
    }

    /// Current heads of the local replica.
    pub fn heads(&self) -> ChatResult<Vec<EntryHash>> {
        let replica = self.replica()?;
        let heads = replica.index.read().heads();
        Ok(heads)
    }

    /// Whether the session is open.
    pub fn is_open(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Open(_))
    }

    /// Stop replicating and release the transport link. Further operations
    /// fail with `NotOpen`.
    pub async fn close(&self) {
        let previous = std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Closed);
        let Lifecycle::Open(running) = previous else {
            return;
        };

        running.cancel.cancel();
        if let Err(e) = running.task.await {
            warn!(error = %e, "Replicator task ended abnormally");
        }
        info!(address = %running.replica.handle.address, "Log closed");
    }
}

impl Drop for LogSession {
    fn drop(&mut self) {
        if let Lifecycle::Open(running) = &*self.lifecycle.lock() {
            running.cancel.cancel();
        }
    }
}

/// Callback registration returned by [`LogSession::on_mutation`].
///
/// Dropping it stops the callback.
#[derive(Debug)]
pub struct MutationListener {
    task: JoinHandle<()>,
}

impl MutationListener {
    /// Stop delivering events.
    pub fn cancel(self) {
        // Drop does the work
    }
}

impl Drop for MutationListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}
