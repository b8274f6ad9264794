//! Replication driver for one open log
//!
//! A single task per open log owns the inbound side of the transport link.
//! It announces heads on a timer and reacts to peer messages; local appends
//! push their entry directly through [`Replica::publish`].
//!
//! Heads alone cannot reveal a lost entry in the middle of the DAG once a
//! later entry has arrived. The index tracks parents it has seen referenced
//! but never received, and every tick requests a sync until none remain.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::entry::{EntryHash, LogEntry};
use super::index::{InsertOutcome, LogIndex};
use super::LogHandle;
use crate::storage::Storage;
use crate::sync::{LogEvent, ReplicationMessage, WireMessage};

/// State shared between a log session and its replicator task.
pub(crate) struct Replica {
    pub(crate) handle: LogHandle,
    pub(crate) index: RwLock<LogIndex>,
    storage: Option<Storage>,
    events: broadcast::Sender<LogEvent>,
    outbound: mpsc::Sender<Vec<u8>>,
    batch_size: usize,
}

impl Replica {
    pub(crate) fn new(
        handle: LogHandle,
        index: LogIndex,
        storage: Option<Storage>,
        events: broadcast::Sender<LogEvent>,
        outbound: mpsc::Sender<Vec<u8>>,
        batch_size: usize,
    ) -> Self {
        Self {
            handle,
            index: RwLock::new(index),
            storage,
            events,
            outbound,
            batch_size,
        }
    }

    /// Write entries to storage, if any. Failures are logged; the in-memory
    /// replica stays authoritative for this run.
    pub(crate) fn persist(&self, entries: &[LogEntry]) {
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.save_entries(entries) {
                warn!(address = %self.handle.address, error = %e, "Failed to persist entries");
            }
        }
    }

    /// Notify listeners. Having no listeners is fine.
    pub(crate) fn emit(&self, event: LogEvent) {
        let _ = self.events.send(event);
    }

    /// Broadcast a message to the other replicas.
    pub(crate) async fn publish(&self, msg: ReplicationMessage) {
        let kind = msg.kind();
        let frame = match WireMessage::new(msg).encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(address = %self.handle.address, error = %e, "Failed to encode {}", kind);
                return;
            }
        };
        trace!(address = %self.handle.address, kind, len = frame.len(), "Publishing");
        if self.outbound.send(frame).await.is_err() {
            debug!(address = %self.handle.address, "Transport link closed, {} not sent", kind);
        }
    }

    async fn announce(&self, reply: bool) {
        let heads = self.index.read().heads();
        self.publish(ReplicationMessage::Heads {
            address: self.handle.address,
            heads,
            reply,
        })
        .await;
    }

    /// Verify and merge remote entries, returning the ones that were new.
    fn ingest(&self, entries: Vec<LogEntry>) -> Vec<LogEntry> {
        let mut index = self.index.write();
        let mut inserted = Vec::new();

        for entry in entries {
            if index.contains(&entry.hash) {
                continue;
            }
            let hash = entry.hash;
            match index.insert(entry.clone()) {
                Ok(InsertOutcome::Inserted) => inserted.push(entry),
                Ok(InsertOutcome::Duplicate) => {}
                Err(e) => {
                    warn!(
                        address = %self.handle.address,
                        hash = %hash.short(),
                        error = %e,
                        "Dropping invalid remote entry"
                    );
                }
            }
        }
        inserted
    }

    async fn handle_frame(&self, frame: &[u8]) {
        let msg = match WireMessage::decode(frame) {
            Ok(wire) => wire.into_inner(),
            Err(e) => {
                debug!(error = %e, len = frame.len(), "Ignoring undecodable frame");
                return;
            }
        };
        if msg.address() != &self.handle.address {
            trace!("Ignoring message for another log");
            return;
        }
        trace!(address = %self.handle.address, kind = msg.kind(), "Received");

        match msg {
            ReplicationMessage::Heads { heads, reply, .. } => {
                self.on_heads(heads, reply).await;
            }
            ReplicationMessage::SyncRequest { .. } => {
                self.on_sync_request().await;
            }
            ReplicationMessage::Entries { entries, .. } => {
                self.on_entries(entries);
            }
        }
    }

    /// Ask the peer for its log while a referenced parent is still missing.
    async fn request_missing(&self) {
        let missing = self.index.read().missing().len();
        if missing == 0 {
            return;
        }
        debug!(
            address = %self.handle.address,
            missing,
            "Log has gaps, requesting sync"
        );
        self.publish(ReplicationMessage::SyncRequest {
            address: self.handle.address,
        })
        .await;
    }

    /// Periodic anti-entropy: announce heads and chase any gaps.
    async fn tick(&self) {
        self.announce(false).await;
        self.request_missing().await;
    }

    async fn on_heads(&self, mut theirs: Vec<EntryHash>, reply: bool) {
        theirs.sort();
        let (unknown, missing, ours) = {
            let index = self.index.read();
            (index.unknown(&theirs), index.missing().len(), index.heads())
        };

        if !unknown.is_empty() || missing > 0 {
            debug!(
                address = %self.handle.address,
                unknown = unknown.len(),
                missing,
                "Peer has entries we lack, requesting sync"
            );
            self.publish(ReplicationMessage::SyncRequest {
                address: self.handle.address,
            })
            .await;
        }

        if !reply && theirs != ours {
            self.announce(true).await;
        }
    }

    async fn on_sync_request(&self) {
        let entries: Vec<LogEntry> = self.index.read().ordered().into_iter().cloned().collect();
        if entries.is_empty() {
            return;
        }
        debug!(
            address = %self.handle.address,
            entries = entries.len(),
            "Answering sync request"
        );
        for batch in entries.chunks(self.batch_size) {
            self.publish(ReplicationMessage::Entries {
                address: self.handle.address,
                entries: batch.to_vec(),
            })
            .await;
        }
    }

    fn on_entries(&self, entries: Vec<LogEntry>) {
        let inserted = self.ingest(entries);
        if inserted.is_empty() {
            return;
        }
        self.persist(&inserted);
        debug!(
            address = %self.handle.address,
            entries = inserted.len(),
            "Merged remote entries"
        );
        self.emit(LogEvent::Replicated {
            hashes: inserted.iter().map(|e| e.hash).collect(),
        });
    }
}

/// Drive replication until cancelled or the transport closes.
pub(crate) async fn run(
    replica: Arc<Replica>,
    mut inbound: mpsc::Receiver<Vec<u8>>,
    announce_every: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(announce_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            // First tick fires immediately: announce on join
            _ = ticker.tick() => replica.tick().await,
            frame = inbound.recv() => match frame {
                Some(frame) => replica.handle_frame(&frame).await,
                None => {
                    warn!(address = %replica.handle.address, "Transport link closed");
                    break;
                }
            },
        }
    }
    debug!(address = %replica.handle.address, "Replicator stopped");
}
