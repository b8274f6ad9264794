//! Conversation reconciler task
//!
//! ```text
//!  LogSession ──LogEvent──▶ broadcast ──▶ reconciler task
//!                                          │ drain queued events
//!                                          │ collect()
//!                                          │ reconcile()
//!                                          ▼
//!                               StateContainer<SessionState>
//! ```
//!
//! A single task per session consumes mutation events. Events queued while
//! a pass is running collapse into one further pass. Passes requested from
//! outside the task share its pass lock, so passes never overlap and each
//! one publishes a snapshot no older than the one before it.

use std::sync::Arc;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::derive::reconcile;
use super::view::SessionState;
use crate::error::ChatResult;
use crate::identity::Did;
use crate::log::{EntryHash, LogEntry, LogSession};
use crate::state::StateContainer;
use crate::sync::LogEvent;

/// Derives messages from a log and publishes them into a state container.
#[derive(Clone)]
pub struct ConversationReconciler {
    log: Arc<LogSession>,
    state: StateContainer<SessionState>,
    local: Did,
    max_entries: Option<usize>,
    /// Held for the whole of a pass, from collect to publish
    passes: Arc<Mutex<()>>,
    cancel: CancellationToken,
}

impl ConversationReconciler {
    pub fn new(
        log: Arc<LogSession>,
        state: StateContainer<SessionState>,
        local: Did,
        max_entries: Option<usize>,
    ) -> Self {
        Self {
            log,
            state,
            local,
            max_entries,
            passes: Arc::new(Mutex::new(())),
            cancel: CancellationToken::new(),
        }
    }

    /// The container this reconciler publishes into.
    pub fn state(&self) -> &StateContainer<SessionState> {
        &self.state
    }

    /// Run one reconciliation pass immediately.
    ///
    /// Returns whether a new snapshot was published. On failure the previous
    /// messages are kept and the error is recorded in `last_error`. Once the
    /// reconciler is stopped this publishes nothing and returns `Ok(false)`.
    pub async fn reconcile_now(&self) -> ChatResult<bool> {
        self.pass().await
    }

    /// Stop every current and future pass.
    ///
    /// Returns after any pass in flight has finished; no snapshot is
    /// published afterwards.
    pub async fn stop(&self) {
        self.cancel.cancel();
        drop(self.passes.lock().await);
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn pass(&self) -> ChatResult<bool> {
        let _pass = self.passes.lock().await;
        if self.cancel.is_cancelled() {
            return Ok(false);
        }

        let entries = match self.collect().await {
            Ok(entries) => entries,
            Err(e) => {
                if self.cancel.is_cancelled() {
                    return Ok(false);
                }
                warn!(error = %e, "Reconciliation pass failed");
                let message = e.to_string();
                self.state.update(|s| {
                    s.is_loading = false;
                    s.last_error = Some(message);
                });
                return Err(e);
            }
        };

        let messages = reconcile(&entries, &self.local, self.log.supports_removal());
        let address = self.log.handle().map(|h| h.address);

        let current = self.state.get_state();
        let unchanged = !current.is_loading
            && current.last_error.is_none()
            && current.address == address
            && current.messages == messages;
        if unchanged {
            return Ok(false);
        }

        // No snapshot may land after teardown began
        if self.cancel.is_cancelled() {
            return Ok(false);
        }

        debug!(entries = entries.len(), messages = messages.len(), "Publishing conversation");
        self.state.update(move |s| {
            s.entries = entries;
            s.messages = messages;
            s.is_loading = false;
            s.address = address;
            s.last_error = None;
        });
        Ok(true)
    }

    async fn collect(&self) -> ChatResult<Vec<LogEntry>> {
        match self.max_entries {
            Some(limit) => self.log.collect_latest(limit).await,
            None => self.log.collect(None).await,
        }
    }

    /// Remove the entry behind a message.
    ///
    /// # Errors
    ///
    /// `RemovalUnsupported` if the log cannot remove entries.
    pub async fn remove(&self, hash: &EntryHash) -> ChatResult<EntryHash> {
        self.log.remove(hash).await
    }

    /// Start the reconciliation task.
    ///
    /// Subscribes to the log before the initial pass, so no mutation between
    /// the two is missed.
    pub fn spawn(self) -> ReconcilerHandle {
        let events = self.log.subscribe();
        let cancel = self.cancel.clone();
        let task = tokio::spawn(self.run(events));
        ReconcilerHandle {
            cancel,
            task: Some(task),
        }
    }

    async fn run(self, mut events: broadcast::Receiver<LogEvent>) {
        let cancel = self.cancel.clone();
        let _ = self.pass().await;

        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = events.recv() => received,
            };
            match received {
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    debug!(missed, "Reconciler lagged; re-collecting");
                }
                Err(RecvError::Closed) => break,
            }

            let mut closed = false;
            loop {
                match events.try_recv() {
                    Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Closed) => {
                        closed = true;
                        break;
                    }
                }
            }

            if cancel.is_cancelled() {
                break;
            }
            let _ = self.pass().await;
            if closed {
                break;
            }
        }
        debug!("Reconciler stopped");
    }
}

/// Running reconciler task. Dropping it stops the reconciler.
#[derive(Debug)]
pub struct ReconcilerHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ReconcilerHandle {
    /// Stop the task and wait until it has exited. No state update happens
    /// after this returns.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Reconciler task ended abnormally");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map(|t| t.is_finished()).unwrap_or(true)
    }
}

impl Drop for ReconcilerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
