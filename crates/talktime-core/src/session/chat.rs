//! One configured conversation between the local identity and a peer

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::chat::{ChatView, ConversationReconciler, Message, OutgoingMessage, ReconcilerHandle, SessionState};
use crate::config::EngineConfig;
use crate::error::{ChatError, ChatResult};
use crate::identity::{Did, LocalIdentity};
use crate::log::{EntryHash, LogAddress, LogSession, WriterSet};
use crate::state::{StateContainer, Subscription};
use crate::storage::Storage;
use crate::sync::Transport;

/// A live conversation: its log, its reconciler task and its state.
///
/// Created by [`SessionCoordinator::configure`](super::SessionCoordinator::configure).
pub struct ChatSession {
    local: Arc<LocalIdentity>,
    peer: Did,
    address: LogAddress,
    log: Arc<LogSession>,
    reconciler: ConversationReconciler,
    state: StateContainer<SessionState>,
    task: Mutex<Option<ReconcilerHandle>>,
    closed: AtomicBool,
}

impl ChatSession {
    /// Open the conversation log for `(local, peer)` and start reconciling.
    pub(crate) async fn open(
        local: Arc<LocalIdentity>,
        peer: Did,
        config: &EngineConfig,
        transport: Arc<dyn Transport>,
        storage: Option<Storage>,
    ) -> ChatResult<Self> {
        let writers = WriterSet::new(local.did().clone(), peer.clone())?;
        let log = Arc::new(LogSession::new(
            local.clone(),
            transport,
            storage,
            config.replication(),
        ));
        let state = StateContainer::new(SessionState::default());
        let reconciler = ConversationReconciler::new(
            log.clone(),
            state.clone(),
            local.did().clone(),
            config.max_entries,
        );

        let handle = log
            .open(&config.store_name, writers, config.log_kind, config.meta.clone())
            .await?;
        let task = reconciler.clone().spawn();

        info!(local = %local.did().short(), peer = %peer.short(), address = %handle.address, "Chat session configured");
        Ok(Self {
            local,
            peer,
            address: handle.address,
            log,
            reconciler,
            state,
            task: Mutex::new(Some(task)),
            closed: AtomicBool::new(false),
        })
    }

    /// Append a chat message authored by the local identity.
    ///
    /// # Errors
    ///
    /// - `NotConfigured` once the session is closed
    /// - `WriteRejected` if the log refuses the write
    pub async fn send(&self, text: &str) -> ChatResult<EntryHash> {
        if self.is_closed() {
            return Err(ChatError::NotConfigured);
        }
        let payload = OutgoingMessage::now(text).to_value();
        match self.log.append(&payload).await {
            Err(ChatError::NotOpen) => Err(ChatError::NotConfigured),
            other => other,
        }
    }

    /// Remove a message.
    ///
    /// # Errors
    ///
    /// - `RemovalUnsupported` when the log has no removal primitive
    /// - `EntryNotFound` for an unknown message id
    pub async fn remove(&self, id: &EntryHash) -> ChatResult<EntryHash> {
        if self.is_closed() {
            return Err(ChatError::NotConfigured);
        }
        self.reconciler.remove(id).await
    }

    /// Whether messages of this session can be removed.
    pub fn supports_removal(&self) -> bool {
        self.log.supports_removal()
    }

    /// Messages and loading flag for the display layer.
    pub fn view(&self) -> ChatView {
        self.state.get_state().view()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state.get_state().messages.clone()
    }

    /// Full session state snapshot.
    pub fn state(&self) -> Arc<SessionState> {
        self.state.get_state()
    }

    /// Be notified with every new state snapshot.
    #[must_use = "dropping the subscription unsubscribes the callback"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription<SessionState>
    where
        F: Fn(&SessionState) + Send + Sync + 'static,
    {
        self.state.subscribe(callback)
    }

    /// Force a reconciliation pass outside the event stream.
    ///
    /// Serialized with the reconciler task's own passes.
    ///
    /// # Errors
    ///
    /// `NotConfigured` once the session is closed.
    pub async fn refresh(&self) -> ChatResult<bool> {
        if self.is_closed() {
            return Err(ChatError::NotConfigured);
        }
        self.reconciler.reconcile_now().await
    }

    pub fn address(&self) -> LogAddress {
        self.address
    }

    pub fn local(&self) -> &Did {
        self.local.did()
    }

    pub fn peer(&self) -> &Did {
        &self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Tear the session down.
    ///
    /// The reconciler is stopped (and awaited) before subscribers are
    /// dropped and the log is closed, so no callback fires afterwards.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.shutdown().await;
        }
        // Waits out a refresh that started before the close
        self.reconciler.stop().await;
        self.state.clear_subscribers();
        self.log.close().await;
        debug!(address = %self.address, "Chat session closed");
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("local", &self.local.did().short())
            .field("peer", &self.peer.short())
            .field("address", &self.address)
            .field("closed", &self.is_closed())
            .finish()
    }
}
