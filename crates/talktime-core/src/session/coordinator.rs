//! Session coordinator
//!
//! Keeps at most one [`ChatSession`] per `(local, peer)` pair. Configuring a
//! pair that already has a live session returns that session; concurrent
//! `configure` calls for the same pair are serialized so only one log is
//! ever opened.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::chat::ChatSession;
use crate::config::EngineConfig;
use crate::error::{ChatError, ChatResult};
use crate::identity::{Did, LocalIdentity};
use crate::log::EntryHash;
use crate::storage::Storage;
use crate::sync::Transport;

/// `(local, peer)`
type PairKey = (Did, Did);

/// Wires identities, logs and reconcilers into chat sessions.
///
/// # Example
///
/// ```ignore
/// use talktime_core::{derive_identity, EngineConfig, MemoryNetwork, SessionCoordinator};
///
/// let network = MemoryNetwork::new();
/// let coordinator = SessionCoordinator::new(EngineConfig::default(), Arc::new(network.transport()));
///
/// let me = Arc::new(derive_identity(secret)?);
/// let chat = coordinator.configure(me.clone(), &peer_did).await?;
/// chat.send("hi").await?;
///
/// coordinator.sign_out(me.did()).await;
/// ```
pub struct SessionCoordinator {
    config: EngineConfig,
    transport: Arc<dyn Transport>,
    storage: Option<Storage>,
    sessions: Mutex<HashMap<PairKey, Arc<ChatSession>>>,
    /// Serializes configure/teardown per pair
    pair_locks: Mutex<HashMap<PairKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionCoordinator {
    /// Coordinator without persistence.
    pub fn new(config: EngineConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            storage: None,
            sessions: Mutex::new(HashMap::new()),
            pair_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Persist every log in `storage`.
    pub fn with_storage(mut self, storage: Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Coordinator backed by the database in `config.data_dir`, if set.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the database cannot be opened.
    pub fn from_config(config: EngineConfig, transport: Arc<dyn Transport>) -> ChatResult<Self> {
        let storage = config.database_path().map(Storage::new).transpose()?;
        let coordinator = Self::new(config, transport);
        Ok(match storage {
            Some(storage) => coordinator.with_storage(storage),
            None => coordinator,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn pair_lock(&self, key: &PairKey) -> Arc<tokio::sync::Mutex<()>> {
        self.pair_locks.lock().entry(key.clone()).or_default().clone()
    }

    /// Forget a pair's lock once nobody but the map and `lock` hold it.
    ///
    /// Clones are only handed out under the map lock, so a waiter that
    /// already cloned it keeps the entry alive.
    fn release_pair_lock(&self, key: &PairKey, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.pair_locks.lock();
        if Arc::strong_count(&lock) == 2 {
            locks.remove(key);
        }
    }

    /// Open a conversation between `local` and `peer`.
    ///
    /// A no-op returning the existing session if this pair is already
    /// configured.
    ///
    /// # Errors
    ///
    /// - `InvalidWriterSet` if `peer` is the local identity
    /// - `TransportUnavailable` if the log could not be opened; retryable
    pub async fn configure(&self, local: Arc<LocalIdentity>, peer: &Did) -> ChatResult<Arc<ChatSession>> {
        let key = (local.did().clone(), peer.clone());
        let lock = self.pair_lock(&key);
        let _guard = lock.lock().await;

        if let Some(existing) = self.sessions.lock().get(&key) {
            debug!(peer = %peer.short(), "Session already configured");
            return Ok(existing.clone());
        }

        let session = Arc::new(
            ChatSession::open(
                local,
                peer.clone(),
                &self.config,
                self.transport.clone(),
                self.storage.clone(),
            )
            .await?,
        );
        self.sessions.lock().insert(key, session.clone());
        Ok(session)
    }

    /// The live session for a pair.
    pub fn session(&self, local: &Did, peer: &Did) -> Option<Arc<ChatSession>> {
        self.sessions.lock().get(&(local.clone(), peer.clone())).cloned()
    }

    /// Send `text` in the conversation between `local` and `peer`.
    ///
    /// # Errors
    ///
    /// `NotConfigured` if no session exists for the pair.
    pub async fn send(&self, local: &Did, peer: &Did, text: &str) -> ChatResult<EntryHash> {
        let session = self.session(local, peer).ok_or(ChatError::NotConfigured)?;
        session.send(text).await
    }

    /// Close and forget the session for a pair. Returns whether one existed.
    pub async fn teardown(&self, local: &Did, peer: &Did) -> bool {
        let key = (local.clone(), peer.clone());
        let lock = self.pair_lock(&key);
        let guard = lock.lock().await;

        let removed = self.sessions.lock().remove(&key);
        if let Some(session) = &removed {
            session.close().await;
            debug!(peer = %peer.short(), "Session torn down");
        }
        drop(guard);
        self.release_pair_lock(&key, lock);
        removed.is_some()
    }

    /// Tear down every session of `local`. Returns how many were closed.
    pub async fn sign_out(&self, local: &Did) -> usize {
        let peers: Vec<Did> = self
            .sessions
            .lock()
            .keys()
            .filter(|(owner, _)| owner == local)
            .map(|(_, peer)| peer.clone())
            .collect();

        let mut closed = 0;
        for peer in &peers {
            if self.teardown(local, peer).await {
                closed += 1;
            }
        }
        info!(local = %local.short(), sessions = closed, "Signed out");
        closed
    }

    /// All live sessions.
    pub fn active_sessions(&self) -> Vec<Arc<ChatSession>> {
        self.sessions.lock().values().cloned().collect()
    }

    /// Tear down every session.
    pub async fn shutdown(&self) {
        let keys: Vec<PairKey> = self.sessions.lock().keys().cloned().collect();
        for (local, peer) in &keys {
            self.teardown(local, peer).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::MemoryNetwork;

    fn coordinator(network: &MemoryNetwork) -> SessionCoordinator {
        let config = EngineConfig {
            announce_interval_ms: 50,
            ..EngineConfig::default()
        };
        SessionCoordinator::new(config, Arc::new(network.transport()))
    }

    #[tokio::test]
    async fn test_configure_twice_is_noop() {
        let network = MemoryNetwork::new();
        let c = coordinator(&network);
        let me = Arc::new(LocalIdentity::generate());
        let peer = LocalIdentity::generate().did().clone();

        let first = c.configure(me.clone(), &peer).await.unwrap();
        let second = c.configure(me.clone(), &peer).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(c.active_sessions().len(), 1);
        assert_eq!(network.member_count(&first.address()), 1);
    }

    #[tokio::test]
    async fn test_concurrent_configure_opens_one_log() {
        let network = MemoryNetwork::new();
        let c = Arc::new(coordinator(&network));
        let me = Arc::new(LocalIdentity::generate());
        let peer = LocalIdentity::generate().did().clone();

        let (a, b) = tokio::join!(c.configure(me.clone(), &peer), c.configure(me.clone(), &peer));
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(c.active_sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_send_without_session() {
        let network = MemoryNetwork::new();
        let c = coordinator(&network);
        let me = LocalIdentity::generate();
        let peer = LocalIdentity::generate();

        let result = c.send(me.did(), peer.did(), "hello?").await;
        assert!(matches!(result, Err(ChatError::NotConfigured)));
    }

    #[tokio::test]
    async fn test_sign_out_closes_only_own_sessions() {
        let network = MemoryNetwork::new();
        let c = coordinator(&network);
        let me = Arc::new(LocalIdentity::generate());
        let other = Arc::new(LocalIdentity::generate());
        let p1 = LocalIdentity::generate().did().clone();
        let p2 = LocalIdentity::generate().did().clone();

        let s1 = c.configure(me.clone(), &p1).await.unwrap();
        c.configure(me.clone(), &p2).await.unwrap();
        c.configure(other.clone(), &p1).await.unwrap();

        assert_eq!(c.sign_out(me.did()).await, 2);
        assert!(s1.is_closed());
        assert_eq!(c.active_sessions().len(), 1);
        assert!(c.session(me.did(), &p1).is_none());
        assert!(c.session(other.did(), &p1).is_some());
    }

    #[tokio::test]
    async fn test_configure_after_teardown_opens_fresh_session() {
        let network = MemoryNetwork::new();
        let c = coordinator(&network);
        let me = Arc::new(LocalIdentity::generate());
        let peer = LocalIdentity::generate().did().clone();

        let first = c.configure(me.clone(), &peer).await.unwrap();
        assert!(c.teardown(me.did(), &peer).await);
        assert!(!c.teardown(me.did(), &peer).await);

        let second = c.configure(me.clone(), &peer).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!second.is_closed());
    }

    #[tokio::test]
    async fn test_pair_locks_pruned_after_teardown() {
        let network = MemoryNetwork::new();
        let c = coordinator(&network);
        let me = Arc::new(LocalIdentity::generate());
        let p1 = LocalIdentity::generate().did().clone();
        let p2 = LocalIdentity::generate().did().clone();

        c.configure(me.clone(), &p1).await.unwrap();
        c.configure(me.clone(), &p2).await.unwrap();
        assert_eq!(c.pair_locks.lock().len(), 2);

        assert!(c.teardown(me.did(), &p1).await);
        assert_eq!(c.pair_locks.lock().len(), 1);

        assert_eq!(c.sign_out(me.did()).await, 1);
        assert!(c.pair_locks.lock().is_empty());

        // Tearing down an unknown pair leaves nothing behind either
        assert!(!c.teardown(me.did(), &p1).await);
        assert!(c.pair_locks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_from_config_without_data_dir() {
        let network = MemoryNetwork::new();
        let c = SessionCoordinator::from_config(EngineConfig::default(), Arc::new(network.transport())).unwrap();
        assert!(c.storage.is_none());
    }
}
