//! Engine configuration
//!
//! Loaded from a JSON file; any field missing from the file falls back to
//! its default.
//!
//! ```json
//! {
//!   "store_name": "talktime",
//!   "log_kind": "feed",
//!   "max_entries": 500,
//!   "gossip": { "bootstrap": ["<endpoint id>"] }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ChatResult;
use crate::log::LogKind;

/// Top-level configuration for a [`SessionCoordinator`](crate::SessionCoordinator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Canonical name of every conversation log
    pub store_name: String,
    /// Kind of log backing conversations
    pub log_kind: LogKind,
    /// Free-form metadata stored with the log manifest
    pub meta: serde_json::Value,
    /// Only reconcile the newest N entries; `None` is unlimited
    pub max_entries: Option<usize>,
    /// Capacity of the log mutation broadcast channel
    pub event_capacity: usize,
    /// Interval between head announcements
    pub announce_interval_ms: u64,
    /// Entries per replication message
    pub entry_batch_size: usize,
    /// Where the database lives; `None` keeps everything in memory
    pub data_dir: Option<PathBuf>,
    /// Gossip transport settings
    pub gossip: GossipConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_name: "talktime".to_string(),
            log_kind: LogKind::Feed,
            meta: serde_json::json!({ "name": "TalkTime" }),
            max_entries: None,
            event_capacity: 256,
            announce_interval_ms: 5_000,
            entry_batch_size: 64,
            data_dir: None,
            gossip: GossipConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Read a config file.
    pub fn load(path: impl AsRef<Path>) -> ChatResult<Self> {
        let data = std::fs::read(path.as_ref())?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Write this config as pretty JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> ChatResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Platform data directory, e.g. `~/.local/share/talktime` on Linux.
    pub fn default_data_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("talktime"))
    }

    /// Database file inside `data_dir`, if one is configured.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join("talktime.redb"))
    }

    /// Settings handed to each log session.
    pub fn replication(&self) -> ReplicationConfig {
        ReplicationConfig {
            event_capacity: self.event_capacity.max(1),
            announce_interval: Duration::from_millis(self.announce_interval_ms.max(1)),
            entry_batch_size: self.entry_batch_size.max(1),
        }
    }
}

/// Gossip transport settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipConfig {
    /// Largest gossip message accepted
    pub max_message_size: usize,
    /// Endpoint ids to bootstrap every topic from
    pub bootstrap: Vec<String>,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            max_message_size: 1024 * 1024,
            bootstrap: Vec::new(),
        }
    }
}

/// Per-log replication tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationConfig {
    /// Capacity of the mutation event channel
    pub event_capacity: usize,
    /// Interval between head announcements
    pub announce_interval: Duration,
    /// Entries per `Entries` message
    pub entry_batch_size: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        EngineConfig::default().replication()
    }
}
