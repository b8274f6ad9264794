//! Persistent storage using redb.
//!
//! Keeps the local replica of each conversation log so history survives a
//! restart even when the peer is offline:
//! - Log entries, keyed by `<address>/<entry hash>`
//! - Log manifests (name, kind, writers, meta), keyed by address

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};

use crate::error::{ChatError, ChatResult};
use crate::log::{LogAddress, LogEntry, LogHandle};

const LOG_ENTRIES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("log_entries");
const LOG_MANIFESTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("log_manifests");

/// Storage layer using redb for ACID-compliant persistence
#[derive(Clone)]
pub struct Storage {
    db: Arc<RwLock<Database>>,
}

fn entry_key(address: &LogAddress, entry: &LogEntry) -> String {
    format!("{}/{}", address.to_base58(), entry.hash.to_hex())
}

/// Key range covering every entry of `address`. `'0'` sorts right after `'/'`.
fn entry_range(address: &LogAddress) -> (String, String) {
    let prefix = address.to_base58();
    (format!("{}/", prefix), format!("{}0", prefix))
}

impl Storage {
    /// Create a new storage instance at the given path.
    ///
    /// Creates the parent directory and all tables if missing.
    pub fn new(path: impl AsRef<Path>) -> ChatResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(LOG_ENTRIES_TABLE)?;
            let _ = write_txn.open_table(LOG_MANIFESTS_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Manifest Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Save the manifest of an opened log, overwriting any previous one.
    pub fn save_manifest(&self, handle: &LogHandle) -> ChatResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(LOG_MANIFESTS_TABLE)?;
            let data = serde_json::to_vec(handle)?;
            let key = handle.address.to_base58();
            table.insert(key.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load a log manifest by address.
    pub fn load_manifest(&self, address: &LogAddress) -> ChatResult<Option<LogHandle>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(LOG_MANIFESTS_TABLE)?;
        let key = address.to_base58();

        match table.get(key.as_str())? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    /// Every stored manifest.
    pub fn list_manifests(&self) -> ChatResult<Vec<LogHandle>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(LOG_MANIFESTS_TABLE)?;

        let mut manifests = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            manifests.push(serde_json::from_slice(value.value())?);
        }
        Ok(manifests)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Entry Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Persist entries in a single transaction. Existing keys are overwritten
    /// with identical bytes, so saving twice is harmless.
    pub fn save_entries(&self, entries: &[LogEntry]) -> ChatResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(LOG_ENTRIES_TABLE)?;
            for entry in entries {
                let key = entry_key(&entry.address, entry);
                let data = entry.encode()?;
                table.insert(key.as_str(), data.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load every stored entry of a log, in key order.
    pub fn load_entries(&self, address: &LogAddress) -> ChatResult<Vec<LogEntry>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(LOG_ENTRIES_TABLE)?;
        let (start, end) = entry_range(address);

        let mut entries = Vec::new();
        for item in table.range(start.as_str()..end.as_str())? {
            let (key, value) = item?;
            let entry = LogEntry::decode(value.value()).map_err(|e| {
                ChatError::Storage(format!("corrupt entry {}: {}", key.value(), e))
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Delete a log's manifest and entries.
    pub fn delete_log(&self, address: &LogAddress) -> ChatResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut manifests = write_txn.open_table(LOG_MANIFESTS_TABLE)?;
            manifests.remove(address.to_base58().as_str())?;

            let mut entries = write_txn.open_table(LOG_ENTRIES_TABLE)?;
            let (start, end) = entry_range(address);
            let keys: Vec<String> = entries
                .range(start.as_str()..end.as_str())?
                .map(|item| item.map(|(k, _)| k.value().to_string()))
                .collect::<Result<_, _>>()?;
            for key in keys {
                entries.remove(key.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }
}
