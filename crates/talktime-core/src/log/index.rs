//! In-memory index of a replicated log
//!
//! Entries form a DAG through their `next` links. Two writers appending
//! concurrently produce two heads; the next append by either writer links
//! both and the DAG converges again.
//!
//! ```text
//!        ┌── a2 (alice) ──┐
//!  a1 ───┤                ├──▶ a3 (next = [a2, b1])
//!        └── b1 (bob) ────┘
//! ```
//!
//! Linear order is `(clock, author, hash)`. Every replica holding the same
//! set of entries computes the same order, regardless of arrival order.

use std::collections::{BTreeSet, HashMap, HashSet};

use super::address::{LogAddress, LogKind, WriterSet};
use super::entry::{EntryHash, LogEntry, Operation};
use crate::error::{ChatError, ChatResult};

/// Result of inserting an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// New entry, now part of the log
    Inserted,
    /// Already known; nothing changed
    Duplicate,
}

/// Index of every entry known locally for one log.
#[derive(Debug, Clone)]
pub struct LogIndex {
    address: LogAddress,
    kind: LogKind,
    writers: WriterSet,
    entries: HashMap<EntryHash, LogEntry>,
    /// Hashes some known entry points at
    referenced: HashSet<EntryHash>,
    /// Entries nobody points at yet
    heads: BTreeSet<EntryHash>,
    /// Targets of tombstones
    removed: HashSet<EntryHash>,
    /// Parents some known entry points at that have not arrived
    missing: HashSet<EntryHash>,
    max_clock: u64,
}

impl LogIndex {
    /// Create an empty index.
    pub fn new(address: LogAddress, kind: LogKind, writers: WriterSet) -> Self {
        Self {
            address,
            kind,
            writers,
            entries: HashMap::new(),
            referenced: HashSet::new(),
            heads: BTreeSet::new(),
            removed: HashSet::new(),
            missing: HashSet::new(),
            max_clock: 0,
        }
    }

    /// Address of the indexed log
    pub fn address(&self) -> &LogAddress {
        &self.address
    }

    /// Kind of the indexed log
    pub fn kind(&self) -> LogKind {
        self.kind
    }

    /// Writers of the indexed log
    pub fn writers(&self) -> &WriterSet {
        &self.writers
    }

    /// Number of entries, tombstones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no entries are known
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether an entry is known locally
    pub fn contains(&self, hash: &EntryHash) -> bool {
        self.entries.contains_key(hash)
    }

    /// Look up an entry
    pub fn get(&self, hash: &EntryHash) -> Option<&LogEntry> {
        self.entries.get(hash)
    }

    /// Current heads, sorted
    pub fn heads(&self) -> Vec<EntryHash> {
        self.heads.iter().copied().collect()
    }

    /// Clock for the next local append.
    ///
    /// Saturates at `u64::MAX`, which `validate` refuses, so an exhausted
    /// clock surfaces as `WriteRejected` rather than wrapping.
    pub fn next_clock(&self) -> u64 {
        self.max_clock.saturating_add(1)
    }

    /// Parents referenced by known entries but not yet received, sorted.
    pub fn missing(&self) -> Vec<EntryHash> {
        let mut missing: Vec<EntryHash> = self.missing.iter().copied().collect();
        missing.sort();
        missing
    }

    /// True if every referenced parent is known locally
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Of the given hashes, those not known locally.
    pub fn unknown(&self, hashes: &[EntryHash]) -> Vec<EntryHash> {
        hashes
            .iter()
            .filter(|h| !self.entries.contains_key(h))
            .copied()
            .collect()
    }

    /// Check an entry may join this log.
    pub fn validate(&self, entry: &LogEntry) -> ChatResult<()> {
        if entry.address != self.address {
            return Err(ChatError::WriteRejected(format!(
                "entry {} belongs to {}, not {}",
                entry.hash.short(),
                entry.address,
                self.address
            )));
        }
        if !self.writers.contains(&entry.author) {
            return Err(ChatError::WriteRejected(format!(
                "{} is not a writer of {}",
                entry.author, self.address
            )));
        }
        if entry.is_removal() && !self.kind.supports_removal() {
            return Err(ChatError::RemovalUnsupported(self.kind));
        }
        if entry.clock == u64::MAX {
            return Err(ChatError::WriteRejected(format!(
                "entry {} has an exhausted clock",
                entry.hash.short()
            )));
        }
        entry.verify()
    }

    /// Validate and insert an entry. Inserting a known entry is a no-op.
    pub fn insert(&mut self, entry: LogEntry) -> ChatResult<InsertOutcome> {
        if self.entries.contains_key(&entry.hash) {
            return Ok(InsertOutcome::Duplicate);
        }
        self.validate(&entry)?;

        for parent in &entry.next {
            self.referenced.insert(*parent);
            self.heads.remove(parent);
            if !self.entries.contains_key(parent) {
                self.missing.insert(*parent);
            }
        }
        self.missing.remove(&entry.hash);
        if !self.referenced.contains(&entry.hash) {
            self.heads.insert(entry.hash);
        }
        if let Operation::Del { target } = &entry.payload {
            self.removed.insert(*target);
        }
        self.max_clock = self.max_clock.max(entry.clock);
        self.entries.insert(entry.hash, entry);

        Ok(InsertOutcome::Inserted)
    }

    /// Every entry, tombstones included, in linear order.
    pub fn ordered(&self) -> Vec<&LogEntry> {
        let mut all: Vec<&LogEntry> = self.entries.values().collect();
        all.sort_by(|a, b| {
            a.clock
                .cmp(&b.clock)
                .then_with(|| a.author.cmp(&b.author))
                .then_with(|| a.hash.cmp(&b.hash))
        });
        all
    }

    /// Entries a reader sees, in linear order.
    ///
    /// For feeds, tombstones and their targets are hidden.
    pub fn visible(&self) -> Vec<LogEntry> {
        self.ordered()
            .into_iter()
            .filter(|e| !e.is_removal() && !self.removed.contains(&e.hash))
            .cloned()
            .collect()
    }

    /// Visible entries strictly after `since` in linear order.
    ///
    /// `since` may itself be hidden (removed); it still marks a position.
    pub fn visible_since(&self, since: &EntryHash) -> ChatResult<Vec<LogEntry>> {
        let ordered = self.ordered();
        let position = ordered
            .iter()
            .position(|e| &e.hash == since)
            .ok_or_else(|| ChatError::EntryNotFound(since.to_hex()))?;

        Ok(ordered[position + 1..]
            .iter()
            .filter(|e| !e.is_removal() && !self.removed.contains(&e.hash))
            .map(|e| (*e).clone())
            .collect())
    }

    /// The last `limit` visible entries, oldest first.
    pub fn visible_latest(&self, limit: usize) -> Vec<LogEntry> {
        let mut visible = self.visible();
        let skip = visible.len().saturating_sub(limit);
        visible.drain(..skip);
        visible
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::LocalIdentity;

    struct Fixture {
        alice: LocalIdentity,
        bob: LocalIdentity,
        index: LogIndex,
    }

    fn fixture(kind: LogKind) -> Fixture {
        let alice = LocalIdentity::generate();
        let bob = LocalIdentity::generate();
        let writers = WriterSet::new(alice.did().clone(), bob.did().clone()).unwrap();
        let address = LogAddress::derive("talktime", kind, &writers);
        Fixture {
            alice,
            bob,
            index: LogIndex::new(address, kind, writers),
        }
    }

    fn append(index: &mut LogIndex, who: &LocalIdentity, value: &str) -> LogEntry {
        let entry = LogEntry::create(
            who,
            *index.address(),
            index.next_clock(),
            index.heads(),
            Operation::Add {
                value: value.to_string(),
            },
        )
        .unwrap();
        index.insert(entry.clone()).unwrap();
        entry
    }

    fn values(entries: &[LogEntry]) -> Vec<&str> {
        entries.iter().filter_map(|e| e.value()).collect()
    }

    #[test]
    fn test_linear_appends() {
        let mut f = fixture(LogKind::Feed);
        let first = append(&mut f.index, &f.alice, "1");
        let second = append(&mut f.index, &f.bob, "2");

        assert_eq!(f.index.len(), 2);
        assert_eq!(second.next, vec![first.hash]);
        assert_eq!(f.index.heads(), vec![second.hash]);
        assert_eq!(values(&f.index.visible()), vec!["1", "2"]);
    }

    #[test]
    fn test_duplicate_insert_is_noop() {
        let mut f = fixture(LogKind::Feed);
        let entry = append(&mut f.index, &f.alice, "1");

        assert_eq!(f.index.insert(entry).unwrap(), InsertOutcome::Duplicate);
        assert_eq!(f.index.len(), 1);
    }

    #[test]
    fn test_concurrent_heads_merge() {
        let mut f = fixture(LogKind::Feed);
        let root = append(&mut f.index, &f.alice, "root");

        // Two writers append on top of the same head
        let from_alice = LogEntry::create(
            &f.alice,
            *f.index.address(),
            2,
            vec![root.hash],
            Operation::Add { value: "a".into() },
        )
        .unwrap();
        let from_bob = LogEntry::create(
            &f.bob,
            *f.index.address(),
            2,
            vec![root.hash],
            Operation::Add { value: "b".into() },
        )
        .unwrap();
        f.index.insert(from_alice.clone()).unwrap();
        f.index.insert(from_bob.clone()).unwrap();
        assert_eq!(f.index.heads().len(), 2);

        let merge = append(&mut f.index, &f.alice, "merge");
        assert_eq!(merge.clock, 3);
        assert_eq!(merge.next.len(), 2);
        assert_eq!(f.index.heads(), vec![merge.hash]);
    }

    #[test]
    fn test_order_independent_of_arrival() {
        let mut f = fixture(LogKind::Feed);
        let mut entries = Vec::new();
        for i in 0..5 {
            let who = if i % 2 == 0 { &f.alice } else { &f.bob };
            entries.push(append(&mut f.index, who, &i.to_string()));
        }

        let mut reversed = LogIndex::new(*f.index.address(), f.index.kind(), f.index.writers().clone());
        for entry in entries.iter().rev() {
            reversed.insert(entry.clone()).unwrap();
        }

        assert_eq!(reversed.visible(), f.index.visible());
        assert_eq!(reversed.heads(), f.index.heads());
    }

    #[test]
    fn test_rejects_outsider() {
        let mut f = fixture(LogKind::Feed);
        let mallory = LocalIdentity::generate();
        let entry = LogEntry::create(
            &mallory,
            *f.index.address(),
            1,
            vec![],
            Operation::Add { value: "x".into() },
        )
        .unwrap();

        assert!(matches!(f.index.insert(entry), Err(ChatError::WriteRejected(_))));
        assert!(f.index.is_empty());
    }

    #[test]
    fn test_rejects_other_address() {
        let mut f = fixture(LogKind::Feed);
        let writers = f.index.writers().clone();
        let elsewhere = LogAddress::derive("elsewhere", LogKind::Feed, &writers);
        let entry = LogEntry::create(&f.alice, elsewhere, 1, vec![], Operation::Add { value: "x".into() })
            .unwrap();

        assert!(f.index.insert(entry).is_err());
    }

    #[test]
    fn test_feed_removal_hides_target() {
        let mut f = fixture(LogKind::Feed);
        let keep = append(&mut f.index, &f.alice, "keep");
        let gone = append(&mut f.index, &f.bob, "gone");

        let del = LogEntry::create(
            &f.alice,
            *f.index.address(),
            f.index.next_clock(),
            f.index.heads(),
            Operation::Del { target: gone.hash },
        )
        .unwrap();
        f.index.insert(del).unwrap();

        let visible = f.index.visible();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].hash, keep.hash);
        // Raw order still has all three
        assert_eq!(f.index.ordered().len(), 3);
    }

    #[test]
    fn test_eventlog_rejects_tombstones() {
        let mut f = fixture(LogKind::EventLog);
        let entry = append(&mut f.index, &f.alice, "1");
        let del = LogEntry::create(
            &f.alice,
            *f.index.address(),
            2,
            vec![entry.hash],
            Operation::Del { target: entry.hash },
        )
        .unwrap();

        assert!(matches!(
            f.index.insert(del),
            Err(ChatError::RemovalUnsupported(LogKind::EventLog))
        ));
    }

    #[test]
    fn test_visible_since() {
        let mut f = fixture(LogKind::Feed);
        let first = append(&mut f.index, &f.alice, "1");
        append(&mut f.index, &f.bob, "2");
        append(&mut f.index, &f.alice, "3");

        let after = f.index.visible_since(&first.hash).unwrap();
        assert_eq!(values(&after), vec!["2", "3"]);

        let unknown = EntryHash::from_bytes([7; 32]);
        assert!(matches!(
            f.index.visible_since(&unknown),
            Err(ChatError::EntryNotFound(_))
        ));
    }

    #[test]
    fn test_visible_latest() {
        let mut f = fixture(LogKind::Feed);
        for i in 0..5 {
            append(&mut f.index, &f.alice, &i.to_string());
        }

        assert_eq!(values(&f.index.visible_latest(2)), vec!["3", "4"]);
        assert_eq!(f.index.visible_latest(10).len(), 5);
        assert!(f.index.visible_latest(0).is_empty());
    }

    #[test]
    fn test_missing_parents_tracked_until_arrival() {
        let mut f = fixture(LogKind::Feed);
        let mut source = LogIndex::new(*f.index.address(), f.index.kind(), f.index.writers().clone());
        let first = append(&mut source, &f.alice, "1");
        let second = append(&mut source, &f.alice, "2");
        assert!(source.is_complete());

        // Only the newer entry arrives
        f.index.insert(second.clone()).unwrap();
        assert_eq!(f.index.heads(), vec![second.hash]);
        assert_eq!(f.index.missing(), vec![first.hash]);
        assert!(!f.index.is_complete());

        f.index.insert(first).unwrap();
        assert!(f.index.is_complete());
        assert_eq!(values(&f.index.visible()), vec!["1", "2"]);
    }

    #[test]
    fn test_exhausted_clock_rejected() {
        let mut f = fixture(LogKind::Feed);
        let last = LogEntry::create(
            &f.bob,
            *f.index.address(),
            u64::MAX,
            vec![],
            Operation::Add { value: "x".into() },
        )
        .unwrap();
        assert!(matches!(f.index.insert(last), Err(ChatError::WriteRejected(_))));
        assert!(f.index.is_empty());

        // The highest accepted clock leaves local appends failing, not wrapping
        let near = LogEntry::create(
            &f.bob,
            *f.index.address(),
            u64::MAX - 1,
            vec![],
            Operation::Add { value: "y".into() },
        )
        .unwrap();
        f.index.insert(near).unwrap();
        assert_eq!(f.index.next_clock(), u64::MAX);

        let local = LogEntry::create(
            &f.alice,
            *f.index.address(),
            f.index.next_clock(),
            f.index.heads(),
            Operation::Add { value: "z".into() },
        )
        .unwrap();
        assert!(matches!(f.index.insert(local), Err(ChatError::WriteRejected(_))));
        assert_eq!(f.index.len(), 1);
    }

    #[test]
    fn test_unknown_heads() {
        let mut f = fixture(LogKind::Feed);
        let known = append(&mut f.index, &f.alice, "1");
        let missing = EntryHash::from_bytes([9; 32]);

        assert_eq!(f.index.unknown(&[known.hash, missing]), vec![missing]);
    }
}
