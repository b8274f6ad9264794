//! Structured logging to per-node JSONL files.
//!
//! ```text
//! logs/
//! └── raw/                          # one file per node per day
//!     ├── 2026-01-21_alice.jsonl
//!     └── 2026-01-21_bob.jsonl
//! ```
//!
//! ```ignore
//! use talktime_core::logging::LoggingBuilder;
//!
//! LoggingBuilder::new("./logs", "alice").init()?;
//! ```
//!
//! The files are plain JSONL, so the usual tools apply:
//!
//! ```bash
//! # Every dropped remote entry
//! jq 'select(.msg | test("Dropping"))' logs/raw/*.jsonl
//!
//! # Merged timeline of both nodes
//! cat logs/raw/*.jsonl | jq -s 'sort_by(.ts)'
//! ```

pub mod entry;
pub mod layer;
pub mod writer;

pub use entry::JsonLogEntry;
pub use layer::{JsonlLayer, LoggingBuilder, DEFAULT_FILTER};
pub use writer::{read_entries, InstanceLogWriter};
