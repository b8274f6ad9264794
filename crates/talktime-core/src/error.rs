//! Error types for TalkTime

use thiserror::Error;

use crate::log::LogKind;

/// Main error type for TalkTime operations
#[derive(Error, Debug)]
pub enum ChatError {
    /// The replication substrate could not be reached while opening a log
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The local identity is not allowed to append to this log
    #[error("Write rejected: {0}")]
    WriteRejected(String),

    /// `open` was called on a log session that is already open
    #[error("Log session is already open")]
    AlreadyOpen,

    /// A log operation was attempted before `open` succeeded (or after close)
    #[error("Log session is not open")]
    NotOpen,

    /// No chat session is configured for this pair of identities
    #[error("No chat session is configured")]
    NotConfigured,

    /// The secret used to derive an identity is malformed
    #[error("Invalid secret: {0}")]
    InvalidSecret(String),

    /// The log kind has no removal primitive
    #[error("Removal is not supported by {0} logs")]
    RemovalUnsupported(LogKind),

    /// Writer set does not contain exactly two distinct identities
    #[error("Invalid writer set: {0}")]
    InvalidWriterSet(String),

    /// No entry with the given hash is known locally
    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    /// Identity-related error (keys, signatures, DIDs)
    #[error("Identity error: {0}")]
    Identity(String),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error during gossip protocol operations
    #[error("Gossip error: {0}")]
    Gossip(String),

    /// Error during storage operations (redb)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Whether the caller may retry the failed operation unchanged.
    ///
    /// Only transport failures are transient; misuse guards and
    /// authorization failures will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::TransportUnavailable(_))
    }
}

impl From<postcard::Error> for ChatError {
    fn from(e: postcard::Error) -> Self {
        ChatError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        ChatError::Serialization(e.to_string())
    }
}

/// Result type alias using ChatError
pub type ChatResult<T> = Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChatError::TransportUnavailable("hub offline".to_string());
        assert_eq!(format!("{}", err), "Transport unavailable: hub offline");

        let err = ChatError::RemovalUnsupported(LogKind::EventLog);
        assert_eq!(format!("{}", err), "Removal is not supported by eventlog logs");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ChatError = io_err.into();
        assert!(matches!(err, ChatError::Io(_)));
    }

    #[test]
    fn test_only_transport_errors_are_retryable() {
        assert!(ChatError::TransportUnavailable("down".into()).is_retryable());
        assert!(!ChatError::WriteRejected("not a writer".into()).is_retryable());
        assert!(!ChatError::NotOpen.is_retryable());
        assert!(!ChatError::NotConfigured.is_retryable());
    }
}
