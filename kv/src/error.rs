//! Error type shared by every component of the cache engine, from the log-structured
//! store up through transaction coordination and recovery.

use std::fmt::{Display, Formatter};

pub type CResult<T> = Result<T, Error>;

/// Errors produced by the storage, MVCC, and distributed transaction layers.
///
/// Recoverable kinds (`TopologyLeft`, `EntryRemoved`, `Cancelled`) are expected to be
/// handled locally by callers via bounded retry; the rest propagate to the caller's
/// future or are surfaced to the client as-is.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Unexpected internal condition; not meaningful to retry.
    Internal(String),

    /// Malformed input, e.g. a corrupt log record or an unparsable wire message.
    Parse(String),

    /// Invalid value or argument supplied by a caller.
    Value(String),

    /// No such key, transaction, or peer.
    NotFound(String),

    /// A required remote node is no longer a cluster member.
    TopologyLeft(String),

    /// An MVCC candidate did not become owner before its lock timeout elapsed.
    LockTimeout { key: String, timeout_ms: u64 },

    /// A peer reported a filter or version mismatch during optimistic prepare.
    OptimisticConflict { key: String },

    /// Commit partially succeeded across peers and cannot be undone.
    HeuristicCommit { xid: String, detail: String },

    /// Entry was evicted/obsoleted concurrently with the operation; caller should
    /// re-resolve the entry and retry.
    EntryRemoved { key: String },

    /// Write-through reported a subset of keys failed; named keys did not persist
    /// but the rest of the transaction's in-memory state is committed.
    PartialUpdate { failed_keys: Vec<String> },

    /// Transaction rolled back, explicitly or as a derived consequence. Terminal.
    TxRollback { xid: String, reason: String },

    /// Operation was dropped because a newer version for the key is already
    /// in the entry's removed-version set.
    Cancelled { version: String },
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Internal(msg) => write!(f, "internal error: {msg}"),
            Error::Parse(msg) => write!(f, "parse error: {msg}"),
            Error::Value(msg) => write!(f, "value error: {msg}"),
            Error::NotFound(what) => write!(f, "not found: {what}"),
            Error::TopologyLeft(node) => write!(f, "node left topology: {node}"),
            Error::LockTimeout { key, timeout_ms } => {
                write!(f, "lock timeout on {key} after {timeout_ms}ms")
            }
            Error::OptimisticConflict { key } => write!(f, "optimistic conflict on {key}"),
            Error::HeuristicCommit { xid, detail } => {
                write!(f, "heuristic commit for {xid}: {detail}")
            }
            Error::EntryRemoved { key } => write!(f, "entry removed: {key}"),
            Error::PartialUpdate { failed_keys } => {
                write!(f, "partial update, failed keys: {failed_keys:?}")
            }
            Error::TxRollback { xid, reason } => write!(f, "tx {xid} rolled back: {reason}"),
            Error::Cancelled { version } => write!(f, "cancelled, superseded by {version}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Parse(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Parse(err.to_string())
    }
}

impl Error {
    /// True for kinds the core is expected to retry internally (bounded) rather
    /// than surface to the caller's future.
    pub fn is_locally_recoverable(&self) -> bool {
        matches!(self, Error::TopologyLeft(_) | Error::EntryRemoved { .. } | Error::Cancelled { .. })
    }
}
