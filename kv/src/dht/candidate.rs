//! MVCC candidate (C2): a pending or granted lock intent on an entry.

use crate::dht::version::Version;
use std::time::{Duration, Instant};

/// Thread/task identifier a candidate is locking on behalf of. Opaque to the
/// engine; only used for reentrancy checks.
pub type ThreadId = u64;

/// A pending or granted lock intent on a single entry, carrying the version of
/// the transaction it belongs to.
///
/// Lifecycle: *created* on `add_local`/`add_remote` -> *ready* once `ready()` is
/// called by prepare -> *owner* once first-in-line among ready, non-reentrant
/// candidates -> *released* by explicit removal or tx commit/rollback.
#[derive(Debug, Clone)]
pub struct MvccCandidate {
    pub version: Version,
    pub thread_id: ThreadId,

    /// Deadline for obtaining ownership; `None` means no timeout (indefinite).
    pub deadline: Option<Instant>,

    /// Set once prepare has marked this candidate ready to be considered for
    /// ownership.
    pub ready: bool,

    /// Set once the owner has actually used (read or written) the entry, so a
    /// concurrent `release` can distinguish "never touched" from "in flight".
    pub used: bool,

    /// Reentrant candidates don't participate in owner selection; they inherit
    /// the version of the real owner for the same thread/tx.
    pub reentry: bool,

    /// True if this is the near-cache's local candidate copy rather than a
    /// DHT-local one.
    pub near_local: bool,

    /// True if this candidate was created by a local (non-remote) lock request.
    pub dht_local: bool,

    /// The remote node this candidate was enlisted on behalf of, for
    /// remote/backup replica candidates. `None` for purely local candidates.
    pub node: Option<String>,

    /// The version of another candidate this one is linked to (used to mirror
    /// near-local/dht-local pairs of the same logical lock).
    pub other_version: Option<Version>,

    /// Once ownership is granted, mirrors `version` for callers that only care
    /// about "is there an owner" without re-deriving it.
    pub owner_version: Option<Version>,

    pub topology: u32,
}

impl MvccCandidate {
    pub fn new(
        version: Version,
        thread_id: ThreadId,
        timeout: Option<Duration>,
        reentry: bool,
        near_local: bool,
        dht_local: bool,
        topology: u32,
    ) -> Self {
        Self {
            version,
            thread_id,
            deadline: timeout.map(|d| Instant::now() + d),
            ready: false,
            used: false,
            reentry,
            near_local,
            dht_local,
            node: None,
            other_version: None,
            owner_version: None,
            topology,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self.deadline, Some(deadline) if Instant::now() >= deadline)
    }

    pub fn timeout_ms(&self, since: Instant) -> u64 {
        self.deadline.map(|d| d.saturating_duration_since(since).as_millis() as u64).unwrap_or(0)
    }
}
