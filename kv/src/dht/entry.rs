//! Entry MVCC (C2) and reader tracking (C3) for a single `(cache_id, key)`.
//!
//! All mutation goes through `&mut Entry` methods: callers are expected to hold
//! the entry's shard monitor (see [`crate::dht::manager::EntryTable`]) for the
//! duration of the call, so the candidate queue and removed-set update
//! atomically with respect to each other.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use crate::dht::candidate::{MvccCandidate, ThreadId};
use crate::dht::reader::ReaderRegistry;
use crate::dht::version::Version;
use crate::error::{CResult, Error};

/// Cap on the removed-version set so a long-lived hot entry's late-message
/// filter doesn't grow unbounded. Oldest entries are evicted first.
const REMOVED_SET_CAPACITY: usize = 1024;

pub type NodeId = String;

/// A single versioned key/value entry plus its MVCC candidate queue and (for
/// primary-role entries) near-cache reader list.
pub struct Entry {
    pub cache_id: u32,
    pub key: Vec<u8>,
    pub partition_id: u32,

    pub value: Option<Vec<u8>>,
    pub value_version: Option<Version>,
    pub ttl: Option<Duration>,
    pub expire_time: Option<Instant>,

    pub obsolete: bool,
    pub new: bool,
    pub deleted: bool,

    candidates: Vec<MvccCandidate>,
    owner_version: Option<Version>,

    removed_order: VecDeque<Version>,
    removed_set: HashSet<Version>,

    pub readers: ReaderRegistry,
}

impl Entry {
    pub fn new(cache_id: u32, key: Vec<u8>, partition_id: u32) -> Self {
        Self {
            cache_id,
            key,
            partition_id,
            value: None,
            value_version: None,
            ttl: None,
            expire_time: None,
            obsolete: false,
            new: true,
            deleted: false,
            candidates: Vec::new(),
            owner_version: None,
            removed_order: VecDeque::new(),
            removed_set: HashSet::new(),
            readers: ReaderRegistry::new(),
        }
    }

    fn check_alive(&self) -> CResult<()> {
        if self.obsolete {
            return Err(Error::EntryRemoved { key: hex_key(&self.key) });
        }
        Ok(())
    }

    fn is_removed(&self, version: &Version) -> bool {
        self.removed_set.contains(version)
    }

    fn mark_removed(&mut self, version: Version) {
        if self.removed_set.insert(version) {
            self.removed_order.push_back(version);
            if self.removed_order.len() > REMOVED_SET_CAPACITY {
                if let Some(oldest) = self.removed_order.pop_front() {
                    self.removed_set.remove(&oldest);
                }
            }
        }
    }

    /// Adds a local lock candidate. Returns `Ok(None)` if `tx_ver` is already in
    /// the removed-version set (a late message, silently dropped per §4.2).
    #[allow(clippy::too_many_arguments)]
    pub fn add_local(
        &mut self,
        tx_ver: Version,
        thread: ThreadId,
        timeout: Option<Duration>,
        reentry: bool,
        near_local: bool,
        dht_local: bool,
        topology: u32,
    ) -> CResult<Option<MvccCandidate>> {
        self.check_alive()?;
        if self.is_removed(&tx_ver) {
            return Ok(None);
        }

        let mut candidate =
            MvccCandidate::new(tx_ver, thread, timeout, reentry, near_local, dht_local, topology);
        if reentry {
            if let Some(owner) = self.owner() {
                candidate.owner_version = Some(owner.version);
            }
        }
        self.candidates.push(candidate.clone());
        Ok(Some(candidate))
    }

    /// Adds a remote candidate on behalf of `node` (a backup or near replica).
    #[allow(clippy::too_many_arguments)]
    pub fn add_remote(
        &mut self,
        node: NodeId,
        thread: ThreadId,
        tx_ver: Version,
        timeout: Option<Duration>,
        implicit: bool,
        owner_hint: Option<Version>,
        topology: u32,
    ) -> CResult<()> {
        self.check_alive()?;
        if self.is_removed(&tx_ver) {
            return Err(Error::Cancelled { version: tx_ver.to_string() });
        }

        let mut candidate =
            MvccCandidate::new(tx_ver, thread, timeout, false, false, false, topology);
        candidate.node = Some(node);
        candidate.owner_version = owner_hint;
        let _ = implicit;
        self.candidates.push(candidate);
        Ok(())
    }

    /// Marks the candidate at `tx_ver` ready and recomputes the owner. Returns
    /// the new owner, if ownership changed or was newly granted.
    pub fn ready(&mut self, tx_ver: Version) -> CResult<Option<MvccCandidate>> {
        self.check_alive()?;
        if self.is_removed(&tx_ver) {
            return Ok(None);
        }
        if let Some(c) = self.candidates.iter_mut().find(|c| c.version == tx_ver) {
            c.ready = true;
        }
        Ok(self.recompute_owner())
    }

    /// Releases the candidate at `tx_ver`: removes it from the queue, records
    /// its version in the removed-set (I2), and recomputes the owner.
    pub fn release(&mut self, tx_ver: Version) -> CResult<Option<MvccCandidate>> {
        self.candidates.retain(|c| c.version != tx_ver);
        self.mark_removed(tx_ver);
        Ok(self.recompute_owner())
    }

    /// Removes a candidate because its lock timed out, without granting it
    /// ownership. Equivalent to `release` but named for call-site clarity.
    pub fn cancel_timed_out(&mut self, tx_ver: Version) -> CResult<Option<MvccCandidate>> {
        self.release(tx_ver)
    }

    /// Owner selection (§4.2): the first candidate in insertion order that is
    /// non-reentrant, ready, and not in the removed-set.
    fn recompute_owner(&mut self) -> Option<MvccCandidate> {
        let removed = &self.removed_set;
        let owner = self
            .candidates
            .iter()
            .find(|c| !c.reentry && c.ready && !removed.contains(&c.version))
            .cloned();
        self.owner_version = owner.as_ref().map(|c| c.version);

        if let Some(owner_ver) = self.owner_version {
            for c in self.candidates.iter_mut().filter(|c| c.reentry) {
                c.owner_version = Some(owner_ver);
            }
        }
        owner
    }

    /// Read-only snapshot of the current owner, without mutating the queue.
    pub fn owner(&self) -> Option<MvccCandidate> {
        self.owner_version.and_then(|v| self.candidates.iter().find(|c| c.version == v).cloned())
    }

    /// Full snapshot of the candidate queue, in insertion order.
    pub fn candidates(&self) -> Vec<MvccCandidate> {
        self.candidates.clone()
    }

    pub fn candidate_by_version(&self, version: &Version) -> Option<MvccCandidate> {
        self.candidates.iter().find(|c| &c.version == version).cloned()
    }

    /// Finds a candidate linked to the given near-cache version, either as the
    /// near-local candidate itself or via its `other_version` link.
    pub fn candidate_by_near_version(&self, near_version: &Version) -> Option<MvccCandidate> {
        self.candidates
            .iter()
            .find(|c| {
                (c.near_local && &c.version == near_version)
                    || c.other_version.as_ref() == Some(near_version)
            })
            .cloned()
    }

    /// Sweeps candidates whose timeout has elapsed without obtaining
    /// ownership, releasing each and returning `(version, thread_id)` pairs so
    /// the caller can fail the corresponding transactions with `LockTimeout`.
    pub fn sweep_timed_out(&mut self) -> Vec<(Version, ThreadId)> {
        let expired: Vec<(Version, ThreadId)> = self
            .candidates
            .iter()
            .filter(|c| self.owner_version != Some(c.version) && c.is_timed_out())
            .map(|c| (c.version, c.thread_id))
            .collect();
        for (version, _) in &expired {
            self.candidates.retain(|c| c.version != *version);
            self.mark_removed(*version);
        }
        if !expired.is_empty() {
            self.recompute_owner();
        }
        expired
    }

    /// Applies a committed write: bumps value/version, clears the `new` flag,
    /// sets expiry from `ttl`.
    pub fn apply_write(&mut self, value: Option<Vec<u8>>, version: Version, ttl: Option<Duration>) {
        self.deleted = value.is_none();
        self.value = value;
        self.value_version = Some(version);
        self.new = false;
        self.ttl = ttl;
        self.expire_time = ttl.map(|d| Instant::now() + d);
    }

    /// True once a deferred-delete tombstone (§4.5) can be physically dropped
    /// from the entry table: the value is gone and no candidate -- meaning no
    /// transaction whose version predates the delete -- still holds a lock on
    /// it.
    pub fn is_gc_eligible(&self) -> bool {
        self.deleted && self.candidates.is_empty()
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.expire_time, Some(t) if Instant::now() >= t)
    }

    pub fn mark_obsolete(&mut self) {
        self.obsolete = true;
    }
}

fn hex_key(key: &[u8]) -> String {
    key.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ver(order: u64) -> Version {
        Version { order, node_order: 1, topology: 1, global_time: 0 }
    }

    #[test]
    fn at_most_one_owner_at_a_time() {
        let mut e = Entry::new(0, b"k".to_vec(), 0);
        e.add_local(ver(1), 1, None, false, false, true, 1).unwrap();
        e.add_local(ver(2), 2, None, false, false, true, 1).unwrap();

        assert!(e.owner().is_none());
        let owner = e.ready(ver(1)).unwrap().unwrap();
        assert_eq!(owner.version, ver(1));

        // Readying the second candidate must not dislodge the first owner.
        let still_owner = e.ready(ver(2)).unwrap();
        assert_eq!(still_owner.map(|c| c.version), Some(ver(1)));
    }

    #[test]
    fn release_promotes_next_ready_candidate() {
        let mut e = Entry::new(0, b"k".to_vec(), 0);
        e.add_local(ver(1), 1, None, false, false, true, 1).unwrap();
        e.add_local(ver(2), 2, None, false, false, true, 1).unwrap();
        e.ready(ver(1)).unwrap();
        e.ready(ver(2)).unwrap();

        let new_owner = e.release(ver(1)).unwrap();
        assert_eq!(new_owner.map(|c| c.version), Some(ver(2)));
    }

    #[test]
    fn removed_set_drops_late_messages() {
        let mut e = Entry::new(0, b"k".to_vec(), 0);
        e.add_local(ver(1), 1, None, false, false, true, 1).unwrap();
        e.release(ver(1)).unwrap();

        // A late arrival for a version already released is silently dropped.
        let result = e.add_local(ver(1), 1, None, false, false, true, 1).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn obsolete_entry_signals_entry_removed() {
        let mut e = Entry::new(0, b"k".to_vec(), 0);
        e.mark_obsolete();
        let result = e.add_local(ver(1), 1, None, false, false, true, 1);
        assert!(matches!(result, Err(Error::EntryRemoved { .. })));
    }

    #[test]
    fn reentrant_candidates_share_owner_version() {
        let mut e = Entry::new(0, b"k".to_vec(), 0);
        e.add_local(ver(1), 1, None, false, false, true, 1).unwrap();
        e.ready(ver(1)).unwrap();
        let reentrant = e.add_local(ver(1), 1, None, true, false, true, 1).unwrap().unwrap();
        assert_eq!(reentrant.owner_version, Some(ver(1)));
    }
}
