//! Concurrent maps backing the engine: a sharded entry table (§5 "no global
//! lock is taken across multiple entries"), the tx manager's `xid -> tx` map,
//! and the mvcc manager's `future_id -> future` registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, RwLock};

use crate::dht::entry::Entry;
use crate::dht::messages::FutureId;
use crate::dht::topology::NodeId;
use crate::dht::transaction::Transaction;
use crate::dht::version::Version;

const SHARD_COUNT: usize = 64;

/// Sharded map of per-entry monitors, keyed by `(cache_id, key)`. Each shard is
/// an independent `Mutex`, so unrelated keys never contend; multi-key
/// operations must acquire shards in the canonical order produced by
/// [`EntryTable::canonical_order`] to avoid deadlock (§5).
pub struct EntryTable {
    shards: Vec<Mutex<HashMap<(u32, Vec<u8>), Entry>>>,
}

impl EntryTable {
    pub fn new() -> Self {
        let mut shards = Vec::with_capacity(SHARD_COUNT);
        shards.resize_with(SHARD_COUNT, || Mutex::new(HashMap::new()));
        Self { shards }
    }

    fn shard_index(cache_id: u32, key: &[u8]) -> usize {
        let mut hash: u64 = 1469598103934665603;
        hash ^= cache_id as u64;
        hash = hash.wrapping_mul(1099511628211);
        for b in key {
            hash ^= *b as u64;
            hash = hash.wrapping_mul(1099511628211);
        }
        (hash as usize) % SHARD_COUNT
    }

    /// Orders `(cache_id, key)` pairs by shard index, then by `(cache_id,
    /// key)` itself, so independent callers always acquire a shared set of
    /// entries in the same order (§5 multi-entry deadlock avoidance).
    pub fn canonical_order(keys: &mut [(u32, Vec<u8>)]) {
        keys.sort_by(|a, b| {
            let sa = Self::shard_index(a.0, &a.1);
            let sb = Self::shard_index(b.0, &b.1);
            sa.cmp(&sb).then_with(|| a.cmp(b))
        });
    }

    /// Runs `f` with exclusive access to the entry for `(cache_id, key)`,
    /// creating it (as `new`) if absent.
    pub fn with_entry<R>(
        &self,
        cache_id: u32,
        key: &[u8],
        partition_id: u32,
        f: impl FnOnce(&mut Entry) -> R,
    ) -> R {
        let idx = Self::shard_index(cache_id, key);
        let mut shard = self.shards[idx].lock().unwrap();
        let entry = shard
            .entry((cache_id, key.to_vec()))
            .or_insert_with(|| Entry::new(cache_id, key.to_vec(), partition_id));
        f(entry)
    }

    pub fn peek_entry<R>(
        &self,
        cache_id: u32,
        key: &[u8],
        _partition_id: u32,
        f: impl FnOnce(Option<&Entry>) -> R,
    ) -> R {
        let idx = Self::shard_index(cache_id, key);
        let shard = self.shards[idx].lock().unwrap();
        f(shard.get(&(cache_id, key.to_vec())))
    }

    pub fn remove_entry(&self, cache_id: u32, key: &[u8]) {
        let idx = Self::shard_index(cache_id, key);
        self.shards[idx].lock().unwrap().remove(&(cache_id, key.to_vec()));
    }

    /// Drops every tombstone entry across all shards whose deferred delete
    /// (§4.5) is now safe to finalize: deleted, with no candidate left in its
    /// queue. Returns the number of entries actually dropped.
    pub fn gc_deferred_deletes(&self) -> usize {
        let mut dropped = 0;
        for shard in &self.shards {
            let mut guard = shard.lock().unwrap();
            guard.retain(|_, entry| {
                if entry.is_gc_eligible() {
                    dropped += 1;
                    false
                } else {
                    true
                }
            });
        }
        dropped
    }

    /// Sweeps every shard for timed-out candidates, returning
    /// `(cache_id, key, version, thread_id)` for each so the tx manager can
    /// fail the owning transactions with `LockTimeout`.
    pub fn sweep_timed_out(&self) -> Vec<(u32, Vec<u8>, Version, u64)> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let mut guard = shard.lock().unwrap();
            for ((cache_id, key), entry) in guard.iter_mut() {
                for (version, thread_id) in entry.sweep_timed_out() {
                    out.push((*cache_id, key.clone(), version, thread_id));
                }
            }
        }
        out
    }
}

impl Default for EntryTable {
    fn default() -> Self {
        Self::new()
    }
}

/// `xid -> tx` concurrent map. Transactions are wrapped in their own
/// `tokio::sync::Mutex` so prepare/finish can `await` while holding exclusive
/// access to the tx record without blocking the map itself.
#[derive(Default)]
pub struct TxTable {
    inner: RwLock<HashMap<Version, Arc<tokio::sync::Mutex<Transaction>>>>,
}

impl TxTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `tx` unless an entry for its xid already exists (compare-and-set
    /// semantics over the map).
    pub fn insert_if_absent(&self, tx: Transaction) -> Arc<tokio::sync::Mutex<Transaction>> {
        let mut map = self.inner.write().unwrap();
        map.entry(tx.xid).or_insert_with(|| Arc::new(tokio::sync::Mutex::new(tx))).clone()
    }

    pub fn get(&self, xid: &Version) -> Option<Arc<tokio::sync::Mutex<Transaction>>> {
        self.inner.read().unwrap().get(xid).cloned()
    }

    pub fn remove(&self, xid: &Version) {
        self.inner.write().unwrap().remove(xid);
    }

    pub fn all_xids(&self) -> Vec<Version> {
        self.inner.read().unwrap().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounds how much write-set memory prepared-but-unfinished transactions may
/// hold (§5 "orphaned txs are bounded by a finalization queue"). Entries are
/// tracked oldest-first; once either cap is exceeded, [`evict_overflow`]
/// yields the oldest entries first so the caller can force them to a
/// decision rather than let an unbounded number of stuck coordinators pin
/// memory forever.
///
/// [`evict_overflow`]: FinalizationQueue::evict_overflow
pub struct FinalizationQueue {
    inner: Mutex<FinalizationState>,
    max_count: usize,
    max_bytes: usize,
}

#[derive(Default)]
struct FinalizationState {
    order: VecDequeVersions,
    sizes: HashMap<Version, usize>,
    total_bytes: usize,
}

type VecDequeVersions = std::collections::VecDeque<Version>;

impl FinalizationQueue {
    pub fn new(max_count: usize, max_bytes: usize) -> Self {
        Self { inner: Mutex::new(FinalizationState::default()), max_count, max_bytes }
    }

    /// Tracks a transaction entering `Prepared` with an approximate write-set
    /// size in bytes.
    pub fn push(&self, xid: Version, approx_bytes: usize) {
        let mut state = self.inner.lock().unwrap();
        if state.sizes.insert(xid, approx_bytes).is_none() {
            state.order.push_back(xid);
            state.total_bytes += approx_bytes;
        }
    }

    /// Stops tracking a transaction once it reaches a terminal state.
    pub fn remove(&self, xid: &Version) {
        let mut state = self.inner.lock().unwrap();
        if let Some(bytes) = state.sizes.remove(xid) {
            state.total_bytes = state.total_bytes.saturating_sub(bytes);
            state.order.retain(|v| v != xid);
        }
    }

    /// Pops the oldest tracked transactions until both the count and byte
    /// caps are satisfied, returning their xids for forced finalization.
    pub fn evict_overflow(&self) -> Vec<Version> {
        let mut state = self.inner.lock().unwrap();
        let mut evicted = Vec::new();
        while state.order.len() > self.max_count || state.total_bytes > self.max_bytes {
            let Some(xid) = state.order.pop_front() else { break };
            if let Some(bytes) = state.sizes.remove(&xid) {
                state.total_bytes = state.total_bytes.saturating_sub(bytes);
            }
            evicted.push(xid);
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Mints future ids. Wraps at `u64::MAX`, which is unreachable in practice.
#[derive(Default)]
pub struct FutureIdVendor(AtomicU64);

impl FutureIdVendor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> FutureId {
        self.0.fetch_add(1, AtomicOrdering::SeqCst)
    }
}

/// Anything registered in the mvcc manager's future registry that the engine
/// may need to notify out-of-band: a node leaving, or a partition-release
/// sweep. Prepare futures implement this to be resolved on `TopologyLeft`
/// without the coordinator polling membership itself.
pub trait Trackable: Send + Sync {
    fn future_id(&self) -> FutureId;
    fn is_trackable(&self) -> bool {
        true
    }
    fn on_node_left(&self, node: &NodeId);
}

/// `future_id -> future` registry (§5). Futures deregister themselves on
/// completion; this type only holds weak bookkeeping, not the data the future
/// computes.
#[derive(Default)]
pub struct FutureRegistry {
    inner: RwLock<HashMap<FutureId, Arc<dyn Trackable>>>,
}

impl FutureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, future: Arc<dyn Trackable>) {
        if future.is_trackable() {
            self.inner.write().unwrap().insert(future.future_id(), future);
        }
    }

    pub fn deregister(&self, future_id: FutureId) {
        self.inner.write().unwrap().remove(&future_id);
    }

    /// Notifies every trackable future that `node` has left the topology.
    /// Mutually exclusive with a given future also resolving via its own
    /// mini-future completion (I7): whichever fires first wins, the other is
    /// a no-op against an already-completed future.
    pub fn notify_node_left(&self, node: &NodeId) {
        let snapshot: Vec<Arc<dyn Trackable>> = self.inner.read().unwrap().values().cloned().collect();
        for future in snapshot {
            future.on_node_left(node);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::version::Version;

    fn ver(order: u64) -> Version {
        Version { order, node_order: 1, topology: 1, global_time: 0 }
    }

    #[test]
    fn canonical_order_is_stable_across_callers() {
        let mut a = vec![(0u32, b"x".to_vec()), (1, b"y".to_vec()), (0, b"z".to_vec())];
        let mut b = a.clone();
        b.reverse();
        EntryTable::canonical_order(&mut a);
        EntryTable::canonical_order(&mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn gc_deferred_deletes_drops_only_unlocked_tombstones() {
        let table = EntryTable::new();
        table.with_entry(0, b"locked", 0, |e| {
            e.add_local(ver(1), 1, None, false, false, true, 1).unwrap();
            e.apply_write(None, ver(1), None);
        });
        table.with_entry(0, b"free", 0, |e| {
            e.apply_write(None, ver(2), None);
        });
        table.with_entry(0, b"live", 0, |e| {
            e.apply_write(Some(vec![1]), ver(3), None);
        });

        let dropped = table.gc_deferred_deletes();
        assert_eq!(dropped, 1);
        table.peek_entry(0, b"free", 0, |e| assert!(e.is_none()));
        table.peek_entry(0, b"locked", 0, |e| assert!(e.is_some()));
        table.peek_entry(0, b"live", 0, |e| assert!(e.is_some()));
    }

    #[test]
    fn finalization_queue_evicts_oldest_first_over_count_cap() {
        let queue = FinalizationQueue::new(2, usize::MAX);
        queue.push(ver(1), 10);
        queue.push(ver(2), 10);
        queue.push(ver(3), 10);

        let evicted = queue.evict_overflow();
        assert_eq!(evicted, vec![ver(1)]);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn finalization_queue_evicts_over_byte_cap() {
        let queue = FinalizationQueue::new(100, 15);
        queue.push(ver(1), 10);
        queue.push(ver(2), 10);

        let evicted = queue.evict_overflow();
        assert_eq!(evicted, vec![ver(1)]);
        assert!(queue.is_empty() == false);
    }

    #[test]
    fn finalization_queue_remove_untracks_a_transaction() {
        let queue = FinalizationQueue::new(1, usize::MAX);
        queue.push(ver(1), 10);
        queue.remove(&ver(1));
        queue.push(ver(2), 10);
        assert!(queue.evict_overflow().is_empty());
    }
}
