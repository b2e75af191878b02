//! Partition-release barrier (C8): gates topology changes on in-flight locks.
//!
//! `partition_release(T)` completes once no MVCC candidate with topology `< T`
//! remains anywhere in the entry table. The rebalancer calls this before
//! swapping partition ownership to a new topology version.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;

/// Tracks, per topology version, how many live MVCC candidates were minted at
/// that version. `partition_release(T)` sums the buckets below `T`.
pub struct PartitionReleaseTracker {
    live_by_topology: Mutex<BTreeMap<u32, i64>>,
    notify: Notify,
}

impl PartitionReleaseTracker {
    pub fn new() -> Self {
        Self { live_by_topology: Mutex::new(BTreeMap::new()), notify: Notify::new() }
    }

    pub fn on_candidate_added(&self, topology: u32) {
        let mut live = self.live_by_topology.lock().unwrap();
        *live.entry(topology).or_insert(0) += 1;
    }

    pub fn on_candidate_released(&self, topology: u32) {
        let mut live = self.live_by_topology.lock().unwrap();
        if let std::collections::btree_map::Entry::Occupied(mut e) = live.entry(topology) {
            *e.get_mut() -= 1;
            if *e.get() <= 0 {
                e.remove();
            }
        }
        drop(live);
        self.notify.notify_waiters();
    }

    pub fn count_below(&self, target_topology: u32) -> i64 {
        self.live_by_topology.lock().unwrap().range(..target_topology).map(|(_, c)| *c).sum()
    }

    /// Completes immediately if no candidate with topology `< target_topology`
    /// is currently live (I6); otherwise waits for releases to drain it to
    /// zero. The future is registered (via the condition re-check inside the
    /// loop) before each wait, so a release racing the initial check is never
    /// lost: worst case it's observed on the next bounded poll tick instead of
    /// via the `Notify` wakeup.
    pub async fn partition_release(&self, target_topology: u32) {
        loop {
            if self.count_below(target_topology) == 0 {
                return;
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(20)) => {}
            }
        }
    }
}

impl Default for PartitionReleaseTracker {
    fn default() -> Self {
        Self::new()
    }
}
