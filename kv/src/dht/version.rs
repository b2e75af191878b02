//! Version vendor (C1): monotone, cluster-unique version stamps.
//!
//! A [`Version`] totally orders every MVCC candidate, write, and transaction xid in
//! the cluster. Ordering is structural: first by `order`, then by `node_order`; the
//! `topology` and `global_time` fields ride along for diagnostics and recovery but
//! never participate in tie-breaking, so two versions from different topologies
//! still compare consistently everywhere they're replicated.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use serde_derive::{Deserialize, Serialize};

/// A totally ordered identifier for an MVCC write or transaction xid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Local monotonic sequence number on the node that minted this version.
    pub order: u64,
    /// Fixed per-process tie-breaker, unique across the cluster.
    pub node_order: u32,
    /// Topology version in effect when this version was minted.
    pub topology: u32,
    /// Wall-clock hint, not used for ordering.
    pub global_time: i64,
}

impl Version {
    pub const ZERO: Version = Version { order: 0, node_order: 0, topology: 0, global_time: 0 };
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.order.cmp(&other.order).then_with(|| self.node_order.cmp(&other.node_order))
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}@{}", self.order, self.node_order, self.topology)
    }
}

/// Vends fresh [`Version`]s for one node. The sequence only ever moves forward,
/// including after observing a remote version with a higher `order` (Lamport-style
/// clock advance).
pub struct VersionVendor {
    node_order: u32,
    sequence: AtomicU64,
}

impl VersionVendor {
    pub fn new(node_order: u32) -> Self {
        Self { node_order, sequence: AtomicU64::new(1) }
    }

    /// Mints a fresh version at the given topology.
    pub fn next(&self, topology: u32) -> Version {
        let order = self.sequence.fetch_add(1, AtomicOrdering::SeqCst);
        Version { order, node_order: self.node_order, topology, global_time: now_millis() }
    }

    /// Bumps the local sequence past a version observed from a remote node, so
    /// that subsequent local versions are never ordered before it.
    pub fn observe(&self, remote: &Version) {
        let mut current = self.sequence.load(AtomicOrdering::SeqCst);
        while remote.order >= current {
            let desired = remote.order + 1;
            match self.sequence.compare_exchange_weak(
                current,
                desired,
                AtomicOrdering::SeqCst,
                AtomicOrdering::SeqCst,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn node_order(&self) -> u32 {
        self.node_order
    }
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_order_by_sequence_then_node() {
        let a = Version { order: 1, node_order: 5, topology: 1, global_time: 0 };
        let b = Version { order: 1, node_order: 7, topology: 1, global_time: 0 };
        assert!(a < b);

        let c = Version { order: 2, node_order: 1, topology: 1, global_time: 0 };
        assert!(b < c);
    }

    #[test]
    fn vendor_sequence_is_monotone() {
        let v = VersionVendor::new(3);
        let a = v.next(1);
        let b = v.next(1);
        assert!(a < b);
    }

    #[test]
    fn vendor_advances_past_observed_remote() {
        let v = VersionVendor::new(1);
        let remote = Version { order: 100, node_order: 9, topology: 1, global_time: 0 };
        v.observe(&remote);
        let local = v.next(1);
        assert!(local.order > remote.order);
    }

    #[test]
    fn topology_does_not_affect_ordering() {
        let low_topo = Version { order: 5, node_order: 1, topology: 1, global_time: 0 };
        let high_topo = Version { order: 4, node_order: 1, topology: 9, global_time: 0 };
        assert!(high_topo < low_topo);
    }
}
