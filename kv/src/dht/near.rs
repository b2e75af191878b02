//! Near-side invalidation (C9): on commit of a write at a primary, each
//! registered reader is either invalidated (forced re-fetch) or evicted
//! (dropped, reported back so the coordinator prunes its near-map).

use crate::dht::reader::ReaderRegistry;
use crate::dht::topology::NodeId;
use crate::dht::version::Version;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NearAction {
    /// Reader stays registered; its cached copy is marked stale at the new
    /// version with no value, forcing a re-fetch on next read.
    Invalidate { node: NodeId, new_version: Version },
    /// Reader is dropped outright; callers report this back via
    /// `near_evicted` so the coordinator can prune its near-map.
    Evict { node: NodeId },
}

/// Decides, for each reader of an entry, whether a commit should invalidate or
/// evict it: a reader that has entered the affinity set at the new topology
/// is now an owner -- it receives the value via DHT replication instead, so
/// reader-list membership must exclude it (I3) and it's evicted; a reader
/// still outside the affinity set is the genuine near-cache client and is
/// invalidated so it re-fetches on next read.
pub fn plan_invalidation(
    readers: &ReaderRegistry,
    new_version: Version,
    still_in_affinity: impl Fn(&NodeId) -> bool,
) -> Vec<NearAction> {
    readers
        .nodes()
        .map(|node| {
            if still_in_affinity(node) {
                NearAction::Evict { node: node.clone() }
            } else {
                NearAction::Invalidate { node: node.clone(), new_version }
            }
        })
        .collect()
}

/// Applies the plan to the registry, removing evicted readers and returning
/// the set of evicted node ids (for the `near_evicted` response field).
pub fn apply(readers: &mut ReaderRegistry, plan: &[NearAction]) -> Vec<NodeId> {
    let mut evicted = Vec::new();
    for action in plan {
        if let NearAction::Evict { node } = action {
            readers.remove_reader(node, u64::MAX);
            evicted.push(node.clone());
        }
    }
    evicted
}
