//! Reader registry (C3): per-entry set of near-cache readers, tracked by the
//! partition's primary for coherence invalidation.

use std::collections::HashMap;
use tokio::sync::Notify;
use std::sync::Arc;

pub type NodeId = String;

/// One near-cache node's most recently observed copy of an entry.
#[derive(Debug, Clone)]
struct Reader {
    /// Monotone per-sender message id; used to drop out-of-order
    /// add/remove messages.
    message_id: u64,
}

/// Tracks which near-cache nodes have cached a primary's entry, so writes can
/// invalidate or evict them for coherence.
///
/// Reader-list membership is copy-on-write under the entry's own monitor (see
/// [`crate::dht::entry::Entry`]); this type carries no locking of its own.
#[derive(Default)]
pub struct ReaderRegistry {
    readers: HashMap<NodeId, Reader>,
}

/// Outcome of `add_reader`.
pub enum AddReaderOutcome {
    /// The node is already a known reader; its message id was current or newer.
    AlreadyPresent,
    /// The node is already a known reader; its message id was bumped.
    Bumped,
    /// The node was newly registered. Callers should snapshot in-flight local
    /// tx candidates and hand back a future gated on their completion so that
    /// subsequent invalidations observe the effects of those transactions.
    Added,
    /// Rejected: self, an affinity owner of the partition, or otherwise
    /// ineligible to be tracked as a reader.
    Rejected,
}

impl ReaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or bumps) `node` as a reader of this entry.
    ///
    /// `is_affinity_owner` should report whether `node` is a primary or backup
    /// owner of this entry's partition at `topology` -- readers and affinity
    /// owners are always disjoint (I3).
    pub fn add_reader(
        &mut self,
        node: &NodeId,
        local_node: &NodeId,
        message_id: u64,
        is_affinity_owner: bool,
    ) -> AddReaderOutcome {
        if node == local_node || is_affinity_owner {
            return AddReaderOutcome::Rejected;
        }

        match self.readers.get_mut(node) {
            Some(existing) => {
                if message_id > existing.message_id {
                    existing.message_id = message_id;
                    AddReaderOutcome::Bumped
                } else {
                    AddReaderOutcome::AlreadyPresent
                }
            }
            None => {
                self.readers.insert(node.clone(), Reader { message_id });
                AddReaderOutcome::Added
            }
        }
    }

    /// Removes `node` as a reader, unless `message_id` is stale (older than
    /// the last id recorded for that node).
    pub fn remove_reader(&mut self, node: &NodeId, message_id: u64) {
        if let Some(existing) = self.readers.get(node) {
            if message_id < existing.message_id {
                return;
            }
        }
        self.readers.remove(node);
    }

    /// Drops readers for nodes no longer alive. `alive` should cheaply report
    /// cluster membership.
    pub fn purge_dead(&mut self, alive: impl Fn(&NodeId) -> bool) {
        self.readers.retain(|node, _| alive(node));
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.readers.contains_key(node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.readers.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.readers.len()
    }
}

/// Completes once the local transactions that were active at the moment a
/// reader was registered have all finished, so the primary can safely begin
/// invalidating that reader.
#[derive(Clone)]
pub struct ReaderReadyFuture {
    inner: Arc<Notify>,
}

impl ReaderReadyFuture {
    pub fn new() -> Self {
        Self { inner: Arc::new(Notify::new()) }
    }

    pub fn notify(&self) {
        self.inner.notify_waiters();
    }

    pub async fn wait(&self) {
        self.inner.notified().await;
    }
}

impl Default for ReaderReadyFuture {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_self_and_affinity_owners() {
        let mut r = ReaderRegistry::new();
        let local = "n1".to_string();
        assert!(matches!(r.add_reader(&local, &local, 1, false), AddReaderOutcome::Rejected));
        assert!(matches!(r.add_reader(&"n2".to_string(), &local, 1, true), AddReaderOutcome::Rejected));
    }

    #[test]
    fn add_then_bump_message_id() {
        let mut r = ReaderRegistry::new();
        let local = "n1".to_string();
        let reader = "n2".to_string();
        assert!(matches!(r.add_reader(&reader, &local, 5, false), AddReaderOutcome::Added));
        assert!(matches!(r.add_reader(&reader, &local, 6, false), AddReaderOutcome::Bumped));
        assert!(matches!(r.add_reader(&reader, &local, 6, false), AddReaderOutcome::AlreadyPresent));
    }

    #[test]
    fn remove_ignores_stale_message_id() {
        let mut r = ReaderRegistry::new();
        let local = "n1".to_string();
        let reader = "n2".to_string();
        r.add_reader(&reader, &local, 10, false);
        r.remove_reader(&reader, 5);
        assert!(r.contains(&reader));
        r.remove_reader(&reader, 10);
        assert!(!r.contains(&reader));
    }
}
