//! Transaction record (C4): write-set, read-set, per-peer mappings, and the
//! state machine of §4.9.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde_derive::{Deserialize, Serialize};

use crate::dht::messages::WireEntry;
use crate::dht::topology::NodeId;
use crate::dht::version::Version;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxConcurrency {
    Optimistic,
    Pessimistic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxIsolation {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// §4.9 state machine. `Active` is the only non-terminal state reachable from
/// a fresh transaction; every other state is reached by `prepare`/`commit`/
/// `rollback`/`set_rollback_only`/coordinator loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxState {
    Active,
    Preparing,
    Prepared,
    Committing,
    Committed,
    RollingBack,
    RolledBack,
    MarkedRollback,
    Unknown,
}

impl TxState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TxState::Committed | TxState::RolledBack | TxState::Unknown)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Finalization {
    None,
    UserFinish,
    RecoveryFinish,
    InvalidateFinish,
}

/// Grouping of a transaction's entries by the peer they belong to -- used for
/// both the DHT mapping (replicate to backups) and the Near mapping
/// (invalidate readers).
#[derive(Debug, Clone, Default)]
pub struct TxMapping {
    pub node: NodeId,
    pub entries: Vec<WireEntry>,
    pub reads: Vec<WireEntry>,
    pub writes: Vec<WireEntry>,
}

impl TxMapping {
    pub fn new(node: NodeId) -> Self {
        Self { node, entries: Vec::new(), reads: Vec::new(), writes: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.reads.is_empty() && self.writes.is_empty()
    }
}

/// A transaction record. Owned exclusively by the local tx manager; remote
/// replicas on peers are distinct `Transaction` values linked only by `xid`
/// equality (never by shared memory).
pub struct Transaction {
    pub xid: Version,
    pub near_xid: Version,
    pub near_node_id: NodeId,
    pub coordinator_node: NodeId,
    pub thread_id: u64,

    pub concurrency: TxConcurrency,
    pub isolation: TxIsolation,
    pub timeout: Option<Duration>,
    pub topology: u32,

    pub state: TxState,

    pub write_entries: Vec<WireEntry>,
    pub read_entries: Vec<WireEntry>,

    /// The subset of `write_entries` this replica itself locked during
    /// prepare, with the version (and prior value) it assigned each -- used
    /// by finish (C6) to apply writes under the version this node minted.
    pub own_values: HashMap<(u32, Vec<u8>), (Version, Option<Vec<u8>>)>,

    pub dht_map: HashMap<NodeId, TxMapping>,
    pub near_map: HashMap<NodeId, TxMapping>,

    pub one_phase: bool,
    pub sync_commit: bool,
    pub sync_rollback: bool,
    pub invalidate: bool,
    pub system_invalidate: bool,

    pub finalization: Finalization,

    /// Keys whose prepare-time filter/entry-processor check failed on a peer.
    pub filter_failed_keys: HashSet<Vec<u8>>,

    /// Partitions a peer reported invalid during prepare (it's no longer an
    /// owner at the tx's topology); the client should retry at a newer one.
    pub invalid_partitions: HashSet<u32>,
}

impl Transaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        xid: Version,
        near_node_id: NodeId,
        coordinator_node: NodeId,
        thread_id: u64,
        concurrency: TxConcurrency,
        isolation: TxIsolation,
        timeout: Option<Duration>,
        topology: u32,
    ) -> Self {
        Self {
            xid,
            near_xid: xid,
            near_node_id,
            coordinator_node,
            thread_id,
            concurrency,
            isolation,
            timeout,
            topology,
            state: TxState::Active,
            write_entries: Vec::new(),
            read_entries: Vec::new(),
            own_values: HashMap::new(),
            dht_map: HashMap::new(),
            near_map: HashMap::new(),
            one_phase: false,
            sync_commit: true,
            sync_rollback: true,
            invalidate: false,
            system_invalidate: false,
            finalization: Finalization::None,
            filter_failed_keys: HashSet::new(),
            invalid_partitions: HashSet::new(),
        }
    }

    pub fn enlist_write(&mut self, entry: WireEntry) {
        self.write_entries.push(entry);
    }

    pub fn enlist_read(&mut self, entry: WireEntry) {
        self.read_entries.push(entry);
    }

    /// A tx in `MarkedRollback` ignores further writes (§7): commit attempts
    /// transition directly to rollback instead.
    pub fn is_marked_rollback(&self) -> bool {
        self.state == TxState::MarkedRollback
    }

    pub fn set_rollback_only(&mut self) {
        if !self.state.is_terminal() {
            self.state = TxState::MarkedRollback;
        }
    }

    pub fn transition(&mut self, next: TxState) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = next;
        true
    }

    /// True when every write in this tx lands on a single primary with no
    /// other DHT participants -- the precondition for the one-phase fast
    /// path (§4.5).
    pub fn eligible_for_one_phase(&self) -> bool {
        self.dht_map.len() == 1 && self.near_map.values().all(TxMapping::is_empty)
    }
}
