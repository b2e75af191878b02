//! External collaborator interfaces consumed by the core (§6). These are
//! deliberately thin traits: the wire codec, discovery/membership, store
//! adapter, expiry policy, interceptor, and event bus are out of scope for this
//! crate and are expected to be supplied by the embedding application. Default
//! in-memory/no-op implementations are provided for tests and single-process
//! demos.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_derive::{Deserialize, Serialize};

use crate::dht::version::Version;
use crate::error::CResult;

pub type NodeId = String;
pub type PartitionId = u32;

/// `nodes(partition, topology) -> [node]` and friends (§6).
pub trait TopologyService: Send + Sync {
    /// All owners (primary first, then backups) of `partition` at `topology`.
    fn nodes(&self, partition: PartitionId, topology: u32) -> Vec<NodeId>;

    fn primary(&self, partition: PartitionId, topology: u32) -> Option<NodeId> {
        self.nodes(partition, topology).into_iter().next()
    }

    fn backups(&self, partition: PartitionId, topology: u32) -> Vec<NodeId> {
        self.nodes(partition, topology).into_iter().skip(1).collect()
    }

    fn local_node_id(&self) -> NodeId;

    fn alive(&self, node: &NodeId) -> bool;

    fn current_topology(&self) -> u32;

    /// Maps a key to a partition. A simple modulo hash is sufficient for this
    /// core; production deployments plug in a consistent-hashing affinity
    /// function instead.
    fn partition_for(&self, cache_id: u32, key: &[u8]) -> PartitionId;
}

/// A fixed, static partition map for tests and single-process demos: every
/// partition is owned, in order, by the node list supplied at construction.
pub struct StaticTopology {
    local: NodeId,
    partitions: u32,
    owners: RwLock<HashMap<PartitionId, Vec<NodeId>>>,
    alive: RwLock<std::collections::HashSet<NodeId>>,
    topology: std::sync::atomic::AtomicU32,
}

impl StaticTopology {
    pub fn new(local: NodeId, partitions: u32) -> Self {
        Self {
            local,
            partitions,
            owners: RwLock::new(HashMap::new()),
            alive: RwLock::new(std::collections::HashSet::new()),
            topology: std::sync::atomic::AtomicU32::new(1),
        }
    }

    pub fn set_owners(&self, partition: PartitionId, owners: Vec<NodeId>) {
        for node in &owners {
            self.alive.write().unwrap().insert(node.clone());
        }
        self.owners.write().unwrap().insert(partition, owners);
    }

    pub fn mark_left(&self, node: &NodeId) {
        self.alive.write().unwrap().remove(node);
        self.topology.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn advance_topology(&self) -> u32 {
        self.topology.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1
    }
}

impl TopologyService for StaticTopology {
    fn nodes(&self, partition: PartitionId, _topology: u32) -> Vec<NodeId> {
        self.owners.read().unwrap().get(&partition).cloned().unwrap_or_default()
    }

    fn local_node_id(&self) -> NodeId {
        self.local.clone()
    }

    fn alive(&self, node: &NodeId) -> bool {
        self.alive.read().unwrap().contains(node)
    }

    fn current_topology(&self) -> u32 {
        self.topology.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn partition_for(&self, _cache_id: u32, key: &[u8]) -> PartitionId {
        let mut hash: u32 = 2166136261;
        for b in key {
            hash ^= *b as u32;
            hash = hash.wrapping_mul(16777619);
        }
        hash % self.partitions.max(1)
    }
}

/// `on_node_left(node)` subscription (§6). A trivial observer list for tests;
/// production discovery SPIs plug in a real membership protocol.
#[derive(Default)]
pub struct NodeLeftBus {
    subscribers: RwLock<Vec<NodeId>>,
}

impl NodeLeftBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self, node: &NodeId) {
        self.subscribers.write().unwrap().push(node.clone());
    }

    pub fn history(&self) -> Vec<NodeId> {
        self.subscribers.read().unwrap().clone()
    }
}

/// Persistent store adapter (§6): `load/load_all/put/put_all/delete/delete_all/tx_end`.
/// Out of scope for this crate's core; the trait exists so C5/C6 can call
/// read-through/write-through without depending on a concrete store.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    async fn load(&self, cache_id: u32, key: &[u8]) -> CResult<Option<Vec<u8>>>;
    async fn load_all(&self, cache_id: u32, keys: &[Vec<u8>]) -> CResult<HashMap<Vec<u8>, Vec<u8>>>;
    async fn put(&self, cache_id: u32, key: &[u8], value: Vec<u8>, version: Version) -> CResult<()>;
    async fn put_all(&self, cache_id: u32, entries: HashMap<Vec<u8>, Vec<u8>>) -> CResult<()>;
    async fn delete(&self, cache_id: u32, key: &[u8]) -> CResult<()>;
    async fn delete_all(&self, cache_id: u32, keys: &[Vec<u8>]) -> CResult<()>;
    async fn tx_end(&self, commit: bool) -> CResult<()>;
}

/// No-op store adapter: read-through always misses, write-through is a no-op.
/// Used when no persistent store is configured (pure in-memory cache).
pub struct NoopStore;

#[async_trait]
impl StoreAdapter for NoopStore {
    async fn load(&self, _cache_id: u32, _key: &[u8]) -> CResult<Option<Vec<u8>>> {
        Ok(None)
    }
    async fn load_all(&self, _cache_id: u32, _keys: &[Vec<u8>]) -> CResult<HashMap<Vec<u8>, Vec<u8>>> {
        Ok(HashMap::new())
    }
    async fn put(&self, _cache_id: u32, _key: &[u8], _value: Vec<u8>, _version: Version) -> CResult<()> {
        Ok(())
    }
    async fn put_all(&self, _cache_id: u32, _entries: HashMap<Vec<u8>, Vec<u8>>) -> CResult<()> {
        Ok(())
    }
    async fn delete(&self, _cache_id: u32, _key: &[u8]) -> CResult<()> {
        Ok(())
    }
    async fn delete_all(&self, _cache_id: u32, _keys: &[Vec<u8>]) -> CResult<()> {
        Ok(())
    }
    async fn tx_end(&self, _commit: bool) -> CResult<()> {
        Ok(())
    }
}

/// `duration_for_create/access/update()` (§6).
pub trait ExpiryPolicy: Send + Sync {
    fn duration_for_create(&self) -> Option<std::time::Duration>;
    fn duration_for_access(&self) -> Option<std::time::Duration>;
    fn duration_for_update(&self) -> Option<std::time::Duration>;
}

/// Entries never expire.
pub struct EternalExpiryPolicy;

impl ExpiryPolicy for EternalExpiryPolicy {
    fn duration_for_create(&self) -> Option<std::time::Duration> {
        None
    }
    fn duration_for_access(&self) -> Option<std::time::Duration> {
        None
    }
    fn duration_for_update(&self) -> Option<std::time::Duration> {
        None
    }
}

/// `on_before_put/remove`, `on_after_put/remove` (§6); may veto a write by
/// returning `Ok(false)`.
pub trait Interceptor: Send + Sync {
    fn on_before_put(&self, _key: &[u8], _old: Option<&[u8]>, _new: &[u8]) -> bool {
        true
    }
    fn on_after_put(&self, _key: &[u8], _new: &[u8]) {}
    fn on_before_remove(&self, _key: &[u8], _old: Option<&[u8]>) -> bool {
        true
    }
    fn on_after_remove(&self, _key: &[u8]) {}
}

pub struct NoopInterceptor;
impl Interceptor for NoopInterceptor {}

/// Recordable events (§6): `OBJECT_READ`, `OBJECT_PUT`, ... `TX_ROLLED_BACK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheEvent {
    ObjectRead,
    ObjectPut,
    ObjectRemoved,
    PreloadObjectLoaded,
    TxStarted,
    TxCommitted,
    TxRolledBack,
}

pub trait EventBus: Send + Sync {
    fn record(&self, event: CacheEvent, cache_id: u32, key: &[u8]);
}

#[derive(Default)]
pub struct NoopEventBus;

impl EventBus for NoopEventBus {
    fn record(&self, _event: CacheEvent, _cache_id: u32, _key: &[u8]) {}
}
