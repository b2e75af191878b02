//! The node-local cache engine: owns the entry table, tx table, version
//! vendor, and the collaborator SPIs, and is the `PeerHandler` peers talk to.
//! [`crate::dht::prepare`], [`crate::dht::finish`], and [`crate::dht::recovery`]
//! are free functions over `&Engine` rather than methods on it, so each
//! concern stays in its own module per §4.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;

use crate::dht::manager::{EntryTable, FinalizationQueue, FutureIdVendor, FutureRegistry, TxTable};
use crate::dht::messages::{
    CheckPreparedTxRequest, CheckPreparedTxResponse, DhtTxFinishRequest, DhtTxFinishResponse,
    DhtTxPrepareRequest, DhtTxPrepareResponse,
};
use crate::dht::partition_release::PartitionReleaseTracker;
use crate::dht::topology::{CacheEvent, EventBus, Interceptor, NoopEventBus, NoopInterceptor, NoopStore, StoreAdapter, TopologyService};
use crate::dht::transaction::{Transaction, TxConcurrency, TxIsolation, TxState};
use crate::dht::transport::PeerHandler;
use crate::dht::version::{Version, VersionVendor};
use crate::error::{CResult, Error};

/// Default cap on prepared-but-unfinished transactions tracked by
/// [`Engine::finalization`] (§5).
const DEFAULT_FINALIZATION_MAX_COUNT: usize = 10_000;
/// Default cap, in approximate write-set bytes, on the same queue.
const DEFAULT_FINALIZATION_MAX_BYTES: usize = 64 * 1024 * 1024;

pub struct Engine {
    pub node_id: String,
    pub topology: Arc<dyn TopologyService>,
    pub store: Arc<dyn StoreAdapter>,
    pub interceptor: Arc<dyn Interceptor>,
    pub events: Arc<dyn EventBus>,

    pub versions: VersionVendor,
    pub entries: EntryTable,
    pub txs: TxTable,
    pub futures: FutureRegistry,
    pub future_ids: FutureIdVendor,
    pub partition_release: PartitionReleaseTracker,
    pub finalization: FinalizationQueue,

    pub default_lock_timeout: Option<Duration>,
}

impl Engine {
    pub fn new(node_order: u32, topology: Arc<dyn TopologyService>) -> Self {
        Self {
            node_id: topology.local_node_id(),
            topology,
            store: Arc::new(NoopStore),
            interceptor: Arc::new(NoopInterceptor),
            events: Arc::new(NoopEventBus),
            versions: VersionVendor::new(node_order),
            entries: EntryTable::new(),
            txs: TxTable::new(),
            futures: FutureRegistry::new(),
            future_ids: FutureIdVendor::new(),
            partition_release: PartitionReleaseTracker::new(),
            finalization: FinalizationQueue::new(
                DEFAULT_FINALIZATION_MAX_COUNT,
                DEFAULT_FINALIZATION_MAX_BYTES,
            ),
            default_lock_timeout: Some(Duration::from_secs(5)),
        }
    }

    /// Forces every transaction the finalization queue has evicted for
    /// exceeding its count/byte cap (§5) into `Unknown`: releases whatever
    /// locks this node still holds for it and drops its tx record, without
    /// attempting to contact peers. This is a last-resort memory bound, not
    /// the ordinary finish path -- recovery (C7) is how a well-behaved
    /// orphaned tx is normally resolved.
    pub async fn sweep_orphaned_transactions(&self) -> Vec<Version> {
        let mut finalized = Vec::new();
        for xid in self.finalization.evict_overflow() {
            let Some(tx_handle) = self.txs.get(&xid) else { continue };
            let mut tx = tx_handle.lock().await;
            if tx.state.is_terminal() {
                continue;
            }
            for (cache_id, key) in tx.own_values.keys().cloned().collect::<Vec<_>>() {
                let partition = self.topology.partition_for(cache_id, &key);
                let _ = self.entries.with_entry(cache_id, &key, partition, |e| e.release(xid));
            }
            tx.transition(crate::dht::transaction::TxState::Unknown);
            drop(tx);
            self.txs.remove(&xid);
            finalized.push(xid);
        }
        finalized
    }

    pub fn with_store(mut self, store: Arc<dyn StoreAdapter>) -> Self {
        self.store = store;
        self
    }

    pub fn begin(
        &self,
        concurrency: TxConcurrency,
        isolation: TxIsolation,
        timeout: Option<Duration>,
    ) -> Arc<AsyncMutex<Transaction>> {
        let topology = self.topology.current_topology();
        let xid = self.versions.next(topology);
        let tx = Transaction::new(
            xid,
            self.node_id.clone(),
            self.node_id.clone(),
            thread_id(),
            concurrency,
            isolation,
            timeout,
            topology,
        );
        self.events.record(CacheEvent::TxStarted, 0, b"");
        self.txs.insert_if_absent(tx)
    }

    /// Reads the current local value for `(cache_id, key)`, falling through to
    /// the store adapter on a local miss. Only meaningful when this node is
    /// the partition's primary; distributed reads are a client-API concern
    /// out of this crate's scope (§1).
    pub async fn get_local(&self, cache_id: u32, key: &[u8]) -> CResult<Option<Vec<u8>>> {
        let partition = self.topology.partition_for(cache_id, key);
        let local = self.entries.peek_entry(cache_id, key, partition, |e| {
            e.and_then(|e| if e.deleted { Some(None) } else { e.value.clone().map(Some) })
        });
        if let Some(value) = local {
            self.events.record(CacheEvent::ObjectRead, cache_id, key);
            return Ok(value);
        }
        self.store.load(cache_id, key).await
    }

    pub fn node_order(&self) -> u32 {
        self.versions.node_order()
    }
}

fn thread_id() -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish()
}

/// Adapts `Engine` to the peer-facing RPC surface: these are exactly the
/// handlers a real wire codec would dispatch into after decoding a
/// [`crate::dht::messages::TxMessage`].
#[async_trait]
impl PeerHandler for Engine {
    async fn handle_dht_prepare(&self, req: DhtTxPrepareRequest) -> CResult<DhtTxPrepareResponse> {
        crate::dht::prepare::handle_remote_prepare(self, req).await
    }

    async fn handle_dht_finish(&self, req: DhtTxFinishRequest) -> CResult<DhtTxFinishResponse> {
        crate::dht::finish::handle_remote_finish(self, req).await
    }

    async fn handle_check_prepared(
        &self,
        req: CheckPreparedTxRequest,
    ) -> CResult<CheckPreparedTxResponse> {
        crate::dht::recovery::handle_check_prepared(self, req).await
    }
}

/// Resolves the affected partitions (and their topology-time "still in
/// affinity" test) for a set of keys the local node holds. Shared by prepare
/// and finish when deciding near invalidation vs eviction (C9).
pub(crate) fn still_in_affinity(engine: &Engine, partition: u32, node: &str) -> bool {
    let topology = engine.topology.current_topology();
    engine
        .topology
        .nodes(partition, topology)
        .iter()
        .any(|n| n == node)
}

/// Distinct peers (primary + backups, excluding the local node) that own any
/// of `partitions` at the current topology.
pub(crate) fn peers_for_partitions(engine: &Engine, partitions: &HashSet<u32>) -> Vec<String> {
    let topology = engine.topology.current_topology();
    let mut peers = HashSet::new();
    for p in partitions {
        for node in engine.topology.nodes(*p, topology) {
            if node != engine.node_id {
                peers.insert(node);
            }
        }
    }
    peers.into_iter().collect()
}

pub(crate) fn tx_not_found(xid: &Version) -> Error {
    Error::NotFound(format!("tx {xid}"))
}

pub(crate) fn fail_if_marked_rollback(state: TxState) -> CResult<()> {
    if state == TxState::MarkedRollback {
        return Err(Error::TxRollback {
            xid: String::new(),
            reason: "tx marked rollback-only".to_string(),
        });
    }
    Ok(())
}
