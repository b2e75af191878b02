//! C5: the two-phase prepare coordinator (§4.4).
//!
//! `prepare` runs on the node hosting the transaction's near record. It
//! groups the write set by every owner of each key's partition -- primary
//! and backups alike, so every replica a write is due to land on is
//! enlisted in the transaction from the start (I5) -- locks and validates
//! the keys this node owns directly under any role, and fans the rest out
//! to their owners as [`DhtTxPrepareRequest`] mini-futures via
//! [`PeerTransport`]. A peer receiving one of those requests runs the exact
//! same lock-and-validate pass locally (`handle_remote_prepare`), so
//! [`lock_and_validate`] backs both paths -- there is only one
//! implementation of "acquire and check a write set", never a local one and
//! a separate remote one.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;

use crate::dht::engine::{still_in_affinity, Engine};
use crate::dht::manager::EntryTable;
use crate::dht::messages::{DhtTxPrepareRequest, DhtTxPrepareResponse, MessageHeader, WireEntry};
use crate::dht::topology::NodeId;
use crate::dht::transaction::{Transaction, TxConcurrency, TxIsolation, TxMapping, TxState};
use crate::dht::transport::PeerTransport;
use crate::dht::version::Version;
use crate::error::{CResult, Error};

/// What a lock-and-validate pass (local or remote) hands back to its caller:
/// the write version and prior value assigned to each key it locked, plus any
/// partitions it no longer owns at the tx's topology.
#[derive(Debug, Default, Clone)]
pub struct PrepareOutcome {
    pub owned_values: HashMap<(u32, Vec<u8>), (Version, Option<Vec<u8>>)>,
    pub invalid_partitions: HashSet<u32>,
}

fn merge_outcome(into: &mut PrepareOutcome, other: PrepareOutcome) {
    into.owned_values.extend(other.owned_values);
    into.invalid_partitions.extend(other.invalid_partitions);
}

/// Runs the coordinator side of prepare for `tx_handle`: locks and validates
/// whatever part of the write set this node owns, dispatches the rest to
/// their primaries, and merges everything into one [`PrepareOutcome`].
pub async fn prepare(
    engine: &Engine,
    transport: Arc<dyn PeerTransport>,
    tx_handle: Arc<AsyncMutex<Transaction>>,
) -> CResult<PrepareOutcome> {
    let (xid, thread, timeout, topology, concurrency, isolation, writes) = {
        let mut tx = tx_handle.lock().await;
        if tx.is_marked_rollback() {
            return Err(Error::TxRollback {
                xid: tx.xid.to_string(),
                reason: "tx marked rollback-only before prepare".to_string(),
            });
        }
        if !tx.transition(TxState::Preparing) {
            return Err(Error::TxRollback {
                xid: tx.xid.to_string(),
                reason: "tx already finished".to_string(),
            });
        }
        (
            tx.xid,
            tx.thread_id,
            tx.timeout.or(engine.default_lock_timeout),
            tx.topology,
            tx.concurrency,
            tx.isolation,
            tx.write_entries.clone(),
        )
    };

    // Map every write to every owner of its partition -- primary AND
    // backups (§4.4 "map keys to peers"; I5 requires every backup of every
    // write-key eventually receive T's value at T's write-version, so
    // backups must be enlisted here, not only primaries). The subset this
    // node itself owns, under whichever role, is handled without a network
    // hop; everything else becomes one mini-future per peer.
    let mut by_owner: HashMap<NodeId, Vec<WireEntry>> = HashMap::new();
    let mut partitions_by_owner: HashMap<NodeId, HashSet<u32>> = HashMap::new();
    for w in &writes {
        let partition = engine.topology.partition_for(w.cache_id, &w.key);
        let owners = engine.topology.nodes(partition, topology);
        if owners.is_empty() {
            return Err(Error::TopologyLeft(format!("no owners for partition {partition}")));
        }
        for owner in owners {
            by_owner.entry(owner.clone()).or_default().push(w.clone());
            partitions_by_owner.entry(owner).or_default().insert(partition);
        }
    }
    let local_writes = by_owner.remove(&engine.node_id).unwrap_or_default();
    partitions_by_owner.remove(&engine.node_id);

    let mut outcome = PrepareOutcome::default();
    let mut failure: Option<Error> = None;
    let mut local_acquired: Vec<(u32, Vec<u8>)> = Vec::new();
    let mut own_values: HashMap<(u32, Vec<u8>), (Version, Option<Vec<u8>>)> = HashMap::new();

    if !local_writes.is_empty() {
        match lock_and_validate(engine, xid, thread, timeout, topology, concurrency, &local_writes).await {
            Ok((local, acquired)) => {
                local_acquired = acquired;
                own_values = local.owned_values.clone();
                merge_outcome(&mut outcome, local);
            }
            Err(e) => failure = Some(e),
        }
    }

    let mut dht_map: HashMap<NodeId, TxMapping> = HashMap::new();
    if failure.is_none() && !by_owner.is_empty() {
        let mut joins = JoinSet::new();
        for (peer, peer_writes) in by_owner {
            let mut mapping = TxMapping::new(peer.clone());
            mapping.writes = peer_writes.clone();
            dht_map.insert(peer.clone(), mapping);

            let participants = partitions_by_owner
                .get(&peer)
                .into_iter()
                .flatten()
                .flat_map(|p| engine.topology.nodes(*p, topology))
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            let req = DhtTxPrepareRequest {
                header: MessageHeader {
                    future_id: engine.future_ids.next(),
                    mini_id: 0,
                    xid,
                    near_xid: xid,
                    topology,
                },
                dht_writes: peer_writes,
                near_writes: Vec::new(),
                group_lock_key: None,
                participants,
                concurrency,
                isolation,
                one_phase: false,
                invalidate_near: false,
            };
            let transport = transport.clone();
            joins.spawn(async move {
                let result = transport.send_dht_prepare(&peer, req).await;
                (peer, result)
            });
        }

        while let Some(joined) = joins.join_next().await {
            let (peer, result) = joined
                .map_err(|e| Error::Internal(format!("prepare mini-future for {e} panicked")))?;
            match result {
                Ok(resp) if resp.error.is_none() => {
                    outcome.invalid_partitions.extend(resp.invalid_partitions);
                    outcome.owned_values.extend(resp.owned_values);
                }
                Ok(resp) => {
                    failure = Some(Error::TxRollback {
                        xid: xid.to_string(),
                        reason: format!("peer {peer} rejected prepare: {}", resp.error.unwrap()),
                    });
                }
                Err(Error::TopologyLeft(node)) => {
                    // The peer is gone; its partitions are stale at this
                    // topology and the client should retry at the next one
                    // rather than this mini-future blocking the tx forever
                    // (§7 TopologyLeft, §5 node-left wakes pending futures).
                    outcome.invalid_partitions.extend(
                        partitions_by_owner.get(&peer).cloned().unwrap_or_default(),
                    );
                    failure = Some(Error::TopologyLeft(node));
                }
                Err(e) => failure = Some(e),
            }
        }
    }

    if let Some(err) = failure {
        release_all(engine, &local_acquired, xid, topology);
        let mut tx = tx_handle.lock().await;
        tx.set_rollback_only();
        return Err(err);
    }

    let approx_bytes = approx_write_set_bytes(&own_values);
    let mut tx = tx_handle.lock().await;
    tx.dht_map = dht_map;
    tx.own_values = own_values;
    tx.invalid_partitions = outcome.invalid_partitions.clone();
    tx.transition(TxState::Prepared);
    engine.finalization.push(xid, approx_bytes);
    Ok(outcome)
}

/// Called by [`crate::dht::engine::Engine::handle_dht_prepare`] when this node
/// is a primary (or backup) receiving a prepare request from a remote
/// coordinator: locks and validates its slice of the write set under its own
/// replica of the transaction, identified by `xid` equality alone (§4.9).
pub async fn handle_remote_prepare(
    engine: &Engine,
    req: DhtTxPrepareRequest,
) -> CResult<DhtTxPrepareResponse> {
    engine.versions.observe(&req.header.xid);
    let xid = req.header.xid;
    let topology = req.header.topology;

    let tx_handle = engine.txs.insert_if_absent(Transaction::new(
        xid,
        req.header.near_xid.to_string(),
        req.header.near_xid.to_string(),
        thread_for(xid),
        req.concurrency,
        req.isolation,
        engine.default_lock_timeout,
        topology,
    ));
    {
        let mut tx = tx_handle.lock().await;
        tx.write_entries = req.dht_writes.clone();
        tx.transition(TxState::Preparing);
    }

    let result = lock_and_validate(
        engine,
        xid,
        thread_for(xid),
        engine.default_lock_timeout,
        topology,
        req.concurrency,
        &req.dht_writes,
    )
    .await;

    let mut tx = tx_handle.lock().await;
    match result {
        Ok((outcome, _acquired)) => {
            tx.own_values = outcome.owned_values.clone();
            tx.transition(TxState::Prepared);
            engine.finalization.push(xid, approx_write_set_bytes(&tx.own_values));
            Ok(DhtTxPrepareResponse {
                header: req.header,
                invalid_partitions: outcome.invalid_partitions,
                owned_values: outcome.owned_values,
                near_evicted: Vec::new(),
                preload_entries: Vec::new(),
                error: None,
            })
        }
        Err(e) => {
            tx.set_rollback_only();
            Ok(DhtTxPrepareResponse {
                header: req.header,
                invalid_partitions: HashSet::new(),
                owned_values: HashMap::new(),
                near_evicted: Vec::new(),
                preload_entries: Vec::new(),
                error: Some(e.to_string()),
            })
        }
    }
}

/// Locks every key in `writes` (canonical order, §5 deadlock avoidance),
/// checking for an optimistic conflict as each lock is granted, and mints the
/// write version for the keys this pass owns. On any failure, every lock this
/// call acquired is released before returning the error.
async fn lock_and_validate(
    engine: &Engine,
    xid: Version,
    thread: u64,
    timeout: Option<Duration>,
    topology: u32,
    concurrency: TxConcurrency,
    writes: &[WireEntry],
) -> CResult<(PrepareOutcome, Vec<(u32, Vec<u8>)>)> {
    let mut keys: Vec<(u32, Vec<u8>)> = writes.iter().map(|w| (w.cache_id, w.key.clone())).collect();
    EntryTable::canonical_order(&mut keys);

    let write_version = engine.versions.next(topology);
    let mut acquired: Vec<(u32, Vec<u8>)> = Vec::new();
    let mut outcome = PrepareOutcome::default();

    for (cache_id, key) in &keys {
        let partition = engine.topology.partition_for(*cache_id, key);

        if !still_in_affinity(engine, partition, &engine.node_id) {
            outcome.invalid_partitions.insert(partition);
            continue;
        }

        if let Err(e) = acquire_one(engine, *cache_id, key, xid, thread, timeout, topology).await {
            release_all(engine, &acquired, xid, topology);
            return Err(e);
        }
        acquired.push((*cache_id, key.clone()));

        let conflicts = engine.entries.with_entry(*cache_id, key, partition, |e| {
            matches!(
                (concurrency, e.value_version),
                (TxConcurrency::Optimistic, Some(seen)) if seen > xid
            )
        });
        if conflicts {
            release_all(engine, &acquired, xid, topology);
            return Err(Error::OptimisticConflict { key: hex_key(key) });
        }

        let value = writes
            .iter()
            .find(|w| w.cache_id == *cache_id && &w.key == key)
            .and_then(|w| w.value.clone());
        outcome.owned_values.insert((*cache_id, key.clone()), (write_version, value));
    }

    Ok((outcome, acquired))
}

/// Registers a local lock candidate for `(cache_id, key)` and waits (bounded
/// by `timeout`) until it becomes the entry's owner.
async fn acquire_one(
    engine: &Engine,
    cache_id: u32,
    key: &[u8],
    xid: Version,
    thread: u64,
    timeout: Option<Duration>,
    topology: u32,
) -> CResult<()> {
    let partition = engine.topology.partition_for(cache_id, key);
    let deadline = timeout.map(|d| Instant::now() + d);

    engine.partition_release.on_candidate_added(topology);
    engine
        .entries
        .with_entry(cache_id, key, partition, |e| e.add_local(xid, thread, timeout, false, false, true, topology))?;

    loop {
        let owner = engine.entries.with_entry(cache_id, key, partition, |e| e.ready(xid))?;
        if owner.map(|c| c.version) == Some(xid) {
            return Ok(());
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                engine.entries.with_entry(cache_id, key, partition, |e| e.cancel_timed_out(xid)).ok();
                engine.partition_release.on_candidate_released(topology);
                return Err(Error::LockTimeout {
                    key: hex_key(key),
                    timeout_ms: timeout.unwrap_or_default().as_millis() as u64,
                });
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn release_all(engine: &Engine, acquired: &[(u32, Vec<u8>)], xid: Version, topology: u32) {
    for (cache_id, key) in acquired {
        let partition = engine.topology.partition_for(*cache_id, key);
        let _ = engine.entries.with_entry(*cache_id, key, partition, |e| e.release(xid));
        engine.partition_release.on_candidate_released(topology);
    }
}

fn thread_for(xid: Version) -> u64 {
    xid.order
}

/// Rough memory footprint of a prepared write-set, for the finalization
/// queue's byte cap (§5) -- key bytes plus value bytes, no attempt at exact
/// struct overhead.
fn approx_write_set_bytes(owned_values: &HashMap<(u32, Vec<u8>), (Version, Option<Vec<u8>>)>) -> usize {
    owned_values
        .iter()
        .map(|((_, key), (_, value))| key.len() + value.as_ref().map_or(0, Vec::len))
        .sum()
}

fn hex_key(key: &[u8]) -> String {
    key.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::topology::StaticTopology;
    use crate::dht::transaction::TxIsolation;
    use crate::dht::transport::LoopbackCluster;
    use std::sync::Arc;

    fn single_node_engine(node: &str) -> (Arc<Engine>, Arc<StaticTopology>) {
        let topology = Arc::new(StaticTopology::new(node.to_string(), 4));
        for p in 0..4 {
            topology.set_owners(p, vec![node.to_string()]);
        }
        let engine = Arc::new(Engine::new(1, topology.clone()));
        (engine, topology)
    }

    #[tokio::test]
    async fn single_node_prepare_locks_and_assigns_versions() {
        let (engine, _topology) = single_node_engine("n1");
        let cluster: Arc<dyn PeerTransport> = Arc::new(LoopbackCluster::new());

        let tx = engine.begin(TxConcurrency::Pessimistic, TxIsolation::RepeatableRead, None);
        {
            let mut guard = tx.lock().await;
            guard.enlist_write(WireEntry { cache_id: 0, key: b"a".to_vec(), value: Some(vec![1]) });
        }

        let outcome = prepare(&engine, cluster, tx.clone()).await.unwrap();
        assert_eq!(outcome.owned_values.len(), 1);
        assert!(outcome.invalid_partitions.is_empty());
        assert_eq!(tx.lock().await.state, TxState::Prepared);
    }

    #[tokio::test]
    async fn second_writer_blocks_until_first_releases() {
        let (engine, _topology) = single_node_engine("n1");
        let cluster: Arc<dyn PeerTransport> = Arc::new(LoopbackCluster::new());

        let tx1 = engine.begin(TxConcurrency::Pessimistic, TxIsolation::RepeatableRead, None);
        tx1.lock().await.enlist_write(WireEntry { cache_id: 0, key: b"a".to_vec(), value: Some(vec![1]) });
        let outcome1 = prepare(&engine, cluster.clone(), tx1.clone()).await.unwrap();
        assert!(!outcome1.owned_values.is_empty());

        let tx2 = engine.begin(TxConcurrency::Pessimistic, TxIsolation::RepeatableRead, Some(Duration::from_millis(40)));
        tx2.lock().await.enlist_write(WireEntry { cache_id: 0, key: b"a".to_vec(), value: Some(vec![2]) });

        let err = prepare(&engine, cluster, tx2.clone()).await.unwrap_err();
        assert!(matches!(err, Error::LockTimeout { .. }));
    }

    fn node_with_owners(id: &str, owners: Vec<String>) -> Arc<Engine> {
        let topology = Arc::new(StaticTopology::new(id.to_string(), 1));
        topology.set_owners(0, owners);
        Arc::new(Engine::new(1, topology))
    }

    /// I5: a write's partition has a primary and a backup; prepare must
    /// enlist both, not only the primary (S1).
    #[tokio::test]
    async fn prepare_enlists_both_primary_and_backup() {
        let cluster: Arc<dyn PeerTransport> = Arc::new(LoopbackCluster::new());
        let owners = vec!["n1".to_string(), "n2".to_string()];
        let primary = node_with_owners("n1", owners.clone());
        let backup = node_with_owners("n2", owners);
        cluster.register("n1".to_string(), primary.clone());
        cluster.register("n2".to_string(), backup.clone());

        let tx = primary.begin(TxConcurrency::Pessimistic, TxIsolation::RepeatableRead, None);
        tx.lock().await.enlist_write(WireEntry { cache_id: 0, key: b"k1".to_vec(), value: Some(vec![7]) });
        prepare(&primary, cluster, tx.clone()).await.unwrap();

        let guard = tx.lock().await;
        assert!(guard.dht_map.contains_key("n2"), "backup must be enlisted in dht_map, not just the primary");
        assert!(!guard.dht_map.contains_key("n1"), "the coordinator's own node shouldn't be in its own dht_map");
    }
}
