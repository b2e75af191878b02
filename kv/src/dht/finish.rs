//! C6: the finish coordinator (§4.5). Dispatches commit or rollback to every
//! DHT participant, applies this node's own writes under the version it
//! minted during prepare, runs near invalidation (C9), and tears the
//! transaction record down once every participant has replied (or, for a
//! departed peer, once the topology has moved past it).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;

use crate::dht::engine::{still_in_affinity, Engine};
use crate::dht::messages::{DhtTxFinishRequest, DhtTxFinishResponse, MessageHeader};
use crate::dht::topology::CacheEvent;
use crate::dht::transaction::{Transaction, TxState};
use crate::dht::transport::PeerTransport;
use crate::dht::version::Version;
use crate::error::{CResult, Error};

/// Commits `tx_handle`: applies its own writes, replicates the finish to
/// every DHT participant, and releases every lock this node holds for it. If
/// the tx is already marked rollback-only, defers to [`rollback`] instead
/// (§7 "a marked-rollback tx can only roll back").
pub async fn commit(
    engine: &Engine,
    transport: Arc<dyn PeerTransport>,
    tx_handle: Arc<AsyncMutex<Transaction>>,
) -> CResult<()> {
    let snapshot = {
        let mut tx = tx_handle.lock().await;
        if tx.state == TxState::MarkedRollback {
            drop(tx);
            return rollback(engine, transport, tx_handle).await;
        }
        if tx.state != TxState::Prepared {
            return Err(Error::TxRollback {
                xid: tx.xid.to_string(),
                reason: format!("cannot commit from state {:?}", tx.state),
            });
        }
        tx.transition(TxState::Committing);
        Snapshot::from(&tx)
    };

    apply_and_release_locally(engine, &snapshot, true);

    if !snapshot.dht_map.is_empty() {
        dispatch_finish(engine, transport, &snapshot, true).await?;
    }

    let mut tx = tx_handle.lock().await;
    tx.transition(TxState::Committed);
    engine.events.record(CacheEvent::TxCommitted, 0, b"");
    engine.txs.remove(&snapshot.xid);
    engine.finalization.remove(&snapshot.xid);
    Ok(())
}

/// Rolls `tx_handle` back: releases every lock this node holds for it
/// (without applying the pending writes) and replicates the rollback to
/// every DHT participant so their locks are released too.
pub async fn rollback(
    engine: &Engine,
    transport: Arc<dyn PeerTransport>,
    tx_handle: Arc<AsyncMutex<Transaction>>,
) -> CResult<()> {
    let snapshot = {
        let mut tx = tx_handle.lock().await;
        if tx.state.is_terminal() {
            return Ok(());
        }
        tx.transition(TxState::RollingBack);
        Snapshot::from(&tx)
    };

    apply_and_release_locally(engine, &snapshot, false);

    if !snapshot.dht_map.is_empty() {
        // Rollback is best-effort per participant: a departed peer already
        // lost its locks when it left the topology, so a `TopologyLeft` here
        // is not itself a failure of the rollback.
        let _ = dispatch_finish(engine, transport, &snapshot, false).await;
    }

    let mut tx = tx_handle.lock().await;
    tx.transition(TxState::RolledBack);
    engine.events.record(CacheEvent::TxRolledBack, 0, b"");
    engine.txs.remove(&snapshot.xid);
    engine.finalization.remove(&snapshot.xid);
    Ok(())
}

/// Called by [`crate::dht::engine::Engine::handle_dht_finish`] when a remote
/// coordinator tells this node's replica of `xid` to commit or roll back.
///
/// A remote replica's own `dht_map` is always empty in this crate (primaries
/// don't themselves fan a finish out to their backups -- see DESIGN.md), so
/// this applies the local half of commit/rollback directly rather than going
/// through the coordinator-facing [`commit`]/[`rollback`], which also need a
/// transport to reach further participants.
pub async fn handle_remote_finish(
    engine: &Engine,
    req: DhtTxFinishRequest,
) -> CResult<DhtTxFinishResponse> {
    let xid = req.header.xid;
    let Some(tx_handle) = engine.txs.get(&xid) else {
        // The prepare for this xid never reached this node (or already
        // finished and was reaped); a duplicate/late finish is a no-op.
        return Ok(DhtTxFinishResponse { header: req.header, error: None });
    };

    let mut tx = tx_handle.lock().await;
    if tx.state.is_terminal() {
        return Ok(DhtTxFinishResponse { header: req.header, error: None });
    }
    tx.transition(if req.commit { TxState::Committing } else { TxState::RollingBack });
    let snapshot = Snapshot::from(&tx);
    drop(tx);

    apply_and_release_locally(engine, &snapshot, req.commit);

    let mut tx = tx_handle.lock().await;
    tx.transition(if req.commit { TxState::Committed } else { TxState::RolledBack });
    engine.events.record(
        if req.commit { CacheEvent::TxCommitted } else { CacheEvent::TxRolledBack },
        0,
        b"",
    );
    drop(tx);
    engine.txs.remove(&xid);
    engine.finalization.remove(&xid);

    Ok(DhtTxFinishResponse { header: req.header, error: None })
}

/// The fields of a [`Transaction`] finish needs after releasing the tx lock,
/// so the network round-trip to other participants doesn't hold it.
struct Snapshot {
    xid: Version,
    topology: u32,
    own_values: HashMap<(u32, Vec<u8>), (Version, Option<Vec<u8>>)>,
    dht_map: HashMap<String, crate::dht::transaction::TxMapping>,
    sync_commit: bool,
    sync_rollback: bool,
}

impl Snapshot {
    fn from(tx: &Transaction) -> Self {
        Self {
            xid: tx.xid,
            topology: tx.topology,
            own_values: tx.own_values.clone(),
            dht_map: tx.dht_map.clone(),
            sync_commit: tx.sync_commit,
            sync_rollback: tx.sync_rollback,
        }
    }
}

/// Applies (on commit) or discards (on rollback) this node's own pending
/// writes, invalidates near readers for the keys it owns, and releases the
/// locks it holds for `xid`.
fn apply_and_release_locally(engine: &Engine, snapshot: &Snapshot, commit: bool) {
    for ((cache_id, key), (version, value)) in &snapshot.own_values {
        let partition = engine.topology.partition_for(*cache_id, key);
        engine.entries.with_entry(*cache_id, key, partition, |e| {
            if commit {
                let old = e.value.clone();
                let vetoed = match value {
                    Some(new) => !engine.interceptor.on_before_put(key, old.as_deref(), new),
                    None => !engine.interceptor.on_before_remove(key, old.as_deref()),
                };
                if !vetoed {
                    e.apply_write(value.clone(), *version, None);
                    match value {
                        Some(new) => {
                            engine.interceptor.on_after_put(key, new);
                            engine.events.record(CacheEvent::ObjectPut, *cache_id, key);
                        }
                        None => {
                            engine.interceptor.on_after_remove(key);
                            engine.events.record(CacheEvent::ObjectRemoved, *cache_id, key);
                        }
                    }
                    let plan = crate::dht::near::plan_invalidation(&e.readers, *version, |n| {
                        still_in_affinity(engine, partition, n)
                    });
                    crate::dht::near::apply(&mut e.readers, &plan);
                }
            }
            let _ = e.release(snapshot.xid);
        });
        engine.partition_release.on_candidate_released(snapshot.topology);
    }
    // A commit may have just released the last lock on a deferred-delete
    // tombstone; finalize any that are now safe to drop (§4.5).
    if commit {
        engine.entries.gc_deferred_deletes();
    }
}

/// Fans a [`DhtTxFinishRequest`] out to every DHT participant concurrently
/// and waits for all of them. A participant that rejects a commit outright is
/// reported as [`Error::HeuristicCommit`] (§7): this node has already
/// committed, so the transaction's outcome is no longer uniform across
/// replicas without operator intervention.
async fn dispatch_finish(
    engine: &Engine,
    transport: Arc<dyn PeerTransport>,
    snapshot: &Snapshot,
    commit: bool,
) -> CResult<()> {
    let mut joins = JoinSet::new();
    for (peer, mapping) in snapshot.dht_map.clone() {
        let req = DhtTxFinishRequest {
            header: MessageHeader {
                future_id: engine.future_ids.next(),
                mini_id: 0,
                xid: snapshot.xid,
                near_xid: snapshot.xid,
                topology: snapshot.topology,
            },
            commit,
            writes: mapping.writes,
            sync: if commit { snapshot.sync_commit } else { snapshot.sync_rollback },
        };
        let transport = transport.clone();
        joins.spawn(async move { (peer, transport.send_dht_finish(&peer, req).await) });
    }

    while let Some(joined) = joins.join_next().await {
        let (peer, result) =
            joined.map_err(|e| Error::Internal(format!("finish mini-future panicked: {e}")))?;
        match result {
            Ok(resp) if resp.error.is_none() => {}
            Ok(resp) if commit => {
                return Err(Error::HeuristicCommit {
                    xid: snapshot.xid.to_string(),
                    detail: format!("peer {peer} failed to apply commit: {}", resp.error.unwrap()),
                });
            }
            Ok(_) => {} // rollback failures on a peer are logged by the caller, not fatal here
            Err(Error::TopologyLeft(_)) if commit => {
                // A backup that left mid-commit is no worse off than one that
                // was never rebalanced onto; the surviving replicas are
                // durable and consistent.
            }
            Err(Error::TopologyLeft(_)) => {}
            Err(e) if commit => return Err(e),
            Err(_) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::messages::WireEntry;
    use crate::dht::topology::StaticTopology;
    use crate::dht::transaction::{TxConcurrency, TxIsolation};
    use crate::dht::transport::LoopbackCluster;
    use std::sync::Arc;

    fn single_node_engine(node: &str) -> Arc<Engine> {
        let topology = Arc::new(StaticTopology::new(node.to_string(), 4));
        for p in 0..4 {
            topology.set_owners(p, vec![node.to_string()]);
        }
        Arc::new(Engine::new(1, topology))
    }

    #[tokio::test]
    async fn commit_applies_value_and_releases_lock() {
        let engine = single_node_engine("n1");
        let cluster: Arc<dyn PeerTransport> = Arc::new(LoopbackCluster::new());

        let tx = engine.begin(TxConcurrency::Pessimistic, TxIsolation::RepeatableRead, None);
        tx.lock().await.enlist_write(WireEntry { cache_id: 0, key: b"a".to_vec(), value: Some(vec![9]) });
        crate::dht::prepare::prepare(&engine, cluster.clone(), tx.clone()).await.unwrap();

        commit(&engine, cluster, tx.clone()).await.unwrap();

        let value = engine.get_local(0, b"a").await.unwrap();
        assert_eq!(value, Some(vec![9]));
        assert!(engine.txs.get(&tx.lock().await.xid).is_none());
    }

    #[tokio::test]
    async fn rollback_leaves_entry_unwritten_and_releases_lock() {
        let engine = single_node_engine("n1");
        let cluster: Arc<dyn PeerTransport> = Arc::new(LoopbackCluster::new());

        let tx = engine.begin(TxConcurrency::Pessimistic, TxIsolation::RepeatableRead, None);
        tx.lock().await.enlist_write(WireEntry { cache_id: 0, key: b"a".to_vec(), value: Some(vec![9]) });
        crate::dht::prepare::prepare(&engine, cluster.clone(), tx.clone()).await.unwrap();

        rollback(&engine, cluster.clone(), tx.clone()).await.unwrap();
        assert_eq!(engine.get_local(0, b"a").await.unwrap(), None);

        // The lock was released, so a second transaction can acquire it
        // without waiting.
        let tx2 = engine.begin(TxConcurrency::Pessimistic, TxIsolation::RepeatableRead, Some(Duration::from_millis(50)));
        tx2.lock().await.enlist_write(WireEntry { cache_id: 0, key: b"a".to_vec(), value: Some(vec![1]) });
        crate::dht::prepare::prepare(&engine, cluster, tx2.clone()).await.unwrap();
    }

    fn node_with_owners(id: &str, owners: Vec<String>) -> Arc<Engine> {
        let topology = Arc::new(StaticTopology::new(id.to_string(), 1));
        topology.set_owners(0, owners);
        Arc::new(Engine::new(1, topology))
    }

    /// S1 / I5: committing at the primary must replicate the value to its
    /// backup, not just apply it locally.
    #[tokio::test]
    async fn commit_replicates_value_to_backup() {
        let cluster: Arc<dyn PeerTransport> = Arc::new(LoopbackCluster::new());
        let owners = vec!["n1".to_string(), "n2".to_string()];
        let primary = node_with_owners("n1", owners.clone());
        let backup = node_with_owners("n2", owners);
        cluster.register("n1".to_string(), primary.clone());
        cluster.register("n2".to_string(), backup.clone());

        let tx = primary.begin(TxConcurrency::Pessimistic, TxIsolation::RepeatableRead, None);
        tx.lock().await.enlist_write(WireEntry { cache_id: 0, key: b"k1".to_vec(), value: Some(vec![7]) });
        crate::dht::prepare::prepare(&primary, cluster.clone(), tx.clone()).await.unwrap();
        commit(&primary, cluster, tx.clone()).await.unwrap();

        assert_eq!(primary.get_local(0, b"k1").await.unwrap(), Some(vec![7]));
        assert_eq!(backup.get_local(0, b"k1").await.unwrap(), Some(vec![7]));
    }
}
