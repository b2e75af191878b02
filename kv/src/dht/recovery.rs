//! C7: the check-prepared recovery protocol (§4.7).
//!
//! If the transaction's near node dies between prepare completing and finish
//! being dispatched, every surviving participant is left holding locks with
//! no coordinator to resolve them. A recovering node (any other participant,
//! or an operator-driven sweep) asks every other participant whether it has
//! the tx prepared or committed, and applies the presumed-commit rule: if
//! *any* participant already committed, the whole transaction commits
//! everywhere; otherwise it's safe to roll back.

use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;

use crate::dht::engine::Engine;
use crate::dht::messages::{CheckPreparedOutcome, CheckPreparedTxRequest, CheckPreparedTxResponse, MessageHeader};
use crate::dht::topology::NodeId;
use crate::dht::transaction::{Transaction, TxState};
use crate::dht::transport::PeerTransport;
use crate::dht::version::Version;
use crate::error::CResult;

/// Answers a peer's check-prepared query about this node's replica of `xid`
/// (§4.7). Does not mutate the transaction: recovery only reads state here,
/// the actual commit/rollback is driven separately once the caller has
/// aggregated every participant's answer.
pub async fn handle_check_prepared(
    engine: &Engine,
    req: CheckPreparedTxRequest,
) -> CResult<CheckPreparedTxResponse> {
    let outcome = match engine.txs.get(&req.header.xid) {
        None => CheckPreparedOutcome::NotPrepared,
        Some(tx_handle) => {
            let tx = tx_handle.lock().await;
            match tx.state {
                TxState::Committed => CheckPreparedOutcome::PreparedAndCommitted,
                TxState::Prepared | TxState::Committing => CheckPreparedOutcome::PreparedOnly,
                _ => CheckPreparedOutcome::NotPrepared,
            }
        }
    };
    Ok(CheckPreparedTxResponse { header: req.header, outcome })
}

/// Queries every participant in `participants` and applies the
/// presumed-commit rule (§4.7): any `PreparedAndCommitted` answer makes the
/// aggregate outcome `PreparedAndCommitted`; otherwise, any `PreparedOnly`
/// answer makes it `PreparedOnly` (still ambiguous -- retry later); only when
/// every participant answers `NotPrepared` is it safe to roll the
/// transaction back everywhere.
pub async fn recover(
    engine: &Engine,
    transport: Arc<dyn PeerTransport>,
    xid: Version,
    topology: u32,
    participants: Vec<NodeId>,
) -> CResult<CheckPreparedOutcome> {
    let mut joins = JoinSet::new();
    for peer in participants {
        if peer == engine.node_id {
            continue;
        }
        let req = CheckPreparedTxRequest {
            header: MessageHeader { future_id: engine.future_ids.next(), mini_id: 0, xid, near_xid: xid, topology },
        };
        let transport = transport.clone();
        joins.spawn(async move { transport.send_check_prepared(&peer, req).await });
    }

    let mut any_committed = false;
    let mut any_prepared = false;
    while let Some(joined) = joins.join_next().await {
        if let Ok(Ok(resp)) = joined {
            match resp.outcome {
                CheckPreparedOutcome::PreparedAndCommitted => any_committed = true,
                CheckPreparedOutcome::PreparedOnly => any_prepared = true,
                CheckPreparedOutcome::NotPrepared => {}
            }
        }
        // A peer that's unreachable or errored contributes nothing; recovery
        // proceeds on whatever answers did arrive, matching the bounded
        // nature of the recovery sweep (§5).
    }

    Ok(if any_committed {
        CheckPreparedOutcome::PreparedAndCommitted
    } else if any_prepared {
        CheckPreparedOutcome::PreparedOnly
    } else {
        CheckPreparedOutcome::NotPrepared
    })
}

/// Drives the local tx replica (if this node still holds one) to the
/// decision `recover` reached: commits on `PreparedAndCommitted`, rolls back
/// on `NotPrepared`, and does nothing (the caller should retry later) on the
/// still-ambiguous `PreparedOnly`.
pub async fn recover_and_finish(
    engine: &Engine,
    transport: Arc<dyn PeerTransport>,
    tx_handle: Arc<AsyncMutex<Transaction>>,
    outcome: CheckPreparedOutcome,
) -> CResult<()> {
    match outcome {
        CheckPreparedOutcome::PreparedAndCommitted => {
            crate::dht::finish::commit(engine, transport, tx_handle).await
        }
        CheckPreparedOutcome::NotPrepared => {
            crate::dht::finish::rollback(engine, transport, tx_handle).await
        }
        CheckPreparedOutcome::PreparedOnly => Ok(()),
    }
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
    async fn reports_not_prepared_for_unknown_xid() {
        let engine = single_node_engine("n1");
        let bogus = Version { order: 9999, node_order: 1, topology: 1, global_time: 0 };
        let resp = handle_check_prepared(
            &engine,
            CheckPreparedTxRequest {
                header: MessageHeader { future_id: 1, mini_id: 0, xid: bogus, near_xid: bogus, topology: 1 },
            },
        )
        .await
        .unwrap();
        assert_eq!(resp.outcome, CheckPreparedOutcome::NotPrepared);
    }

    #[tokio::test]
    async fn reports_prepared_only_after_prepare_before_finish() {
        let engine = single_node_engine("n1");
        let cluster: Arc<dyn PeerTransport> = Arc::new(LoopbackCluster::new());

        let tx = engine.begin(TxConcurrency::Pessimistic, TxIsolation::RepeatableRead, None);
        let xid = tx.lock().await.xid;
        tx.lock().await.enlist_write(WireEntry { cache_id: 0, key: b"a".to_vec(), value: Some(vec![1]) });
        crate::dht::prepare::prepare(&engine, cluster, tx).await.unwrap();

        let resp = handle_check_prepared(
            &engine,
            CheckPreparedTxRequest {
                header: MessageHeader { future_id: 1, mini_id: 0, xid, near_xid: xid, topology: 1 },
            },
        )
        .await
        .unwrap();
        assert_eq!(resp.outcome, CheckPreparedOutcome::PreparedOnly);
    }
}
