//! Coordinator-facing entry point tying C5 and C6 together: runs prepare,
//! and -- when the transaction both requested `one_phase` and turns out to
//! touch exactly one primary -- fuses prepare and commit into a single round
//! trip rather than leaving the caller to issue a separate commit (§4.4.8,
//! §4.5 "one-phase fast path").

use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use crate::dht::engine::Engine;
use crate::dht::prepare::{prepare, PrepareOutcome};
use crate::dht::transaction::Transaction;
use crate::dht::transport::PeerTransport;
use crate::error::CResult;

/// Prepares `tx_handle` and, if it is eligible for the one-phase fast path,
/// commits it immediately. Returns the merged [`PrepareOutcome`] either way;
/// callers of the two-phase path still call [`crate::dht::finish::commit`] or
/// [`crate::dht::finish::rollback`] themselves once they've inspected it.
pub async fn execute(
    engine: &Engine,
    transport: Arc<dyn PeerTransport>,
    tx_handle: Arc<AsyncMutex<Transaction>>,
) -> CResult<PrepareOutcome> {
    let outcome = prepare(engine, transport.clone(), tx_handle.clone()).await?;

    let fuse = {
        let tx = tx_handle.lock().await;
        tx.one_phase && tx.eligible_for_one_phase()
    };
    if fuse {
        crate::dht::finish::commit(engine, transport, tx_handle).await?;
    }
    Ok(outcome)
}
