//! Peer transport: sends prepare/finish/check-prepared requests to other
//! cluster nodes and awaits their responses. The wire codec and actual
//! network stack are out of scope for this crate (§1); what's defined here is
//! the seam the prepare/finish/recovery coordinators call through, plus an
//! in-process loopback implementation used by tests and single-process demos
//! to exercise the full multi-node protocol without real sockets.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::dht::messages::{
    CheckPreparedTxRequest, CheckPreparedTxResponse, DhtTxFinishRequest, DhtTxFinishResponse,
    DhtTxPrepareRequest, DhtTxPrepareResponse,
};
use crate::dht::topology::NodeId;
use crate::error::{CResult, Error};

#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn send_dht_prepare(
        &self,
        node: &NodeId,
        req: DhtTxPrepareRequest,
    ) -> CResult<DhtTxPrepareResponse>;

    async fn send_dht_finish(
        &self,
        node: &NodeId,
        req: DhtTxFinishRequest,
    ) -> CResult<DhtTxFinishResponse>;

    async fn send_check_prepared(
        &self,
        node: &NodeId,
        req: CheckPreparedTxRequest,
    ) -> CResult<CheckPreparedTxResponse>;
}

/// A handler a node registers with the loopback cluster so peers can route
/// prepare/finish/check-prepared requests directly to its engine, in-process.
#[async_trait]
pub trait PeerHandler: Send + Sync {
    async fn handle_dht_prepare(&self, req: DhtTxPrepareRequest) -> CResult<DhtTxPrepareResponse>;
    async fn handle_dht_finish(&self, req: DhtTxFinishRequest) -> CResult<DhtTxFinishResponse>;
    async fn handle_check_prepared(
        &self,
        req: CheckPreparedTxRequest,
    ) -> CResult<CheckPreparedTxResponse>;
}

/// Routes messages between in-process node handles. Standing in for the wire
/// codec and discovery SPI in tests: a node "leaves" by deregistering here,
/// at which point any send to it fails with `TopologyLeft`.
#[derive(Default)]
pub struct LoopbackCluster {
    nodes: RwLock<HashMap<NodeId, Arc<dyn PeerHandler>>>,
}

impl LoopbackCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, node: NodeId, handler: Arc<dyn PeerHandler>) {
        self.nodes.write().unwrap().insert(node, handler);
    }

    pub fn unregister(&self, node: &NodeId) {
        self.nodes.write().unwrap().remove(node);
    }

    fn lookup(&self, node: &NodeId) -> CResult<Arc<dyn PeerHandler>> {
        self.nodes
            .read()
            .unwrap()
            .get(node)
            .cloned()
            .ok_or_else(|| Error::TopologyLeft(node.clone()))
    }
}

#[async_trait]
impl PeerTransport for LoopbackCluster {
    async fn send_dht_prepare(
        &self,
        node: &NodeId,
        req: DhtTxPrepareRequest,
    ) -> CResult<DhtTxPrepareResponse> {
        self.lookup(node)?.handle_dht_prepare(req).await
    }

    async fn send_dht_finish(
        &self,
        node: &NodeId,
        req: DhtTxFinishRequest,
    ) -> CResult<DhtTxFinishResponse> {
        self.lookup(node)?.handle_dht_finish(req).await
    }

    async fn send_check_prepared(
        &self,
        node: &NodeId,
        req: CheckPreparedTxRequest,
    ) -> CResult<CheckPreparedTxResponse> {
        self.lookup(node)?.handle_check_prepared(req).await
    }
}
