//! Wire protocol (§6): the message kinds exchanged between the prepare/finish
//! coordinators and their peers. Framing and transport are out of scope for
//! this crate (that's the wire codec/discovery SPI); this module only defines
//! the payloads and the `marshal`/`unmarshal` entry points used to satisfy the
//! round-trip law (L3).

use std::collections::{HashMap, HashSet};

use serde_derive::{Deserialize, Serialize};

use crate::dht::topology::{NodeId, PartitionId};
use crate::dht::transaction::{TxConcurrency, TxIsolation};
use crate::dht::version::Version;
use crate::error::CResult;

pub type FutureId = u64;
pub type MiniId = u32;
pub type CacheId = u32;

/// An entry write as carried on the wire: a key plus either a value (put) or
/// `None` (remove).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEntry {
    pub cache_id: CacheId,
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
}

/// Every message carries these so responses can be correlated back to the
/// coordinator's compound future and its per-peer child (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHeader {
    pub future_id: FutureId,
    pub mini_id: MiniId,
    pub xid: Version,
    pub near_xid: Version,
    pub topology: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearTxPrepareRequest {
    pub header: MessageHeader,
    pub reads: Vec<WireEntry>,
    pub writes: Vec<WireEntry>,
    pub concurrency: TxConcurrency,
    pub isolation: TxIsolation,
    pub one_phase: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearTxPrepareResponse {
    pub header: MessageHeader,
    pub invalid_partitions: HashSet<PartitionId>,
    pub owned_values: HashMap<(CacheId, Vec<u8>), (Version, Option<Vec<u8>>)>,
    pub pending_versions: Vec<Version>,
    pub committed_versions: Vec<Version>,
    pub rolledback_versions: Vec<Version>,
    pub return_value: Option<Vec<u8>>,
    pub filter_failed_keys: Vec<Vec<u8>>,
    pub near_evicted: Vec<Vec<u8>>,
    pub preload_entries: Vec<WireEntry>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhtTxPrepareRequest {
    pub header: MessageHeader,
    pub dht_writes: Vec<WireEntry>,
    pub near_writes: Vec<WireEntry>,
    pub group_lock_key: Option<Vec<u8>>,
    pub participants: Vec<NodeId>,
    pub concurrency: TxConcurrency,
    pub isolation: TxIsolation,
    pub one_phase: bool,
    pub invalidate_near: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhtTxPrepareResponse {
    pub header: MessageHeader,
    pub invalid_partitions: HashSet<PartitionId>,
    pub owned_values: HashMap<(CacheId, Vec<u8>), (Version, Option<Vec<u8>>)>,
    pub near_evicted: Vec<Vec<u8>>,
    pub preload_entries: Vec<WireEntry>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearTxFinishRequest {
    pub header: MessageHeader,
    pub commit: bool,
    pub invalidate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearTxFinishResponse {
    pub header: MessageHeader,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhtTxFinishRequest {
    pub header: MessageHeader,
    pub commit: bool,
    pub writes: Vec<WireEntry>,
    pub sync: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhtTxFinishResponse {
    pub header: MessageHeader,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckPreparedTxRequest {
    pub header: MessageHeader,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CheckPreparedOutcome {
    NotPrepared,
    PreparedOnly,
    PreparedAndCommitted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckPreparedTxResponse {
    pub header: MessageHeader,
    pub outcome: CheckPreparedOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionsSingleRequest {
    pub topology: u32,
    pub node: NodeId,
}

/// The sum of all wire kinds, decoded through a single entry point per the
/// source's adapter-hierarchy recast (§9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TxMessage {
    NearPrepareReq(NearTxPrepareRequest),
    NearPrepareRes(NearTxPrepareResponse),
    DhtPrepareReq(DhtTxPrepareRequest),
    DhtPrepareRes(DhtTxPrepareResponse),
    NearFinishReq(NearTxFinishRequest),
    NearFinishRes(NearTxFinishResponse),
    DhtFinishReq(DhtTxFinishRequest),
    DhtFinishRes(DhtTxFinishResponse),
    CheckPreparedReq(CheckPreparedTxRequest),
    CheckPreparedRes(CheckPreparedTxResponse),
    PartitionsSingle(PartitionsSingleRequest),
}

impl TxMessage {
    pub fn marshal(&self) -> CResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn unmarshal(bytes: &[u8]) -> CResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    pub fn header(&self) -> Option<&MessageHeader> {
        match self {
            TxMessage::NearPrepareReq(m) => Some(&m.header),
            TxMessage::NearPrepareRes(m) => Some(&m.header),
            TxMessage::DhtPrepareReq(m) => Some(&m.header),
            TxMessage::DhtPrepareRes(m) => Some(&m.header),
            TxMessage::NearFinishReq(m) => Some(&m.header),
            TxMessage::NearFinishRes(m) => Some(&m.header),
            TxMessage::DhtFinishReq(m) => Some(&m.header),
            TxMessage::DhtFinishRes(m) => Some(&m.header),
            TxMessage::CheckPreparedReq(m) => Some(&m.header),
            TxMessage::CheckPreparedRes(m) => Some(&m.header),
            TxMessage::PartitionsSingle(_) => None,
        }
    }
}
