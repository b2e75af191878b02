//! Distributed transactional cache core (§1-§9): version vending, per-entry
//! MVCC candidate queues and near-reader tracking, the DHT transaction
//! prepare/finish/recovery protocols, and the partition-release barrier that
//! gates rebalancing on in-flight locks draining.
//!
//! Module layout mirrors the system overview table: [`version`] is C1,
//! [`candidate`] and [`entry`] are C2, [`reader`] and [`near`] are C3/C9,
//! [`transaction`] is C4, [`prepare`]/[`finish`]/[`recovery`] are C5/C6/C7,
//! [`partition_release`] is C8. [`manager`], [`topology`], [`messages`],
//! [`transport`], and [`engine`] are the concurrent maps, SPIs, wire
//! protocol, peer transport, and the node-local engine that tie them
//! together.

pub mod candidate;
pub mod coordinator;
pub mod engine;
pub mod entry;
pub mod finish;
pub mod manager;
pub mod messages;
pub mod near;
pub mod partition_release;
pub mod prepare;
pub mod reader;
pub mod recovery;
pub mod store_adapter;
pub mod topology;
pub mod transaction;
pub mod transport;
pub mod version;

pub use engine::Engine;
pub use transaction::{Transaction, TxConcurrency, TxIsolation, TxState};
pub use version::{Version, VersionVendor};
