//! JSON bodies exchanged with clients and between replicas.
//!
//! Field names are part of the cluster protocol (`causal-metadata`,
//! `socket-address`, `Kv`/`Vc`, …) and must not drift between releases.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::{Address, ShardName, VectorClock};

fn is_false(b: &bool) -> bool {
    !*b
}

// ---------------------------------------------------------------------------
// Key-value operations
// ---------------------------------------------------------------------------

/// Body of `PUT/GET/DELETE /kvs/:key`. GET and DELETE may omit everything.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct KvPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(rename = "causal-metadata", default)]
    pub causal_metadata: VectorClock,
    /// Set on replica-to-replica fan-in so the receiver does not fan out again.
    #[serde(rename = "is-broadcast", default, skip_serializing_if = "is_false")]
    pub is_broadcast: bool,
}

/// Body of every `/kvs/:key` success response.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct KvResponseBody {
    pub result: String,
    #[serde(rename = "causal-metadata")]
    pub causal_metadata: VectorClock,
    #[serde(rename = "shard-id", default, skip_serializing_if = "Option::is_none")]
    pub shard_id: Option<ShardName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

// ---------------------------------------------------------------------------
// Clock-only propagation
// ---------------------------------------------------------------------------

/// Body of `PUT /cm` — a write's metadata pushed to nodes outside its shard.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct CmPayload {
    #[serde(rename = "causal-metadata", default)]
    pub causal_metadata: VectorClock,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CmResponse {
    #[serde(rename = "status-text")]
    pub status_text: String,
}

// ---------------------------------------------------------------------------
// View membership
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SocketAddressBody {
    #[serde(rename = "socket-address")]
    pub address: Address,
    #[serde(rename = "is-broadcast", default, skip_serializing_if = "is_false")]
    pub is_broadcast: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ViewInfo {
    pub view: Vec<Address>,
}

// ---------------------------------------------------------------------------
// Shard management
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ShardIdsResponse {
    #[serde(rename = "shard-ids")]
    pub shard_ids: Vec<ShardName>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NodeShardIdResponse {
    #[serde(rename = "node-shard-id")]
    pub node_shard_id: ShardName,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ShardMembersResponse {
    #[serde(rename = "shard-members")]
    pub shard_members: Vec<Address>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ShardKeyCountResponse {
    #[serde(rename = "shard-key-count")]
    pub shard_key_count: usize,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ReshardRequest {
    #[serde(rename = "shard-count", default)]
    pub shard_count: usize,
}

/// Wholesale state replacement pushed to every node after a reshard.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ReshardUpdate {
    #[serde(rename = "shard-count")]
    pub shard_count: usize,
    #[serde(rename = "node-shard-id")]
    pub node_shard_id: ShardName,
    pub shards: BTreeMap<ShardName, Vec<Address>>,
    /// The slice of the key space owned by the receiving node's new shard.
    /// Absent when that shard holds no keys.
    #[serde(default)]
    pub kv: HashMap<String, Value>,
}

// ---------------------------------------------------------------------------
// State transfer
// ---------------------------------------------------------------------------

/// Body of `GET /data`: a full snapshot for join-sync and reshard aggregation.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct DataTransfer {
    #[serde(rename = "Kv", default)]
    pub kv: HashMap<String, Value>,
    #[serde(rename = "Vc", default)]
    pub vc: VectorClock,
}

// ---------------------------------------------------------------------------
// Generic envelopes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ActionResponse {
    pub result: String,
}

impl ActionResponse {
    pub fn new(result: impl Into<String>) -> Self {
        ActionResponse { result: result.into() }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrResponse {
    pub error: String,
}
