use std::time::Duration;

use crate::{Address, ShardName};

/// Error taxonomy shared by every crate in the workspace.
///
/// `Transport` and `Timeout` stay inside the cluster layer — they trigger
/// peer eviction or a logged abort and are never surfaced to a client.
#[derive(thiserror::Error, Debug)]
pub enum UrdError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Key is too long")]
    KeyTooLong,
    #[error("PUT request does not specify a value")]
    MissingValue,
    #[error("Can't Delete Self")]
    SelfDelete,
    #[error("Key does not exist")]
    KeyNotFound,
    #[error("Shard ID does not exist")]
    ShardNotFound,
    #[error("View doesn't exist")]
    ViewNotFound,
    #[error("View and Shard don't exist")]
    ViewAndShardNotFound,
    #[error("View has no such replica")]
    ViewHasNoSuchReplica,
    #[error("node is not assigned to a shard")]
    NoShardAssigned,
    #[error("Causal Dependencies not satisfied; try again later")]
    CausalWait,
    #[error("no member of shard {0} could be reached")]
    RoutingUnavailable(ShardName),
    #[error("encoding failure: {0}")]
    Encoding(String),
    #[error("{0}")]
    Internal(String),
    #[error("transport failure talking to {addr}: {reason}")]
    Transport { addr: Address, reason: String },
    #[error("delivery gave up after {0:?}")]
    Timeout(Duration),
    #[error("invalid fan-out method {0}")]
    InvalidMethod(String),
    #[error("{count} shards over {nodes} replicas cannot keep two replicas per shard")]
    FaultTolerance { count: usize, nodes: usize },
}

impl UrdError {
    pub fn encoding(err: impl std::fmt::Display) -> Self {
        UrdError::Encoding(err.to_string())
    }
}
