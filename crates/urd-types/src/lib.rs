mod clock;
mod error;
mod wire;

pub use clock::{derive_client_clock, ClockOrdering, VectorClock};
pub use error::UrdError;
pub use wire::{
    ActionResponse, CmPayload, CmResponse, DataTransfer, ErrResponse, KvPayload, KvResponseBody,
    NodeShardIdResponse, ReshardRequest, ReshardUpdate, ShardIdsResponse, ShardKeyCountResponse,
    ShardMembersResponse, SocketAddressBody, ViewInfo,
};

/// `host:port` of a node, or the identity a client clock speaks for.
pub type Address = String;
/// Shard names are `"s0"`, `"s1"`, … — lexically sortable by construction.
pub type ShardName = String;

/// Longest key the store accepts.
pub const MAX_KEY_LEN: usize = 50;
