mod broadcast;
mod reshard;
mod sync;

pub use broadcast::{BroadcastConfig, Broadcaster, FailedDelivery, Method, PeerRequest};
pub use reshard::coordinate_reshard;
pub use sync::join_shard;
