mod replica;
mod route;

pub use replica::{
    AddMember, KeyCount, ReadReceipt, Replica, ReplicationPlan, ViewChange, WriteOutcome,
    WriteReceipt,
};
pub use route::{find_shard, init_shards};
