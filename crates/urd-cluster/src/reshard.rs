use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tracing::info;

use urd_store::{find_shard, init_shards};
use urd_types::{DataTransfer, ReshardUpdate, ShardName, UrdError};

use crate::broadcast::{Broadcaster, Method, PeerRequest};

/// Rebuild the shard table with `new_count` shards and redistribute every
/// key. The coordinator aggregates each shard's data, re-partitions the
/// view, and pushes a wholesale state update to every member of every new
/// shard — itself included. The pushes ride the retry loop in the
/// background; this returns once they are scheduled.
///
/// Runs concurrently with live writes; anything admitted after aggregation
/// is superseded by the update.
pub async fn coordinate_reshard(
    cluster: &Broadcaster,
    new_count: usize,
) -> Result<(), UrdError> {
    let replica = cluster.replica();
    let (view, shards, shard_count) = replica.reshard_inputs().await;

    let total_nodes: usize = shards.values().map(Vec::len).sum();
    if new_count == 0 || total_nodes / new_count < 2 {
        return Err(UrdError::FaultTolerance { count: new_count, nodes: total_nodes });
    }
    if new_count == shard_count {
        info!(shard_count, "reshard is a no-op");
        return Ok(());
    }

    // Aggregate the whole key space, one snapshot per existing shard. The
    // old routing was disjoint, so overlaps cannot occur.
    let mut all_kvs = HashMap::new();
    for (shard, members) in &shards {
        let res = cluster
            .first_success(&PeerRequest {
                method: Method::Get,
                endpoint: "/data".to_string(),
                payload: Value::Null,
                targets: members.clone(),
            })
            .await
            .map_err(|_| UrdError::RoutingUnavailable(shard.clone()))?;
        let data = res.json::<DataTransfer>().await.map_err(UrdError::encoding)?;
        all_kvs.extend(data.kv);
    }
    info!(keys = all_kvs.len(), new_count, "aggregated key space for reshard");

    let new_shards = init_shards(new_count, &view)?;

    let mut partitions: BTreeMap<ShardName, HashMap<String, Value>> = BTreeMap::new();
    for (key, value) in all_kvs {
        let owner = find_shard(&key, &new_shards)
            .expect("new shard table is non-empty")
            .clone();
        partitions.entry(owner).or_default().insert(key, value);
    }

    for (shard, members) in &new_shards {
        let update = ReshardUpdate {
            shard_count: new_count,
            node_shard_id: shard.clone(),
            shards: new_shards.clone(),
            kv: partitions.remove(shard).unwrap_or_default(),
        };
        cluster.spawn_delivery(PeerRequest {
            method: Method::Put,
            endpoint: "/shard/update".to_string(),
            payload: serde_json::to_value(&update).map_err(UrdError::encoding)?,
            targets: members.clone(),
        });
    }

    Ok(())
}
