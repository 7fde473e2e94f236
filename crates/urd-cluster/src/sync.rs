use serde_json::Value;
use tracing::{info, warn};

use urd_store::init_shards;
use urd_types::{ClockOrdering, DataTransfer, ShardIdsResponse};

use crate::broadcast::{Broadcaster, Method, PeerRequest};

/// Pull this node into `shard_id`: discover the authoritative shard count
/// from any peer, partition the local view accordingly, then adopt the
/// causally latest state among the new shard's members.
///
/// Every step degrades quietly — a node that finds no peers simply starts
/// empty, exactly like a fresh replica.
pub async fn join_shard(cluster: &Broadcaster, shard_id: &str) {
    let replica = cluster.replica();

    let others = replica.other_views().await;
    if others.is_empty() {
        return;
    }

    let res = match cluster
        .first_success(&PeerRequest {
            method: Method::Get,
            endpoint: "/shard/ids".to_string(),
            payload: Value::Null,
            targets: others,
        })
        .await
    {
        Ok(res) => res,
        Err(err) => {
            warn!(error = %err, "no peer answered shard discovery");
            return;
        }
    };
    let ids = match res.json::<ShardIdsResponse>().await {
        Ok(body) => body.shard_ids,
        Err(err) => {
            warn!(error = %err, "unreadable shard discovery response");
            return;
        }
    };
    if ids.is_empty() {
        return;
    }

    let view = replica.view().await;
    let shards = match init_shards(ids.len(), &view) {
        Ok(shards) => shards,
        Err(err) => {
            warn!(error = %err, "cannot partition view while joining");
            return;
        }
    };
    let peers: Vec<_> = shards
        .get(shard_id)
        .map(|members| {
            members
                .iter()
                .filter(|a| a.as_str() != replica.addr())
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    replica.install_shard_layout(shards, shard_id).await;

    // Adopt the causally latest snapshot; on ties the last responder wins.
    let mut best: Option<DataTransfer> = None;
    for peer in peers {
        let res = match cluster.send_one(Method::Get, &peer, "/data", &Value::Null).await {
            Ok(res) => res,
            Err(_) => continue,
        };
        let data = match res.json::<DataTransfer>().await {
            Ok(data) => data,
            Err(_) => continue,
        };
        best = match best {
            Some(current) if data.vc.compare(&current.vc) == ClockOrdering::Lesser => {
                Some(current)
            }
            _ => Some(data),
        };
    }

    match best {
        Some(data) => replica.install_data(data).await,
        None => info!(shard = shard_id, "no shard peer answered, joining empty"),
    }
}
