use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;

use urd_cluster::{Method, PeerRequest};
use urd_store::KeyCount;
use urd_types::{
    ActionResponse, NodeShardIdResponse, ReshardRequest, ReshardUpdate, ShardIdsResponse,
    ShardKeyCountResponse, ShardMembersResponse, SocketAddressBody, UrdError,
};

use crate::error::ApiError;
use crate::AppState;

pub async fn add_member(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<SocketAddressBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Ok(Json(body)) = payload else {
        return Err(UrdError::BadRequest("Bad Request".to_string()).into());
    };

    // A node adding itself for the first time pulls the shard's state before
    // it starts serving as a member.
    if state.replica.needs_join_sync(&body.address).await {
        urd_cluster::join_shard(&state.cluster, &id).await;
    }

    let added = state.replica.add_shard_member(&id, &body.address).await?;

    if !body.is_broadcast {
        let fan_out = SocketAddressBody { address: body.address, is_broadcast: true };
        state.cluster.spawn_delivery(PeerRequest {
            method: Method::Put,
            endpoint: format!("/shard/add-member/{id}"),
            payload: serde_json::to_value(&fan_out).map_err(UrdError::encoding)?,
            targets: added.fanout,
        });
    }

    Ok(Json(ActionResponse::new("node added to shard")).into_response())
}

pub async fn shard_ids(State(state): State<AppState>) -> Json<ShardIdsResponse> {
    Json(ShardIdsResponse { shard_ids: state.replica.shard_ids().await })
}

pub async fn node_shard_id(State(state): State<AppState>) -> Result<Response, ApiError> {
    let id = state.replica.node_shard_id().await.ok_or(UrdError::NoShardAssigned)?;
    Ok(Json(NodeShardIdResponse { node_shard_id: id }).into_response())
}

pub async fn members(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let members = state.replica.shard_members(&id).await.ok_or(UrdError::ShardNotFound)?;
    Ok(Json(ShardMembersResponse { shard_members: members }).into_response())
}

pub async fn key_count(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    match state.replica.key_count(&id).await? {
        KeyCount::Local(count) => {
            Ok(Json(ShardKeyCountResponse { shard_key_count: count }).into_response())
        }
        KeyCount::Remote(peer) => {
            // Not our shard: ask its first member instead.
            let res = state
                .cluster
                .send_one(Method::Get, &peer, &format!("/shard/key-count/{id}"), &Value::Null)
                .await
                .map_err(|_| UrdError::Internal("Request for key count failed".to_string()))?;
            let count = res
                .json::<ShardKeyCountResponse>()
                .await
                .map_err(|_| UrdError::Internal("Couldn't read key count response".to_string()))?;
            Ok(Json(count).into_response())
        }
    }
}

pub async fn reshard(
    State(state): State<AppState>,
    payload: Result<Json<ReshardRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let count = match payload {
        Ok(Json(req)) if req.shard_count > 0 => req.shard_count,
        _ => {
            return Err(UrdError::BadRequest(
                "Reshard request does not specify a valid shard count".to_string(),
            )
            .into())
        }
    };

    match urd_cluster::coordinate_reshard(&state.cluster, count).await {
        Ok(()) => Ok(Json(ActionResponse::new("resharded")).into_response()),
        Err(UrdError::RoutingUnavailable(_)) => {
            Err(UrdError::Internal("couldn't fetch data".to_string()).into())
        }
        Err(err) => Err(err.into()),
    }
}

pub async fn update(
    State(state): State<AppState>,
    payload: Result<Json<ReshardUpdate>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Ok(Json(body)) = payload else {
        return Err(UrdError::BadRequest("missing KV, Shards, or node ID".to_string()).into());
    };

    state.replica.install_reshard(body).await;
    Ok(Json(ActionResponse::new("updated")).into_response())
}
