use std::net::SocketAddr;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;

use urd_cluster::{Method, PeerRequest};
use urd_store::{ReplicationPlan, WriteOutcome};
use urd_types::{
    derive_client_clock, CmPayload, DataTransfer, KvPayload, KvResponseBody, UrdError, MAX_KEY_LEN,
};

use crate::error::ApiError;
use crate::AppState;

/// Schedule the two halves of a write's propagation: the full payload to the
/// shard peers, the clock alone to everyone else.
fn spawn_replication(
    state: &AppState,
    method: Method,
    endpoint: String,
    value: Option<Value>,
    plan: ReplicationPlan,
) -> Result<(), UrdError> {
    let fan_in = KvPayload {
        value,
        causal_metadata: plan.clock.clone(),
        is_broadcast: true,
    };
    state.cluster.spawn_delivery(PeerRequest {
        method,
        endpoint,
        payload: serde_json::to_value(&fan_in).map_err(UrdError::encoding)?,
        targets: plan.shard_peers,
    });

    if !plan.foreign_peers.is_empty() {
        let cm = CmPayload { causal_metadata: plan.clock };
        state.cluster.spawn_delivery(PeerRequest {
            method: Method::Put,
            endpoint: "/cm".to_string(),
            payload: serde_json::to_value(&cm).map_err(UrdError::encoding)?,
            targets: plan.foreign_peers,
        });
    }
    Ok(())
}

pub async fn put_key(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(key): Path<String>,
    payload: Result<Json<KvPayload>, JsonRejection>,
) -> Result<Response, ApiError> {
    // Key length is judged before the body, so an oversized key wins over a
    // missing value.
    if key.len() > MAX_KEY_LEN {
        return Err(UrdError::KeyTooLong.into());
    }
    let Ok(Json(payload)) = payload else {
        return Err(UrdError::MissingValue.into());
    };
    let Some(value) = payload.value else {
        return Err(UrdError::MissingValue.into());
    };

    let client = derive_client_clock(payload.causal_metadata, &peer.ip().to_string());
    let receipt = state
        .replica
        .put(&key, value.clone(), client, payload.is_broadcast)
        .await?;

    if let Some(plan) = receipt.replication {
        spawn_replication(&state, Method::Put, format!("/kvs/{key}"), Some(value), plan)?;
    }

    let (status, result) = match receipt.outcome {
        WriteOutcome::Created => (StatusCode::CREATED, "created"),
        _ => (StatusCode::OK, "replaced"),
    };
    Ok((
        status,
        Json(KvResponseBody {
            result: result.to_string(),
            causal_metadata: receipt.metadata,
            shard_id: receipt.shard_id,
            value: None,
        }),
    )
        .into_response())
}

pub async fn get_key(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(key): Path<String>,
    payload: Result<Json<KvPayload>, JsonRejection>,
) -> Result<Response, ApiError> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    let client = derive_client_clock(payload.causal_metadata, &peer.ip().to_string());

    let receipt = state.replica.get(&key, client).await?;
    Ok(Json(KvResponseBody {
        result: "found".to_string(),
        causal_metadata: receipt.metadata,
        shard_id: receipt.shard_id,
        value: Some(receipt.value),
    })
    .into_response())
}

pub async fn delete_key(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(key): Path<String>,
    payload: Result<Json<KvPayload>, JsonRejection>,
) -> Result<Response, ApiError> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    let client = derive_client_clock(payload.causal_metadata, &peer.ip().to_string());

    let receipt = state
        .replica
        .delete(&key, client, payload.is_broadcast)
        .await?;

    if let Some(plan) = receipt.replication {
        spawn_replication(&state, Method::Delete, format!("/kvs/{key}"), payload.value, plan)?;
    }

    Ok(Json(KvResponseBody {
        result: "deleted".to_string(),
        causal_metadata: receipt.metadata,
        shard_id: receipt.shard_id,
        value: None,
    })
    .into_response())
}

/// Full state snapshot for join-sync and reshard aggregation.
pub async fn data_transfer(State(state): State<AppState>) -> Json<DataTransfer> {
    Json(state.replica.snapshot().await)
}
