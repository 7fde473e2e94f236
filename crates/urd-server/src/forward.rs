use std::net::SocketAddr;

use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use urd_cluster::{Method, PeerRequest};
use urd_store::find_shard;
use urd_types::{derive_client_clock, KvPayload, UrdError};

use crate::error::ApiError;
use crate::AppState;

const MAX_BODY_BYTES: usize = 1 << 20;

/// Route keyed data requests to the shard that owns the key.
///
/// Locally owned keys (and unsharded replicas) fall through to the handler.
/// Foreign keys are re-sent verbatim — same method, path, and body, with the
/// causal metadata refreshed for the originating client — to the owning
/// shard's members in order, and the first response is relayed back as-is.
pub async fn forward_foreign_keys(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    let Some(key) = path.strip_prefix("/kvs/") else {
        return next.run(req).await;
    };

    let (shards, my_shard) = state.replica.shard_table().await;
    let target = match find_shard(key, &shards) {
        Some(owner) if *owner != my_shard => owner.clone(),
        _ => return next.run(req).await,
    };
    let members = shards.get(&target).cloned().unwrap_or_default();

    let method = match Method::try_from(req.method().as_str()) {
        Ok(method) => method,
        Err(err) => return ApiError::from(err).into_response(),
    };

    let bytes = match to_bytes(req.into_body(), MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return ApiError::from(UrdError::BadRequest("unreadable request body".to_string()))
                .into_response()
        }
    };
    let mut payload: KvPayload = if bytes.is_empty() {
        KvPayload::default()
    } else {
        match serde_json::from_slice(&bytes) {
            Ok(payload) => payload,
            Err(_) => {
                return ApiError::from(UrdError::BadRequest("malformed JSON body".to_string()))
                    .into_response()
            }
        }
    };
    payload.causal_metadata =
        derive_client_clock(payload.causal_metadata, &peer.ip().to_string());

    let body = match serde_json::to_value(&payload) {
        Ok(body) => body,
        Err(err) => return ApiError::from(UrdError::encoding(err)).into_response(),
    };

    tracing::info!(key, shard = %target, "forwarding foreign key");
    match state
        .cluster
        .first_success(&PeerRequest { method, endpoint: path, payload: body, targets: members })
        .await
    {
        Ok(res) => relay(res).await,
        Err(_) => ApiError::from(UrdError::RoutingUnavailable(target)).into_response(),
    }
}

/// Stream the owning shard's response back to the client unchanged.
async fn relay(res: reqwest::Response) -> Response {
    let status =
        StatusCode::from_u16(res.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    match res.bytes().await {
        Ok(bytes) => Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .unwrap_or_else(|_| status.into_response()),
        Err(err) => ApiError::from(UrdError::encoding(err)).into_response(),
    }
}
