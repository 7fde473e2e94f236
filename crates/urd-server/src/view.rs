use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;

use urd_cluster::{Method, PeerRequest};
use urd_types::{ActionResponse, SocketAddressBody, UrdError, ViewInfo};

use crate::error::ApiError;
use crate::AppState;

fn bad_request() -> ApiError {
    UrdError::BadRequest("Bad Request".to_string()).into()
}

pub async fn put_view(
    State(state): State<AppState>,
    payload: Result<Json<SocketAddressBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Ok(Json(body)) = payload else {
        return Err(bad_request());
    };

    let change = state.replica.add_view(&body.address).await;
    if !change.changed {
        return Ok(Json(ActionResponse::new("already present")).into_response());
    }

    // Receivers that already know the peer answer "already present" and stop,
    // so this fan-out cannot loop.
    let fan_out = SocketAddressBody { address: body.address, is_broadcast: false };
    state.cluster.spawn_delivery(PeerRequest {
        method: Method::Put,
        endpoint: "/view".to_string(),
        payload: serde_json::to_value(&fan_out).map_err(UrdError::encoding)?,
        targets: change.fanout,
    });

    Ok(Json(ActionResponse::new("added")).into_response())
}

pub async fn get_view(State(state): State<AppState>) -> Json<ViewInfo> {
    Json(ViewInfo { view: state.replica.view().await })
}

pub async fn delete_view(
    State(state): State<AppState>,
    payload: Result<Json<SocketAddressBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Ok(Json(body)) = payload else {
        return Err(bad_request());
    };

    let change = state.replica.remove_view(&body.address).await?;
    if !change.changed {
        return Err(UrdError::ViewHasNoSuchReplica.into());
    }

    // Only the originator fans the delete out; the flag breaks the loop.
    if !body.is_broadcast {
        let fan_out = SocketAddressBody { address: body.address, is_broadcast: true };
        state.cluster.spawn_delivery(PeerRequest {
            method: Method::Delete,
            endpoint: "/view".to_string(),
            payload: serde_json::to_value(&fan_out).map_err(UrdError::encoding)?,
            targets: change.fanout,
        });
    }

    Ok(Json(ActionResponse::new("deleted")).into_response())
}
