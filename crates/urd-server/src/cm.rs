use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;

use urd_types::{CmPayload, CmResponse, UrdError};

use crate::error::ApiError;
use crate::AppState;

/// Admit a foreign shard's write into the clock without carrying any data.
/// Sent by originators to every node outside the writing shard, so this is
/// never fanned out again.
///
/// Only a body that fails to parse is rejected; an empty clocks map passes
/// the write gate vacuously.
pub async fn put_cm(
    State(state): State<AppState>,
    payload: Result<Json<CmPayload>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Ok(Json(payload)) = payload else {
        return Err(UrdError::BadRequest("must provide causal metadata".to_string()).into());
    };

    state.replica.apply_clock(payload.causal_metadata).await?;
    Ok(Json(CmResponse { status_text: "vector clock updated".to_string() }).into_response())
}
