use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use urd_types::{ErrResponse, UrdError};

/// Boundary wrapper turning an [`UrdError`] into `{"error": "..."}` with the
/// matching status code.
pub struct ApiError(pub UrdError);

impl From<UrdError> for ApiError {
    fn from(err: UrdError) -> Self {
        ApiError(err)
    }
}

fn status_for(err: &UrdError) -> StatusCode {
    match err {
        UrdError::BadRequest(_)
        | UrdError::KeyTooLong
        | UrdError::MissingValue
        | UrdError::SelfDelete
        | UrdError::InvalidMethod(_)
        | UrdError::FaultTolerance { .. } => StatusCode::BAD_REQUEST,

        UrdError::KeyNotFound
        | UrdError::ShardNotFound
        | UrdError::ViewNotFound
        | UrdError::ViewAndShardNotFound
        | UrdError::ViewHasNoSuchReplica
        | UrdError::NoShardAssigned => StatusCode::NOT_FOUND,

        UrdError::CausalWait | UrdError::RoutingUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,

        UrdError::Encoding(_)
        | UrdError::Internal(_)
        | UrdError::Transport { .. }
        | UrdError::Timeout(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        (status, Json(ErrResponse { error: self.0.to_string() })).into_response()
    }
}
