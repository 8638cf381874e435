use axum::{
    Json,
    body::Body,
    http::{Response, StatusCode},
    response::IntoResponse,
};
use serde::Serialize;

use crate::error::HubError;

/// Errors returned by route handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Hub(#[from] HubError),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unavailable(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Hub(HubError::Configuration(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "configuration")
            }
            ApiError::Hub(HubError::AuthExchange { .. }) => (StatusCode::BAD_GATEWAY, "auth_exchange"),
            ApiError::Hub(HubError::NotLinked { .. }) => (StatusCode::NOT_FOUND, "not_linked"),
            ApiError::Hub(HubError::ReauthorizationRequired { .. }) => {
                (StatusCode::UNAUTHORIZED, "reauthorization_required")
            }
            ApiError::Hub(HubError::Sync { .. }) => (StatusCode::BAD_GATEWAY, "sync_failed"),
            ApiError::Hub(HubError::Storage(_)) => (StatusCode::INTERNAL_SERVER_ERROR, "storage"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response<Body> {
        let (status, code) = self.status_and_code();

        let message = if matches!(self, ApiError::Hub(HubError::Storage(_))) {
            tracing::error!("{:?}", self);
            "Something went wrong".to_string()
        } else {
            tracing::debug!("Request failed: {}", self);
            self.to_string()
        };

        (status, Json(ErrorBody { error: code, message })).into_response()
    }
}
