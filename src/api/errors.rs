use axum::{http::StatusCode, response::{IntoResponse, Response}};
use thiserror::Error;
use tracing::{error, warn};

use crate::hub::types::HubError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("bad request")]
    BadRequest, // 400
    #[error("unauthorized")]
    Unauthorized, // 401
    #[error("internal server error")]
    Internal, // 500
    #[error("hub unavailable")]
    Unavailable, // 503
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest => (StatusCode::BAD_REQUEST, "bad request").into_response(),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized").into_response(),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response(),
            ApiError::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, "hub unavailable").into_response(),
        }
    }
}

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        error!("Hub error: {}", err);
        ApiError::Unavailable
    }
}

pub fn internal_and_log<E: std::fmt::Display>(err: E) -> ApiError {
    error!("Internal error: {}", err);
    ApiError::Internal
}

pub fn error_and_log<E: std::fmt::Display>(err: E, error_type: ApiError) -> ApiError {
    warn!("{error_type:?}: {}", err);
    error_type
}
