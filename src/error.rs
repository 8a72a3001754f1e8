use std::time::Duration;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::models::ErrorBody;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("url must start with http:// or https://")]
    InvalidScheme,
    #[error("url is not a well-formed absolute uri")]
    MalformedUri,
    #[error("host {0} does not resolve")]
    UnresolvableHost(String),
    #[error("lookup of host {0} timed out")]
    LookupTimedOut(String),
}

/// Which uniqueness constraint an insert ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    ShortId,
    OriginalUrl,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate key on {0:?}")]
    DuplicateKey(UniqueField),
    #[error("store call timed out after {0:?}")]
    TimedOut(Duration),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failures of the lookup cache. Never surfaced to callers.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
    #[error("undecodable cache entry: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("cache call timed out after {0:?}")]
    TimedOut(Duration),
}

#[derive(Debug, Error)]
pub enum ShortenError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("no free short id after {0} attempts")]
    IdSpaceExhausted(usize),
    #[error(transparent)]
    StoreUnavailable(StoreError),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("short id {0} not found")]
    NotFound(String),
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(ErrorBody::new(message))).into_response()
}

impl IntoResponse for ShortenError {
    fn into_response(self) -> Response {
        match self {
            // Scheme failures have always been reported with a 200.
            Self::Validation(ValidationError::InvalidScheme) => {
                error_response(StatusCode::OK, "invalid url")
            }
            Self::Validation(ValidationError::MalformedUri | ValidationError::UnresolvableHost(_)) => {
                error_response(StatusCode::BAD_REQUEST, "invalid url")
            }
            Self::Validation(ValidationError::LookupTimedOut(host)) => {
                tracing::warn!(%host, "host lookup timed out");
                error_response(StatusCode::SERVICE_UNAVAILABLE, "Host lookup timed out")
            }
            Self::IdSpaceExhausted(attempts) => {
                tracing::error!(attempts, "short id space exhausted");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
            }
            Self::StoreUnavailable(err) => {
                tracing::error!(err = ?err);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
            }
        }
    }
}

impl IntoResponse for ResolveError {
    fn into_response(self) -> Response {
        match self {
            Self::NotFound(_) => error_response(StatusCode::NOT_FOUND, "Shortened URL not found"),
            Self::StoreUnavailable(err) => {
                tracing::error!(err = ?err);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Server error")
            }
        }
    }
}
