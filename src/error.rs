//! Error taxonomy shared by every registry-facing operation.
//!
//! Background plumbing (gossip, anti-entropy, replication) uses `anyhow` and
//! only logs; anything a caller can observe goes through [`NamingError`].

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, NamingError>;

#[derive(Debug, Error)]
pub enum NamingError {
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("server error: {0}")]
    ServerError(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// The write was handed to the replicated log but not confirmed in time.
    /// It may still be applied.
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("remote call failed: {0}")]
    Remote(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl NamingError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParam(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn server(msg: impl Into<String>) -> Self {
        Self::ServerError(msg.into())
    }

    /// Rebuild an error from the `code` a peer put in its response body.
    pub fn from_code(code: i32, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            400 => NamingError::InvalidParam(message),
            403 => NamingError::Forbidden(message),
            404 => NamingError::NotFound(message),
            504 => NamingError::Timeout(message),
            20404 => NamingError::ResourceNotFound(message),
            _ => NamingError::ServerError(message),
        }
    }

    /// Numeric code carried in response bodies.
    pub fn code(&self) -> i32 {
        match self {
            NamingError::InvalidParam(_) => 400,
            NamingError::Forbidden(_) => 403,
            NamingError::NotFound(_) => 404,
            NamingError::Timeout(_) => 504,
            NamingError::ResourceNotFound(_) => 20404,
            _ => 500,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            NamingError::InvalidParam(_) | NamingError::Json(_) => StatusCode::BAD_REQUEST,
            NamingError::Forbidden(_) => StatusCode::FORBIDDEN,
            NamingError::NotFound(_) | NamingError::ResourceNotFound(_) => StatusCode::NOT_FOUND,
            NamingError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for NamingError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "code": self.code(),
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}
