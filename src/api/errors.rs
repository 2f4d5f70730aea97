//! API Error Handling
//!
//! Structured error responses with proper HTTP status codes and request tracking.

use crate::errors::GameError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level API error response with request tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub request_id: String,
    pub error: ErrorBody,
}

/// Error body with structured information
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    /// Error code (ROUND_CLOSED, BAD_REQUEST, NOT_FOUND, etc.)
    pub code: String,
    /// Human-readable error message
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&GameError> for ErrorBody {
    fn from(err: &GameError) -> Self {
        let details = match err {
            GameError::InsufficientBalance { requested, available } => Some(serde_json::json!({
                "requested": requested,
                "available": available,
            })),
            GameError::StakeOutOfRange { min, max, .. } => Some(serde_json::json!({
                "min": min,
                "max": max,
            })),
            _ => None,
        };

        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            details,
        }
    }
}

/// API error types with request tracking
#[derive(Debug)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub request_id: String,
}

#[derive(Debug)]
pub enum ApiErrorKind {
    Game(GameError),
    NotFound(String),
    BadRequest(String),
    InternalError(String),
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn game(request_id: String, err: GameError) -> Self {
        Self {
            kind: ApiErrorKind::Game(err),
            request_id,
        }
    }

    pub fn not_found(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::NotFound(message),
            request_id,
        }
    }

    pub fn bad_request(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::BadRequest(message),
            request_id,
        }
    }

    pub fn internal_error(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::InternalError(message),
            request_id,
        }
    }

    pub fn service_unavailable(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::ServiceUnavailable(message),
            request_id,
        }
    }
}

/// HTTP status for a gameplay error
pub fn game_error_status(err: &GameError) -> StatusCode {
    match err {
        GameError::InvalidStake
        | GameError::StakeOutOfRange { .. }
        | GameError::InvalidAutoCashOut { .. }
        | GameError::InsufficientBalance { .. } => StatusCode::BAD_REQUEST,
        GameError::BetNotFound { .. } => StatusCode::NOT_FOUND,
        GameError::RoundNotAcceptingBets { .. }
        | GameError::RoundNotStarted { .. }
        | GameError::DuplicateBet { .. }
        | GameError::RoundClosed { .. }
        | GameError::AlreadyResolved { .. } => StatusCode::CONFLICT,
        GameError::AccountUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ApiErrorKind::Game(err) => write!(f, "[{}] {}: {}", self.request_id, err.code(), err),
            ApiErrorKind::NotFound(msg) => write!(f, "[{}] Not Found: {}", self.request_id, msg),
            ApiErrorKind::BadRequest(msg) => write!(f, "[{}] Bad Request: {}", self.request_id, msg),
            ApiErrorKind::InternalError(msg) => write!(f, "[{}] Internal Error: {}", self.request_id, msg),
            ApiErrorKind::ServiceUnavailable(msg) => write!(f, "[{}] Service Unavailable: {}", self.request_id, msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.kind {
            ApiErrorKind::Game(err) => (game_error_status(err), ErrorBody::from(err)),
            ApiErrorKind::NotFound(msg) => (StatusCode::NOT_FOUND, plain("NOT_FOUND", msg)),
            ApiErrorKind::BadRequest(msg) => (StatusCode::BAD_REQUEST, plain("BAD_REQUEST", msg)),
            ApiErrorKind::InternalError(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, plain("INTERNAL_ERROR", msg))
            }
            ApiErrorKind::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, plain("SERVICE_UNAVAILABLE", msg))
            }
        };

        let body = Json(ErrorResponse {
            request_id: self.request_id,
            error: body,
        });

        (status, body).into_response()
    }
}

fn plain(code: &str, message: &str) -> ErrorBody {
    ErrorBody {
        code: code.to_string(),
        message: message.to_string(),
        details: None,
    }
}
