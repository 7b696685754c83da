use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::media::protocol::ProtocolError;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("invalid offer: {0}")]
    InvalidOffer(String),

    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    #[error("peer limit ({0}) reached")]
    Exhausted(usize),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("producer protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Error response body: `{"error": "<kind>", "message": "<human text>"}`
#[derive(Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl GatewayError {
    /// Stable machine-readable error kind used in response bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::InvalidOffer(_) => "invalid_offer",
            GatewayError::UnknownPeer(_) => "unknown_peer",
            GatewayError::Exhausted(_) => "exhausted",
            GatewayError::BadRequest(_) => "bad_request",
            GatewayError::Transport(_) => "transport",
            GatewayError::Protocol(_) => "producer_protocol",
            GatewayError::Config(_) | GatewayError::Io(_) | GatewayError::Internal(_) => "internal",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::InvalidOffer(_) | GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::UnknownPeer(_) => StatusCode::NOT_FOUND,
            GatewayError::Exhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Transport(_)
            | GatewayError::Protocol(_)
            | GatewayError::Config(_)
            | GatewayError::Io(_)
            | GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(error = %body.message, "request failed");
        } else {
            tracing::debug!(error = %body.message, "request rejected");
        }

        (status, Json(body)).into_response()
    }
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(GatewayError::InvalidOffer("x".into()).kind(), "invalid_offer");
        assert_eq!(GatewayError::UnknownPeer("p".into()).kind(), "unknown_peer");
        assert_eq!(GatewayError::Exhausted(16).kind(), "exhausted");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            GatewayError::InvalidOffer("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::UnknownPeer("p".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::Exhausted(16).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::Internal("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
