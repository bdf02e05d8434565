use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Relay-wide error type
#[derive(Error, Debug)]
pub enum RelayError {
    /// A receiver arrived before the sender published a video track.
    #[error("Video not ready. Please wait for sender connection.")]
    NotReady,

    #[error("Invalid offer request")]
    InvalidOffer,

    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error body returned by the HTTP surface.
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl RelayError {
    fn status_code(&self) -> StatusCode {
        match self {
            RelayError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::InvalidOffer => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.to_string(),
        };

        if status.is_server_error() {
            tracing::warn!(error_message = %body.error, "request failed");
        }

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_body_matches_consumer_retry_contract() {
        let err = RelayError::NotReady;
        assert_eq!(
            err.to_string(),
            "Video not ready. Please wait for sender connection."
        );
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
