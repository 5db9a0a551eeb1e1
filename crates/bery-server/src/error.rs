use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Connection limit reached ({max} clients)")]
    TooManyConnections { max: usize },

    #[error("Too many requests")]
    RateLimited,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::TooManyConnections { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            ServerError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Why a chat message could not be routed. The `Display` text is sent to
/// the sender verbatim as the `error` of a `failed` status.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum RouteFailure {
    /// The identity has never registered with this relay.
    #[error("User not found")]
    NotFound,

    /// The identity registered before but has no live connection now.
    #[error("User not online")]
    NotOnline,

    #[error("Group chat not supported")]
    GroupUnsupported,
}
