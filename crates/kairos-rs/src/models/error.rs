//! Router-wide error type and its HTTP response mapping.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;

/// Request-fatal and process-fatal errors the router can surface to a client.
///
/// Infrastructure failures that have a defined fallback (routing lookup,
/// active-color lookup, overflowed-result fetch) are absorbed at the point of
/// failure and never reach this type; see the error taxonomy in DESIGN.md.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// Subscribing on the event bus failed before the request could proceed.
    #[error("Failed to subscribe for correlation id {guid}: {reason}")]
    SubscribeFailed { guid: String, reason: String },

    /// The queue submitter failed before a result could be awaited.
    #[error("Failed to submit compilation request to queue: {0}")]
    QueueSubmitFailed(String),

    /// No result arrived over the bus within the configured timeout.
    #[error("Compilation timeout: No response received within {timeout_seconds} seconds for GUID: {guid}")]
    WaitTimeout { guid: String, timeout_seconds: u64 },

    /// The direct HTTP backend could not be reached or errored transport-wise.
    #[error("Failed to forward request to backend: {0}")]
    ForwardFailed(String),

    /// Any other unexpected failure in request handling.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResponseError for RouterError {
    fn status_code(&self) -> StatusCode {
        match self {
            RouterError::SubscribeFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            RouterError::QueueSubmitFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RouterError::WaitTimeout { .. } => StatusCode::REQUEST_TIMEOUT,
            RouterError::ForwardFailed(_) => StatusCode::BAD_GATEWAY,
            RouterError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = json!({ "error": self.to_string() });
        HttpResponse::build(self.status_code())
            .insert_header(("Access-Control-Allow-Origin", "*"))
            .json(body)
    }
}
