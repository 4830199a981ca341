//! Wire error envelope plus the mapping from each engine's
//! tagged-union error into it. Engines never return a dynamically-shaped
//! error; they return their own enum and `Surface::from` maps it at the
//! HTTP boundary.

use rocket::http::Status;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use rocket::Request;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// The full `{ error: { ... } }` envelope, carrying the HTTP status to emit.
#[derive(Debug)]
pub struct Surface {
    pub status: Status,
    pub body: ErrorBody,
}

impl Surface {
    pub fn new(status: Status, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                details: None,
            },
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.body.details = Some(details);
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(Status::BadRequest, "ValidationFailed", message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(Status::Unauthorized, "Unauthenticated", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(Status::Forbidden, "Forbidden", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Status::NotFound, "NotFound", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(Status::Conflict, "Conflict", message)
    }

    pub fn rate_limited(retry_after_ms: u64) -> Self {
        Self::new(Status::TooManyRequests, "RateLimited", "rate limit exceeded")
            .with_details(serde_json::json!({ "retry_after_ms": retry_after_ms }))
    }

    pub fn gated(code: &'static str, message: impl Into<String>, details: Option<Value>) -> Self {
        let mut s = Self::new(Status::from_code(409).unwrap_or(Status::Conflict), code, message);
        s.body.details = details;
        s
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(Status::ServiceUnavailable, "TransientDependencyError", message)
    }

    pub fn internal(correlation_id: impl Into<String>) -> Self {
        tracing::error!(correlation_id = %correlation_id.into(), "internal invariant violation");
        Self::new(Status::InternalServerError, "Internal", "an unexpected error occurred")
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Surface {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status;
        let body = Json(serde_json::json!({ "error": self.body }));
        Response::build_from(body.respond_to(req)?).status(status).ok()
    }
}

impl From<rusqlite::Error> for Surface {
    fn from(e: rusqlite::Error) -> Self {
        Surface::internal(e.to_string())
    }
}

impl From<redis::RedisError> for Surface {
    fn from(e: redis::RedisError) -> Self {
        Surface::transient(e.to_string())
    }
}
