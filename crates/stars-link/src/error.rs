//! Link error types.

use reqwest::StatusCode;
use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Sentinel the pipeline reports when no credential is stored locally.
pub const REQUIRE_LOGIN: &str = "REQUIRE_LOGIN";

/// Errors produced by the request pipeline, the push layer and the REST helpers.
#[derive(Error, Debug)]
pub enum LinkError {
    /// No credential is stored; the caller has to log in.
    #[error("authentication required")]
    Unauthenticated,

    /// Token renewal failed, timed out, or the replayed request expired again.
    #[error("credential renewal failed: {0}")]
    RenewalFailed(String),

    /// Network failure reported by a transport implementation.
    #[error("transport error: {0}")]
    Transport(String),

    /// Network failure reported by reqwest.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Unexpected status from a pass-through endpoint.
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },

    /// A push message that could not be parsed.
    #[error("malformed push payload: {0}")]
    MalformedPayload(String),

    /// A topic connection exhausted its reconnect attempts.
    #[error("subscription to '{topic}' failed after {attempts} attempts")]
    SubscriptionFailed { topic: String, attempts: u32 },

    /// A credential was constructed with an empty token.
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    /// A request could not be built (bad URL, header or method).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),
}

impl LinkError {
    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a renewal failure.
    pub fn renewal(msg: impl Into<String>) -> Self {
        Self::RenewalFailed(msg.into())
    }

    /// Create an invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Check if this error means the user has to authenticate again.
    pub fn requires_relogin(&self) -> bool {
        matches!(self, Self::Unauthenticated | Self::RenewalFailed(_))
    }

    /// Check if this is a network-level failure.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Http(_))
    }

    /// Body the pipeline synthesizes for callers that expect an error response
    /// shape instead of a typed error.
    pub fn signal_body(&self) -> Option<serde_json::Value> {
        match self {
            Self::Unauthenticated => Some(serde_json::json!({
                "response": { "data": { "error": REQUIRE_LOGIN } }
            })),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthenticated_signal_body() {
        let body = LinkError::Unauthenticated.signal_body().unwrap();
        assert_eq!(body["response"]["data"]["error"], "REQUIRE_LOGIN");
        assert!(LinkError::renewal("boom").signal_body().is_none());
    }

    #[test]
    fn test_error_classification() {
        assert!(LinkError::Unauthenticated.requires_relogin());
        assert!(LinkError::renewal("timeout").requires_relogin());
        assert!(!LinkError::transport("reset").requires_relogin());
        assert!(LinkError::transport("reset").is_transport());
        assert!(!LinkError::MalformedPayload("x".into()).is_transport());
    }
}
