//! Error types for the gateway core.
//!
//! Mirrors the shape of the teacher's `router-api/src/client/error.rs`:
//! one `thiserror`-derived enum per seam, with `From` impls for the
//! transport/serialization errors that cross it.

use thiserror::Error;

/// Errors surfaced by route matching, forwarding, the message router and
/// the directory/queue subsystems. HTTP and websocket handlers in
/// `router-api` map these onto status codes and framed error replies.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("malformed frame: {0}")]
    InvalidFrame(String),

    #[error("no route matches path")]
    NoRoute,

    #[error("no live instances for service '{0}'")]
    NoInstance(String),

    #[error("upstream returned status {status}")]
    UpstreamStatus { status: u16, body: serde_json::Value },

    #[error("upstream request timed out")]
    UpstreamTimeout,

    #[error("registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("offline queue unavailable: {0}")]
    QueueFailure(String),

    #[error("signature verification failed")]
    BadSignature,

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl GatewayError {
    /// HTTP status this error maps to, per the error taxonomy.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::InvalidFrame(_) => 400,
            GatewayError::NoRoute => 404,
            GatewayError::NoInstance(_) => 503,
            GatewayError::UpstreamStatus { status, .. } => *status,
            GatewayError::UpstreamTimeout => 504,
            GatewayError::RegistryUnavailable(_) => 500,
            GatewayError::QueueFailure(_) => 500,
            GatewayError::BadSignature => 400,
            GatewayError::Json(_) => 400,
            GatewayError::Transport(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(GatewayError::NoRoute.status_code(), 404);
        assert_eq!(GatewayError::NoInstance("x".into()).status_code(), 503);
        assert_eq!(
            GatewayError::UpstreamStatus { status: 503, body: serde_json::Value::Null }
                .status_code(),
            503
        );
    }
}
