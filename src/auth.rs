//! Bearer-token authentication for the HTTP transports.

use crate::error::ServerError;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

/// Decides whether a presented bearer token is acceptable.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> bool;
}

/// Accepts exactly one configured token.
pub struct StaticTokenVerifier {
    token: String,
}

impl StaticTokenVerifier {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl TokenVerifier for StaticTokenVerifier {
    fn verify(&self, token: &str) -> bool {
        self.token.as_bytes().ct_eq(token.as_bytes()).into()
    }
}

pub type SharedVerifier = Arc<dyn TokenVerifier>;

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
        Some(token.trim())
    } else {
        None
    }
}

/// axum middleware rejecting requests without a valid bearer token.
pub async fn require_bearer(
    State(verifier): State<SharedVerifier>,
    request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token);

    match token {
        Some(t) if verifier.verify(t) => next.run(request).await,
        Some(_) => unauthorized("invalid bearer token"),
        None => unauthorized("missing bearer token"),
    }
}

fn unauthorized(reason: &str) -> Response {
    warn!("Rejected HTTP request: {}", reason);
    let err = ServerError::Unauthorized(reason.to_string());
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": err.to_string() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_verifier() {
        let v = StaticTokenVerifier::new("s3cret");
        assert!(v.verify("s3cret"));
        assert!(!v.verify("s3cre"));
        assert!(!v.verify("S3cret"));
        assert!(!v.verify(""));
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Bearer"), None);
    }
}
