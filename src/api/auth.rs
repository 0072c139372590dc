// =============================================================================
// Bearer Token Authentication
// =============================================================================
//
// The expected token comes from the `BOREALIS_ADMIN_TOKEN` environment
// variable, read per request so rotation needs no restart. Comparison runs in
// constant time. A missing or wrong token short-circuits the request with
// 403 before the handler body executes.
// =============================================================================

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    Json,
};
use tracing::warn;

const TOKEN_ENV: &str = "BOREALIS_ADMIN_TOKEN";

/// Compare two byte slices in constant time. Every byte of both slices is
/// examined even after a mismatch.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn expected_token() -> Option<String> {
    match std::env::var(TOKEN_ENV) {
        Ok(token) if !token.is_empty() => Some(token),
        _ => None,
    }
}

/// Axum extractor validating `Authorization: Bearer <token>`.
pub struct AuthBearer(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthBearer
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let reject = |message: &str| {
            (
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({ "error": message })),
            )
        };

        let Some(expected) = expected_token() else {
            warn!("{TOKEN_ENV} is not set — rejecting authenticated request");
            return Err(reject("server authentication not configured"));
        };

        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        let token = match header {
            Some(value) if value.starts_with("Bearer ") => &value[7..],
            _ => {
                warn!("missing or malformed Authorization header");
                return Err(reject("missing or invalid authorization token"));
            }
        };

        if !constant_time_eq(token.as_bytes(), expected.as_bytes()) {
            warn!("invalid admin token presented");
            return Err(reject("invalid authorization token"));
        }

        Ok(AuthBearer(token.to_string()))
    }
}

/// Validate a token passed outside the Authorization header (the WebSocket
/// upgrade carries it as a query parameter).
pub fn validate_token(token: &str) -> bool {
    match expected_token() {
        Some(expected) => constant_time_eq(token.as_bytes(), expected.as_bytes()),
        None => false,
    }
}
