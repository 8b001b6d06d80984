use crate::rest::AppState;
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use tracing::warn;

/// Middleware guarding the `/internal/*` peer endpoints with the shared peer
/// token. A mismatch is rejected before any state changes.
pub async fn require_peer_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    if !token_matches(header_value, &state.peer_token) {
        warn!("Rejected peer request to {} with bad credentials", request.uri().path());
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "success": false,
                "data": null,
                "error": "peer authentication failed",
            })),
        )
            .into_response();
    }

    next.run(request).await
}

fn token_matches(header_value: Option<&str>, expected: &str) -> bool {
    match header_value.and_then(|value| value.strip_prefix("Bearer ")) {
        Some(token) => token == expected,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_bearer_token_passes() {
        assert!(token_matches(Some("Bearer secret"), "secret"));
    }

    #[test]
    fn wrong_token_fails() {
        assert!(!token_matches(Some("Bearer nope"), "secret"));
    }

    #[test]
    fn missing_or_malformed_header_fails() {
        assert!(!token_matches(None, "secret"));
        assert!(!token_matches(Some("secret"), "secret"));
        assert!(!token_matches(Some("Basic secret"), "secret"));
    }
}
