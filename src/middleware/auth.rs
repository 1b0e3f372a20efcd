use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::AppState;

/// Guards admin routes with the configured `ADMIN_API_KEY`. With no key
/// configured every admin request is refused.
pub async fn admin_auth(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(admin_api_key) = state.admin_api_key.as_deref().filter(|k| !k.is_empty()) else {
        tracing::warn!("admin request refused: ADMIN_API_KEY is not configured");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let auth_header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    match auth_header {
        Some(auth) if key_matches(auth.strip_prefix("Bearer ").unwrap_or(auth), admin_api_key) => {
            Ok(next.run(req).await)
        }
        _ => {
            tracing::warn!(uri = %req.uri(), "admin request with invalid credentials");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

fn key_matches(provided: &str, expected: &str) -> bool {
    !provided.is_empty() && provided.as_bytes().ct_eq(expected.as_bytes()).unwrap_u8() == 1
}
