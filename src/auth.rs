use axum::{
    body::Body,
    extract::State,
    http::{Request, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};

use crate::{crypto::secure_compare, error::ApiError, state::AppState};

/// Bearer-token guard for the admin API. With no token configured the admin
/// API is open.
pub async fn admin_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected_token) = &state.admin_api_token else {
        return Ok(next.run(req).await);
    };

    let Some(provided_token) = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
    else {
        return Err(ApiError::unauthorized(
            "missing or invalid Authorization header",
        ));
    };

    if !secure_compare(expected_token.as_bytes(), provided_token.as_bytes()) {
        return Err(ApiError::unauthorized("invalid token"));
    }

    Ok(next.run(req).await)
}

fn bearer_token(value: &str) -> Option<&str> {
    let trimmed = value.trim_start();
    let scheme = trimmed.get(..7)?;
    if !scheme.eq_ignore_ascii_case("bearer ") {
        return None;
    }
    Some(trimmed.get(7..)?.trim()).filter(|token| !token.is_empty())
}
