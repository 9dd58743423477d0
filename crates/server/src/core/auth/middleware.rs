use crate::config::AppState;
use crate::core::ctx::Ctx;
use crate::core::error::{Error, Result};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

/// Legacy header some clients still send the token in.
pub const AUTH_TOKEN_HEADER: &str = "auth-token";

/// Pull the credential from `Authorization: Bearer` first, then `auth-token`.
pub fn extract_token(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    bearer.or_else(|| {
        headers
            .get(AUTH_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|t| !t.is_empty())
    })
}

pub async fn mw_require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    debug!("MIDDLEWARE: require_auth");

    let Some(token) = extract_token(req.headers()) else {
        return Err(Error::Unauthorized("No token provided"));
    };

    let user_id = state.tokens.verify(token).await.map_err(|e| {
        warn!("[Auth] Rejected credential on {}", req.uri().path());
        e
    })?;

    req.extensions_mut().insert(Ctx::new(user_id));

    Ok(next.run(req).await)
}
