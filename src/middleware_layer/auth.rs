use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    state::AppState,
};

/// Extracts the session token from the request cookies.
///
/// # Arguments
///
/// * `cookies` - The request cookies.
///
/// # Returns
///
/// An `Option` containing the session ID if found.
fn extract_session_token(cookies: &Cookies) -> Option<Uuid> {
    cookies
        .get("session_id")
        .and_then(|cookie| Uuid::parse_str(cookie.value()).ok())
}

/// A middleware that requires a valid session to be present.
///
/// Resolving the session slides its expiry and refreshes presence. A
/// missing, expired or unreadable session — including an unreachable
/// KVS — maps to 401, which forces re-authentication rather than
/// failing the request outright.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `cookies` - The request cookies.
/// * `request` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// A `Response` or an error `AppError`.
pub async fn require_auth(
    State(state): State<AppState>,
    cookies: Cookies,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response> {
    tracing::debug!("🔐 Checking authentication...");

    let session_id = extract_session_token(&cookies).ok_or_else(|| {
        tracing::debug!("No session_id cookie found");
        AppError::Authentication("Not authenticated".to_string())
    })?;

    let session = state
        .sessions
        .get(&session_id.to_string())
        .await
        .ok_or_else(|| {
            tracing::debug!("Session {} expired or invalid", session_id);
            AppError::Authentication("Session expired or invalid".to_string())
        })?;

    tracing::debug!("✅ User authenticated: {}", session.user_id);

    request.extensions_mut().insert(session);

    Ok(next.run(request).await)
}

/// Rejects a token id that sits on the revocation denylist.
///
/// Token verification itself (signature, expiry) happens upstream; this
/// is the denylist leg every verification path must also take.
pub async fn ensure_not_revoked(state: &AppState, jti: &str) -> Result<()> {
    if state.revocations.is_revoked(jti).await {
        return Err(AppError::Authentication(
            "Token has been revoked".to_string(),
        ));
    }
    Ok(())
}
