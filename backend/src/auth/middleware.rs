//! Authentication middleware
//!
//! Provides Axum middleware for JWT validation and identity extraction.
//!
//! # Performance
//!
//! Uses pre-computed JWT keys from AppState to avoid expensive
//! key derivation on every request. Only the revocation lookup leaves the
//! process; the identity table is never read here.

use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use credence_shared::{AuthError, Role};
use tracing::{debug, warn};
use uuid::Uuid;

/// Authenticated identity attached to the request by [`auth_middleware`]
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub identity_id: Uuid,
    pub handle: String,
    pub role: Role,
    /// `jti` of the presenting token
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(ApiError::Unauthenticated)
    }
}

/// Pull the bearer token out of the Authorization header
fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(AuthError::MissingToken)?;

    // The scheme name is case-insensitive
    let (scheme, token) = value.split_once(' ').ok_or(AuthError::Malformed)?;
    if !scheme.eq_ignore_ascii_case("Bearer") {
        return Err(AuthError::Malformed);
    }
    let token = token.trim();

    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    Ok(token)
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<AuthUser, AuthError> {
    let token = bearer_token(headers)?;

    // Use pre-computed JWT service (no allocation!)
    let claims = state.jwt().verify_access_token(token)?;

    match state.revocations().is_revoked(&claims.jti).await {
        Ok(false) => {}
        Ok(true) => return Err(AuthError::Revoked),
        Err(e) => {
            // Fail closed: a token we cannot vouch for is not accepted
            warn!(error = %e, "Revocation lookup failed");
            return Err(AuthError::Revoked);
        }
    }

    Ok(AuthUser {
        identity_id: claims.identity_id()?,
        expires_at: claims.expires_at(),
        handle: claims.handle,
        role: claims.role,
        token_id: claims.jti,
    })
}

/// Middleware guarding protected routes
///
/// Every failure renders the same 401; the reason only reaches logs and
/// metrics.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    match authenticate(&state, request.headers()).await {
        Ok(user) => {
            request.extensions_mut().insert(user);
            Ok(next.run(request).await)
        }
        Err(reason) => {
            debug!(reason = reason.reason(), path = %request.uri().path(), "Request rejected");
            metrics::counter!("auth_rejections_total", "reason" => reason.reason()).increment(1);
            Err(ApiError::from(reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token(&headers("Bearer abc.def.ghi")), Ok("abc.def.ghi"));
    }

    #[test]
    fn test_scheme_is_case_insensitive() {
        assert_eq!(bearer_token(&headers("bearer abc.def.ghi")), Ok("abc.def.ghi"));
        assert_eq!(bearer_token(&headers("BEARER abc.def.ghi")), Ok("abc.def.ghi"));
    }

    #[test]
    fn test_missing_header() {
        assert_eq!(bearer_token(&HeaderMap::new()), Err(AuthError::MissingToken));
    }

    #[test]
    fn test_wrong_scheme() {
        assert_eq!(bearer_token(&headers("Basic YWxpY2U6cHc=")), Err(AuthError::Malformed));
        assert_eq!(bearer_token(&headers("Bearerabc")), Err(AuthError::Malformed));
        assert_eq!(bearer_token(&headers("Token abc")), Err(AuthError::Malformed));
    }

    #[test]
    fn test_empty_bearer() {
        assert_eq!(bearer_token(&headers("Bearer ")), Err(AuthError::MissingToken));
    }

    #[test]
    fn test_auth_user_debug() {
        let user = AuthUser {
            identity_id: Uuid::new_v4(),
            handle: "alice".to_string(),
            role: Role::Listener,
            token_id: Uuid::new_v4().to_string(),
            expires_at: Utc::now(),
        };
        let debug_str = format!("{:?}", user);
        assert!(debug_str.contains("AuthUser"));
        assert!(debug_str.contains("alice"));
    }
}
