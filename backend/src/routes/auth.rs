//! Authentication routes
//!
//! Provides endpoints for registration, login, token refresh and the
//! session-scoped operations of a signed-in identity.
//!
//! # Performance Optimizations
//!
//! - Uses pre-computed JWT keys from AppState (no per-request allocation)
//! - Password hashing runs on blocking thread pool (doesn't block async runtime)

use crate::auth::{auth_middleware, AuthUser};
use crate::error::ApiResult;
use crate::services::CredentialService;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use credence_shared::types::{
    AuthTokens, HandleResponse, LoginRequest, RefreshTokenRequest, RegisterRequest,
    RotateSecretRequest, SessionInfo, UserProfile,
};
use uuid::Uuid;

/// Create auth routes
///
/// Everything after `route_layer` runs behind the auth middleware.
pub fn auth_routes(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/session", get(session))
        .route("/me", get(get_profile).delete(disable_self))
        .route("/users/:id", get(get_handle))
        .route("/secret", put(rotate_secret))
        .route("/logout", post(logout))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware));

    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh_token))
        .merge(protected)
}

/// Register a new identity
///
/// POST /api/v1/auth/register
///
/// # Performance
/// Password hashing is offloaded to blocking thread pool.
async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<AuthTokens>)> {
    let tokens = CredentialService::register(&state, req).await?;
    Ok((StatusCode::CREATED, Json(tokens)))
}

/// Login with handle and secret
///
/// POST /api/v1/auth/login
///
/// # Performance
/// Password verification is offloaded to blocking thread pool.
async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthTokens>> {
    let tokens = CredentialService::login(&state, req).await?;
    Ok(Json(tokens))
}

/// Refresh access token
///
/// POST /api/v1/auth/refresh
async fn refresh_token(
    State(state): State<AppState>,
    Json(req): Json<RefreshTokenRequest>,
) -> ApiResult<Json<AuthTokens>> {
    let tokens = CredentialService::refresh(&state, req).await?;
    Ok(Json(tokens))
}

/// Identity context resolved from the presented token
///
/// GET /api/v1/auth/session
///
/// Answered from the token alone, without a database round trip.
async fn session(auth_user: AuthUser) -> Json<SessionInfo> {
    Json(SessionInfo {
        id: auth_user.identity_id.to_string(),
        handle: auth_user.handle,
        role: auth_user.role,
        token_id: auth_user.token_id,
        expires_at: auth_user.expires_at,
    })
}

/// Get current identity profile (requires authentication)
///
/// GET /api/v1/auth/me
async fn get_profile(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<Json<UserProfile>> {
    let profile = CredentialService::get_profile(&state, auth_user.identity_id).await?;
    Ok(Json(profile))
}

/// Look up the handle of another identity
///
/// GET /api/v1/auth/users/:id
async fn get_handle(
    State(state): State<AppState>,
    _auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<HandleResponse>> {
    let handle = CredentialService::get_handle(&state, id).await?;
    Ok(Json(handle))
}

/// Replace the caller's secret
///
/// PUT /api/v1/auth/secret
async fn rotate_secret(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(req): Json<RotateSecretRequest>,
) -> ApiResult<StatusCode> {
    CredentialService::rotate_secret(&state, &auth_user, req).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Revoke the presenting token
///
/// POST /api/v1/auth/logout
async fn logout(State(state): State<AppState>, auth_user: AuthUser) -> ApiResult<StatusCode> {
    CredentialService::logout(&state, &auth_user).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Soft-disable the caller's identity
///
/// DELETE /api/v1/auth/me
async fn disable_self(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<StatusCode> {
    CredentialService::disable_self(&state, &auth_user).await?;
    Ok(StatusCode::NO_CONTENT)
}
