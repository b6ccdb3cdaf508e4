//! Credential service for registration, login and session management
//!
//! # Performance Optimizations
//!
//! - Password hashing/verification runs on the bounded blocking worker set
//! - JWT service is borrowed from state (pre-computed keys)
//! - Each repository call leases one pooled connection for its duration
//!
//! # Enumeration resistance
//!
//! Login answers "invalid credentials" for an unknown handle, a disabled
//! identity and a wrong secret alike, and spends one full hash
//! verification in every case.

use crate::auth::{AuthUser, TokenSubject};
use crate::db::DbError;
use crate::error::ApiError;
use crate::repositories::{IdentityRecord, IdentityRepository, NewIdentity};
use crate::state::AppState;
use credence_shared::types::{
    AuthTokens, HandleResponse, LoginRequest, RefreshTokenRequest, RegisterRequest,
    RotateSecretRequest, UserProfile,
};
use credence_shared::validation::{validate_handle, validate_secret, SECRET_MAX_LEN};
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::ValidateEmail;

/// Credential service for authentication operations
pub struct CredentialService;

impl CredentialService {
    /// Register a new identity and sign it in
    ///
    /// # Performance
    /// Password hashing is offloaded to the blocking worker set.
    pub async fn register(state: &AppState, req: RegisterRequest) -> Result<AuthTokens, ApiError> {
        validate_registration(&req)?;

        let secret_hash = state.passwords().hash_async(req.secret).await?;

        let new = NewIdentity {
            handle: req.handle,
            email: req.email,
            role: req.role.unwrap_or_default(),
            secret_hash,
        };
        let record = IdentityRepository::create(state.db(), &new)
            .await
            .map_err(|e| match e {
                DbError::ConstraintViolation(_) => {
                    ApiError::Conflict("Handle already taken".to_string())
                }
                other => ApiError::Database(other),
            })?;

        info!(identity_id = %record.id, role = %record.role(), "Identity registered");
        metrics::counter!("registrations_total").increment(1);

        Self::issue_pair(state, &record)
    }

    /// Login with handle and secret
    ///
    /// A stored hash made with outdated parameters (or by bcrypt) is
    /// replaced after a successful verification.
    pub async fn login(state: &AppState, req: LoginRequest) -> Result<AuthTokens, ApiError> {
        // Hashing an arbitrarily long input is a cheap way to burn CPU
        if req.secret.len() > SECRET_MAX_LEN {
            return Err(login_failed());
        }

        let passwords = state.passwords();
        let record = match IdentityRepository::find_by_handle(state.db(), &req.handle).await? {
            Some(record) if record.active => record,
            _ => {
                passwords.verify_decoy(req.secret).await?;
                return Err(login_failed());
            }
        };

        let valid = passwords
            .verify_async(req.secret.clone(), record.secret_hash.clone())
            .await?;
        if !valid {
            return Err(login_failed());
        }

        if passwords.needs_rehash(&record.secret_hash) {
            Self::upgrade_hash(state, &record, req.secret).await;
        }

        info!(identity_id = %record.id, "Login succeeded");
        metrics::counter!("logins_total", "outcome" => "success").increment(1);

        Self::issue_pair(state, &record)
    }

    /// Re-hash a verified secret with the current parameters.
    ///
    /// Best effort: the login already succeeded, so failures are only logged.
    async fn upgrade_hash(state: &AppState, record: &IdentityRecord, secret: String) {
        let new_hash = match state.passwords().hash_async(secret).await {
            Ok(hash) => hash,
            Err(e) => {
                warn!(identity_id = %record.id, error = %e, "Hash upgrade skipped");
                return;
            }
        };

        match IdentityRepository::upgrade_hash(state.db(), record.id, &record.secret_hash, &new_hash)
            .await
        {
            Ok(true) => info!(identity_id = %record.id, "Secret hash upgraded"),
            Ok(false) => debug!(identity_id = %record.id, "Secret changed concurrently, upgrade dropped"),
            Err(e) => warn!(identity_id = %record.id, error = %e, "Hash upgrade failed"),
        }
    }

    /// Exchange a refresh token for a new pair
    ///
    /// The presented refresh token is consumed: a second exchange of the same
    /// token fails.
    pub async fn refresh(state: &AppState, req: RefreshTokenRequest) -> Result<AuthTokens, ApiError> {
        let claims = state
            .jwt()
            .verify_refresh_token(&req.refresh_token)
            .map_err(|reason| {
                debug!(reason = reason.reason(), "Refresh token rejected");
                ApiError::from(reason)
            })?;
        let identity_id = claims.identity_id()?;

        let record = IdentityRepository::find_by_id(state.db(), identity_id)
            .await?
            .filter(|record| record.active)
            .ok_or(ApiError::Unauthenticated)?;

        let until = claims.exp.saturating_add(state.jwt().leeway_secs());
        let consumed = state
            .revocations()
            .revoke(&claims.jti, until)
            .await
            .map_err(ApiError::Internal)?;
        if !consumed {
            warn!(identity_id = %identity_id, jti = %claims.jti, "Refresh token replayed");
            return Err(ApiError::Unauthenticated);
        }

        debug!(identity_id = %identity_id, "Token pair refreshed");
        Self::issue_pair(state, &record)
    }

    /// Revoke the token the caller authenticated with
    pub async fn logout(state: &AppState, user: &AuthUser) -> Result<(), ApiError> {
        let until = user.expires_at.timestamp().saturating_add(state.jwt().leeway_secs());
        state
            .revocations()
            .revoke(&user.token_id, until)
            .await
            .map_err(ApiError::Internal)?;

        info!(identity_id = %user.identity_id, jti = %user.token_id, "Logged out");
        Ok(())
    }

    /// Replace the caller's secret after checking the current one
    ///
    /// Both hash operations run before a lease is taken, so a rotation never
    /// holds a pooled connection while it waits on the hashing workers. The
    /// write then runs as one transaction on one lease: the identity row is
    /// locked and its hash must still be the one that was verified. Of two
    /// rotations racing with the same current secret, the second finds the
    /// first's new hash and fails with invalid credentials.
    pub async fn rotate_secret(
        state: &AppState,
        user: &AuthUser,
        req: RotateSecretRequest,
    ) -> Result<(), ApiError> {
        validate_secret(&req.new_secret).map_err(ApiError::Validation)?;
        if req.current_secret.len() > SECRET_MAX_LEN {
            return Err(ApiError::InvalidCredentials);
        }

        let record = IdentityRepository::find_by_id(state.db(), user.identity_id)
            .await?
            .filter(|record| record.active)
            .ok_or(ApiError::InvalidCredentials)?;
        let verified_hash = record.secret_hash;

        let passwords = state.passwords();
        let valid = passwords
            .verify_async(req.current_secret, verified_hash.clone())
            .await?;
        if !valid {
            return Err(ApiError::InvalidCredentials);
        }
        let new_hash = passwords.hash_async(req.new_secret).await?;

        let db = state.db();
        let mut lease = db.retrying(move || db.acquire()).await?;

        let result = async {
            let mut tx = lease.transaction().await?;

            let locked = IdentityRepository::lock_by_id(&mut *tx, user.identity_id)
                .await?
                .ok_or(ApiError::InvalidCredentials)?;
            if locked.secret_hash != verified_hash {
                // Dropping the transaction rolls it back and releases the row
                debug!(identity_id = %user.identity_id, "Secret changed concurrently, rotation refused");
                return Err(ApiError::InvalidCredentials);
            }

            IdentityRepository::set_hash(&mut *tx, user.identity_id, &new_hash).await?;
            tx.commit().await.map_err(DbError::from)?;
            Ok::<_, ApiError>(())
        }
        .await;

        let result = lease.settle(result).await;
        if result.is_ok() {
            info!(identity_id = %user.identity_id, "Secret rotated");
        }
        result
    }

    /// Soft-disable the caller's identity and revoke the presenting token
    pub async fn disable_self(state: &AppState, user: &AuthUser) -> Result<(), ApiError> {
        IdentityRepository::disable(state.db(), user.identity_id)
            .await
            .map_err(|e| match e {
                DbError::NotFound => ApiError::NotFound("Identity not found".to_string()),
                other => ApiError::Database(other),
            })?;

        Self::logout(state, user).await?;
        info!(identity_id = %user.identity_id, "Identity disabled");
        Ok(())
    }

    /// Stored profile of an active identity
    pub async fn get_profile(state: &AppState, identity_id: Uuid) -> Result<UserProfile, ApiError> {
        let record = Self::find_active(state, identity_id).await?;

        Ok(UserProfile {
            id: record.id.to_string(),
            role: record.role(),
            handle: record.handle,
            email: record.email,
            created_at: record.created_at,
        })
    }

    /// Handle of an active identity
    pub async fn get_handle(state: &AppState, identity_id: Uuid) -> Result<HandleResponse, ApiError> {
        let record = Self::find_active(state, identity_id).await?;

        Ok(HandleResponse {
            id: record.id.to_string(),
            handle: record.handle,
        })
    }

    async fn find_active(state: &AppState, identity_id: Uuid) -> Result<IdentityRecord, ApiError> {
        IdentityRepository::find_by_id(state.db(), identity_id)
            .await?
            .filter(|record| record.active)
            .ok_or_else(|| ApiError::NotFound("Identity not found".to_string()))
    }

    /// Mint an access/refresh pair for an identity
    pub fn issue_pair(state: &AppState, record: &IdentityRecord) -> Result<AuthTokens, ApiError> {
        let subject = TokenSubject {
            id: record.id,
            handle: record.handle.clone(),
            role: record.role(),
        };

        // Generate tokens (uses pre-computed keys - fast)
        let jwt = state.jwt();
        let access = jwt.generate_access_token(&subject)?;
        let refresh = jwt.generate_refresh_token(&subject)?;

        Ok(AuthTokens {
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: "Bearer".to_string(),
            expires_in: jwt.access_token_expiry_secs(),
        })
    }
}

fn login_failed() -> ApiError {
    metrics::counter!("logins_total", "outcome" => "failure").increment(1);
    ApiError::InvalidCredentials
}

/// Check registration input before spending a hash on it
fn validate_registration(req: &RegisterRequest) -> Result<(), ApiError> {
    validate_handle(&req.handle).map_err(ApiError::Validation)?;
    validate_secret(&req.secret).map_err(ApiError::Validation)?;

    if let Some(email) = &req.email {
        if !email.validate_email() {
            return Err(ApiError::Validation("Invalid email format".to_string()));
        }
    }
    Ok(())
}
