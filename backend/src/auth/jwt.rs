//! JWT token generation and validation
//!
//! Provides access and refresh token management with pre-computed keys
//! for optimal performance.
//!
//! Verification is a pure function of the token, the signing key and the
//! clock: it never touches the database. Expiry is checked here rather than
//! by `jsonwebtoken` so the time source can be injected and the clock-skew
//! leeway is explicit:
//!
//! - a token is valid while `now < exp + leeway`
//! - a token whose `iat` is later than `now + leeway` is rejected as malformed

use super::clock::{SharedClock, SystemClock};
use crate::config;
use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use credence_shared::{AuthError, Role};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Token type: access tokens open protected routes, refresh tokens only
/// mint new pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

/// JWT claims
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (identity ID)
    pub sub: String,
    /// Handle at the time of issuance
    pub handle: String,
    pub role: Role,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// JWT ID, the key for revocation
    pub jti: String,
    pub token_type: TokenType,
}

impl Claims {
    /// Subject as an identity ID
    pub fn identity_id(&self) -> Result<Uuid, AuthError> {
        Uuid::parse_str(&self.sub).map_err(|_| AuthError::Malformed)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// The identity a token is minted for
#[derive(Debug, Clone)]
pub struct TokenSubject {
    pub id: Uuid,
    pub handle: String,
    pub role: Role,
}

/// A freshly signed token together with what was signed
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
}

/// Pre-computed JWT keys for efficient token operations
/// These are expensive to create, so we cache them in AppState
#[derive(Clone)]
pub struct JwtKeys {
    encoding: Arc<EncodingKey>,
    decoding: Arc<DecodingKey>,
}

impl JwtKeys {
    /// Create new JWT keys from secret
    /// This should be called once at startup
    pub fn new(secret: &SecretString) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        Self {
            encoding: Arc::new(EncodingKey::from_secret(bytes)),
            decoding: Arc::new(DecodingKey::from_secret(bytes)),
        }
    }

    pub fn encoding(&self) -> &EncodingKey {
        &self.encoding
    }

    pub fn decoding(&self) -> &DecodingKey {
        &self.decoding
    }
}

/// Token lifetimes and clock-skew tolerance
#[derive(Debug, Clone, Copy)]
pub struct TokenLifetimes {
    pub access_token_expiry_secs: i64,
    pub refresh_token_expiry_secs: i64,
    pub leeway_secs: i64,
}

impl From<&config::JwtConfig> for TokenLifetimes {
    fn from(config: &config::JwtConfig) -> Self {
        Self {
            access_token_expiry_secs: config.access_token_expiry_secs,
            refresh_token_expiry_secs: config.refresh_token_expiry_secs,
            leeway_secs: config.leeway_secs,
        }
    }
}

/// JWT service for token operations
///
/// Design: Uses pre-computed keys to avoid expensive key derivation
/// on every request. Keys are wrapped in Arc for cheap cloning.
#[derive(Clone)]
pub struct JwtService {
    keys: JwtKeys,
    lifetimes: TokenLifetimes,
    validation: Arc<Validation>,
    clock: SharedClock,
}

impl JwtService {
    /// Create a new JWT service reading the system clock
    ///
    /// # Performance Note
    /// Call this once at application startup and store in AppState.
    /// Do NOT create per-request.
    pub fn new(config: &config::JwtConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &config::JwtConfig, clock: SharedClock) -> Self {
        Self::from_keys(JwtKeys::new(&config.secret), config.into(), clock)
    }

    /// Create from pre-computed keys (for sharing across handlers)
    pub fn from_keys(keys: JwtKeys, lifetimes: TokenLifetimes, clock: SharedClock) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against the injected clock in `verify`
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            keys,
            lifetimes,
            validation: Arc::new(validation),
            clock,
        }
    }

    /// Generate an access token
    #[inline]
    pub fn generate_access_token(&self, subject: &TokenSubject) -> Result<IssuedToken> {
        self.generate_token(subject, TokenType::Access, self.lifetimes.access_token_expiry_secs)
    }

    /// Generate a refresh token
    #[inline]
    pub fn generate_refresh_token(&self, subject: &TokenSubject) -> Result<IssuedToken> {
        self.generate_token(subject, TokenType::Refresh, self.lifetimes.refresh_token_expiry_secs)
    }

    /// Generate a token with specified type and expiry
    fn generate_token(
        &self,
        subject: &TokenSubject,
        token_type: TokenType,
        expiry_secs: i64,
    ) -> Result<IssuedToken> {
        let now = self.clock.timestamp();
        let exp = now.checked_add(expiry_secs).ok_or_else(|| {
            anyhow::anyhow!("{} token expiry overflows the clock", token_type.as_str())
        })?;

        let claims = Claims {
            sub: subject.id.to_string(),
            handle: subject.handle.clone(),
            role: subject.role,
            exp,
            iat: now,
            jti: Uuid::new_v4().to_string(),
            token_type,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, self.keys.encoding())
            .map_err(|e| anyhow::anyhow!("Failed to generate {} token: {}", token_type.as_str(), e))?;

        Ok(IssuedToken { token, claims })
    }

    /// Validate a token of any type and return its claims
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = decode::<Claims>(token, self.keys.decoding(), &self.validation)
            .map_err(map_jwt_error)?
            .claims;

        let now = self.clock.timestamp();
        let leeway = self.lifetimes.leeway_secs;

        if now >= claims.exp.saturating_add(leeway) {
            return Err(AuthError::Expired);
        }
        if claims.iat > now.saturating_add(leeway) {
            return Err(AuthError::Malformed);
        }
        claims.identity_id()?;

        Ok(claims)
    }

    /// Validate an access token specifically
    #[inline]
    pub fn verify_access_token(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify_typed(token, TokenType::Access)
    }

    /// Validate a refresh token specifically
    #[inline]
    pub fn verify_refresh_token(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify_typed(token, TokenType::Refresh)
    }

    fn verify_typed(&self, token: &str, expected: TokenType) -> Result<Claims, AuthError> {
        let claims = self.verify(token)?;
        if claims.token_type != expected {
            return Err(AuthError::Malformed);
        }
        Ok(claims)
    }

    /// Get access token expiry in seconds
    #[inline]
    pub fn access_token_expiry_secs(&self) -> i64 {
        self.lifetimes.access_token_expiry_secs
    }

    #[inline]
    pub fn leeway_secs(&self) -> i64 {
        self.lifetimes.leeway_secs
    }

    /// The time source tokens are stamped and checked with
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }
}

/// Maps jsonwebtoken errors to the authentication taxonomy
fn map_jwt_error(error: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;

    match error.kind() {
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::ExpiredSignature => AuthError::Expired,
        _ => AuthError::Malformed,
    }
}
