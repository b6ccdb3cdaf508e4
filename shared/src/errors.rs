//! Error types for the Credence authentication core

use thiserror::Error;

/// Authentication outcomes that end a request as unauthenticated.
///
/// The variants exist for logging and tests. None of them may be shown to a
/// caller verbatim: the HTTP boundary collapses every variant except
/// `InvalidCredentials` into one opaque response.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// Unknown handle, disabled identity or wrong secret. Deliberately one
    /// variant so the three cases are indistinguishable.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Token signature mismatch")]
    InvalidSignature,

    #[error("Token expired")]
    Expired,

    #[error("Malformed token")]
    Malformed,

    #[error("Missing token")]
    MissingToken,

    #[error("Token revoked")]
    Revoked,
}

impl AuthError {
    /// Short machine-readable label, safe for logs and metric labels.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::Expired => "expired",
            AuthError::Malformed => "malformed",
            AuthError::MissingToken => "missing_token",
            AuthError::Revoked => "revoked",
        }
    }
}
