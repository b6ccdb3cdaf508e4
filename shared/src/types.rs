//! Request and response types for the Credence API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Identity Types
// ============================================================================

/// Role carried by an identity and signed into its tokens
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Listener,
    Artist,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Listener => "listener",
            Role::Artist => "artist",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "listener" => Ok(Role::Listener),
            "artist" => Ok(Role::Artist),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

// ============================================================================
// Authentication Types
// ============================================================================

/// Token pair returned by register, login and refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Login request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub handle: String,
    pub secret: String,
}

/// Registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub handle: String,
    pub secret: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
}

/// Refresh request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

/// Secret rotation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotateSecretRequest {
    pub current_secret: String,
    pub new_secret: String,
}

/// Stored identity as returned to its owner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub handle: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Public handle lookup result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleResponse {
    pub id: String,
    pub handle: String,
}

/// Identity resolved from the bearer token of the current request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub handle: String,
    pub role: Role,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}
