//! Password hashing using argon2
//!
//! Provides secure password hashing and verification.
//!
//! # Performance Considerations
//!
//! Argon2 is intentionally CPU-intensive. The async entry points run the work
//! on tokio's blocking pool behind a semaphore, so a flood of login attempts
//! queues for a bounded number of hashing slots instead of starving request
//! handling, and each call gives up after the configured timeout.
//!
//! # Timing decoy
//!
//! A login for an unknown handle verifies against a decoy made with the
//! current Argon2id parameters, so it costs the same as a login for an
//! identity whose hash is current. Hashes that are not current (legacy
//! bcrypt blobs, or Argon2 blobs from older parameters) cost whatever their
//! own parameters cost, and a handle holding one is distinguishable by
//! timing until its next successful login replaces the hash. Upgraded hashes
//! close the gap; there is no way to match a legacy cost without knowing
//! which handles still carry one.

use crate::config::PasswordConfig;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::warn;

/// Input used to compute the timing decoy hash. Never matches a real secret
/// because the decoy is only checked when no identity hash exists.
const DECOY_SECRET: &str = "credence-decoy-secret";

/// Errors from the hashing worker set
#[derive(Error, Debug)]
pub enum HashError {
    /// No hashing slot freed up, or the work itself ran past the deadline
    #[error("Password hashing timed out")]
    Timeout,

    #[error("Password hashing failed: {0}")]
    Failed(String),
}

/// Argon2id state shared by every hashing task
struct Hasher {
    argon2: Argon2<'static>,
    params: Params,
    decoy_hash: String,
}

impl Hasher {
    fn hash(&self, secret: &str) -> Result<String, HashError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|e| HashError::Failed(e.to_string()))?;
        Ok(hash.to_string())
    }

    fn verify(&self, secret: &str, hash: &str) -> bool {
        if is_bcrypt(hash) {
            return bcrypt::verify(secret, hash).unwrap_or(false);
        }

        // A blob we cannot parse is a failed verification, not an error:
        // callers must not be able to tell it apart from a wrong secret.
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };
        // Parameters come from the blob itself, the digest comparison is
        // constant-time inside `password-hash`.
        self.argon2
            .verify_password(secret.as_bytes(), &parsed)
            .is_ok()
    }

    fn needs_rehash(&self, hash: &str) -> bool {
        if is_bcrypt(hash) {
            return true;
        }
        let Ok(parsed) = PasswordHash::new(hash) else {
            return true;
        };
        if parsed.algorithm != Algorithm::Argon2id.ident() {
            return true;
        }
        match Params::try_from(&parsed) {
            Ok(stored) => {
                stored.m_cost() != self.params.m_cost()
                    || stored.t_cost() != self.params.t_cost()
                    || stored.p_cost() != self.params.p_cost()
            }
            Err(_) => true,
        }
    }
}

fn is_bcrypt(hash: &str) -> bool {
    hash.starts_with("$2a$") || hash.starts_with("$2b$") || hash.starts_with("$2y$")
}

/// Password hashing service
///
/// Uses Argon2id with the configured cost parameters. Hashes imported from
/// the previous bcrypt-based deployment still verify and are reported by
/// [`PasswordService::needs_rehash`] so they get upgraded on next login.
///
/// Cloning is O(1).
#[derive(Clone)]
pub struct PasswordService {
    hasher: Arc<Hasher>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl PasswordService {
    /// Build the service and precompute the timing decoy.
    ///
    /// This performs one full hash, so call it once at startup.
    pub fn new(config: &PasswordConfig) -> Result<Self, HashError> {
        let params = Params::new(config.memory_kib, config.iterations, config.parallelism, None)
            .map_err(|e| HashError::Failed(format!("invalid argon2 parameters: {}", e)))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.clone());

        let mut hasher = Hasher {
            argon2,
            params,
            decoy_hash: String::new(),
        };
        hasher.decoy_hash = hasher.hash(DECOY_SECRET)?;

        Ok(Self {
            hasher: Arc::new(hasher),
            permits: Arc::new(Semaphore::new(config.max_concurrent)),
            timeout: config.timeout(),
        })
    }

    /// Hash a password (blocking operation)
    pub fn hash(&self, secret: &str) -> Result<String, HashError> {
        self.hasher.hash(secret)
    }

    /// Verify a password against a hash (blocking operation)
    ///
    /// Malformed or unknown hash formats verify as `false`.
    pub fn verify(&self, secret: &str, hash: &str) -> bool {
        self.hasher.verify(secret, hash)
    }

    /// Whether a hash that just verified should be replaced with one made
    /// from the current parameters
    pub fn needs_rehash(&self, hash: &str) -> bool {
        self.hasher.needs_rehash(hash)
    }

    /// Hash a password on the bounded worker set
    pub async fn hash_async(&self, secret: String) -> Result<String, HashError> {
        self.run(move |hasher| hasher.hash(&secret)).await?
    }

    /// Verify a password on the bounded worker set
    pub async fn verify_async(&self, secret: String, hash: String) -> Result<bool, HashError> {
        self.run(move |hasher| hasher.verify(&secret, &hash)).await
    }

    /// Spend the same effort as a real verification against a hash that can
    /// never match. Used when there is no stored hash to check.
    pub async fn verify_decoy(&self, secret: String) -> Result<(), HashError> {
        self.run(move |hasher| {
            let _ = hasher.verify(&secret, &hasher.decoy_hash);
        })
        .await
    }

    /// Run CPU-heavy work on the blocking pool once a slot is free.
    ///
    /// The permit moves into the blocking task, so a timed-out caller does not
    /// free its slot until the abandoned work has really finished.
    async fn run<T, F>(&self, work: F) -> Result<T, HashError>
    where
        F: FnOnce(&Hasher) -> T + Send + 'static,
        T: Send + 'static,
    {
        let hasher = Arc::clone(&self.hasher);
        let permits = Arc::clone(&self.permits);

        let job = async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|_| HashError::Failed("hashing workers shut down".to_string()))?;
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                work(hasher.as_ref())
            })
            .await
            .map_err(|e| HashError::Failed(format!("Task join error: {}", e)))
        };

        match tokio::time::timeout(self.timeout, job).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Password hashing timed out");
                metrics::counter!("password_hash_timeouts_total").increment(1);
                Err(HashError::Timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Smallest parameters argon2 accepts, keeps the suite fast
    fn cheap_config() -> PasswordConfig {
        PasswordConfig {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
            max_concurrent: 2,
            timeout_ms: 5000,
        }
    }

    fn create_test_service() -> PasswordService {
        PasswordService::new(&cheap_config()).unwrap()
    }

    #[test]
    fn test_hash_and_verify() {
        let service = create_test_service();
        let hash = service.hash("secure_password_123").unwrap();

        assert!(service.verify("secure_password_123", &hash));
        assert!(!service.verify("wrong_password", &hash));
    }

    #[test]
    fn test_different_hashes_for_same_password() {
        let service = create_test_service();
        let hash1 = service.hash("test_password").unwrap();
        let hash2 = service.hash("test_password").unwrap();

        // Hashes should be different due to random salt
        assert_ne!(hash1, hash2);

        // But both should verify correctly
        assert!(service.verify("test_password", &hash1));
        assert!(service.verify("test_password", &hash2));
    }

    #[test]
    fn test_hash_embeds_algorithm_and_cost() {
        let service = create_test_service();
        let hash = service.hash("whatever1").unwrap();
        assert!(hash.starts_with("$argon2id$v=19$m=8,t=1,p=1$"));
    }

    #[test]
    fn test_malformed_hash_fails_verification() {
        let service = create_test_service();
        assert!(!service.verify("secret", ""));
        assert!(!service.verify("secret", "plaintext-secret"));
        assert!(!service.verify("secret", "$argon2id$v=19$garbage"));
        assert!(!service.verify("secret", "$unknown$v=1$m=1$abc$def"));
    }

    #[test]
    fn test_legacy_bcrypt_hash_verifies_and_needs_rehash() {
        let service = create_test_service();
        let legacy = bcrypt::hash("old-secret", 4).unwrap();

        assert!(service.verify("old-secret", &legacy));
        assert!(!service.verify("new-secret", &legacy));
        assert!(service.needs_rehash(&legacy));
    }

    #[test]
    fn test_needs_rehash_tracks_cost_parameters() {
        let service = create_test_service();
        let current = service.hash("secret-123").unwrap();
        assert!(!service.needs_rehash(&current));

        let stronger = PasswordService::new(&PasswordConfig {
            memory_kib: 16,
            ..cheap_config()
        })
        .unwrap();
        assert!(stronger.needs_rehash(&current));
        // Old parameters still verify under the new service
        assert!(stronger.verify("secret-123", &current));
    }

    #[test]
    fn test_invalid_parameters_are_rejected() {
        let result = PasswordService::new(&PasswordConfig {
            memory_kib: 1,
            ..cheap_config()
        });
        assert!(matches!(result, Err(HashError::Failed(_))));
    }

    #[tokio::test]
    async fn test_async_hash_and_verify() {
        let service = create_test_service();
        let password = "async_test_password".to_string();
        let hash = service.hash_async(password.clone()).await.unwrap();

        assert!(service.verify_async(password, hash.clone()).await.unwrap());
        assert!(!service.verify_async("wrong".to_string(), hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_decoy_verification_completes() {
        let service = create_test_service();
        service.verify_decoy("anything".to_string()).await.unwrap();
    }

    #[test]
    fn test_decoy_costs_the_same_as_a_current_hash() {
        let service = create_test_service();
        let decoy = &service.hasher.decoy_hash;

        assert!(decoy.starts_with("$argon2id$v=19$m=8,t=1,p=1$"));
        assert!(!service.needs_rehash(decoy));
        assert!(!service.verify("anything", decoy));
    }

    #[tokio::test]
    async fn test_saturated_workers_time_out() {
        let service = PasswordService::new(&PasswordConfig {
            max_concurrent: 1,
            timeout_ms: 50,
            ..cheap_config()
        })
        .unwrap();

        let _held = Arc::clone(&service.permits).acquire_owned().await.unwrap();
        let result = service.hash_async("queued-secret".to_string()).await;

        assert!(matches!(result, Err(HashError::Timeout)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_hash_verifies_only_its_own_secret(
            secret in "[ -~]{8,40}",
            other in "[ -~]{8,40}",
        ) {
            let service = create_test_service();
            let hash = service.hash(&secret).unwrap();
            prop_assert!(service.verify(&secret, &hash));
            if other != secret {
                prop_assert!(!service.verify(&other, &hash));
            }
        }
    }
}
