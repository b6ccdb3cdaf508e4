//! Token revocation set
//!
//! Access tokens are self-contained, so logging out cannot un-sign them.
//! Instead the token's `jti` goes into a revocation set that the auth
//! middleware consults after the signature and expiry checks pass. Entries
//! only need to live until the token would have expired anyway.

use super::clock::SharedClock;
use anyhow::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

const KEY_PREFIX: &str = "credence:revoked:";

/// Storage for revoked token IDs
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Mark a token as revoked until `expires_at` (Unix timestamp).
    ///
    /// Returns `false` when the token was already revoked, which lets a
    /// single-use token be consumed exactly once.
    async fn revoke(&self, jti: &str, expires_at: i64) -> Result<bool>;

    async fn is_revoked(&self, jti: &str) -> Result<bool>;
}

/// Redis-backed revocation set, shared by every instance of the service
#[derive(Clone)]
pub struct RedisRevocationStore {
    conn: ConnectionManager,
    clock: SharedClock,
}

impl RedisRevocationStore {
    pub async fn connect(url: &str, clock: SharedClock) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn, clock })
    }

    fn key(jti: &str) -> String {
        format!("{KEY_PREFIX}{jti}")
    }
}

#[async_trait]
impl RevocationStore for RedisRevocationStore {
    async fn revoke(&self, jti: &str, expires_at: i64) -> Result<bool> {
        let ttl = expires_at - self.clock.timestamp();
        if ttl <= 0 {
            // Already unusable, nothing to remember
            return Ok(true);
        }

        let mut conn = self.conn.clone();
        let stored: Option<String> = redis::cmd("SET")
            .arg(Self::key(jti))
            .arg(1)
            .arg("EX")
            .arg(ttl)
            .arg("NX")
            .query_async(&mut conn)
            .await?;

        debug!(ttl_secs = ttl, first = stored.is_some(), "Token revoked");
        Ok(stored.is_some())
    }

    async fn is_revoked(&self, jti: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = redis::cmd("EXISTS")
            .arg(Self::key(jti))
            .query_async(&mut conn)
            .await?;
        Ok(exists)
    }
}

/// In-process revocation set for single-instance deployments and tests
pub struct MemoryRevocationStore {
    entries: Mutex<HashMap<String, i64>>,
    clock: SharedClock,
}

impl MemoryRevocationStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, i64>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("revocation set lock poisoned"))
    }

    /// Number of entries currently held, expired ones included
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn revoke(&self, jti: &str, expires_at: i64) -> Result<bool> {
        let now = self.clock.timestamp();
        let mut entries = self.lock()?;
        entries.retain(|_, exp| *exp > now);
        if expires_at <= now {
            return Ok(true);
        }
        Ok(entries.insert(jti.to_string(), expires_at).is_none())
    }

    async fn is_revoked(&self, jti: &str) -> Result<bool> {
        let now = self.clock.timestamp();
        let entries = self.lock()?;
        Ok(entries.get(jti).is_some_and(|exp| *exp > now))
    }
}
