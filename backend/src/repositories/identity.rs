//! Identity repository for database operations
//!
//! Every public operation leases exactly one connection for its duration and
//! binds all inputs as parameters. Reads and idempotent updates go through
//! the single-retry policy as a whole; `create` only retries acquiring the
//! lease, since a replayed insert could report a duplicate of itself.

use crate::db::{Database, DbError};
use chrono::{DateTime, Utc};
use credence_shared::Role;
use sqlx::PgConnection;
use std::fmt;
use uuid::Uuid;

const IDENTITY_COLUMNS: &str =
    "id, handle, email, role, secret_hash, active, created_at, updated_at";

/// Identity record from database
#[derive(Clone, sqlx::FromRow)]
pub struct IdentityRecord {
    pub id: Uuid,
    pub handle: String,
    pub email: Option<String>,
    pub role: String,
    pub secret_hash: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IdentityRecord {
    /// Role column as the typed enum. Unknown values fall back to the least
    /// privileged role.
    pub fn role(&self) -> Role {
        self.role.parse().unwrap_or_default()
    }
}

impl fmt::Debug for IdentityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityRecord")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("email", &self.email)
            .field("role", &self.role)
            .field("secret_hash", &"[REDACTED]")
            .field("active", &self.active)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Input for creating an identity
#[derive(Clone)]
pub struct NewIdentity {
    pub handle: String,
    pub email: Option<String>,
    pub role: Role,
    pub secret_hash: String,
}

/// Identity repository for database operations
pub struct IdentityRepository;

impl IdentityRepository {
    /// Create a new identity
    ///
    /// A duplicate handle fails with `DbError::ConstraintViolation`.
    pub async fn create(db: &Database, new: &NewIdentity) -> Result<IdentityRecord, DbError> {
        let mut lease = db.retrying(move || db.acquire()).await?;

        let query = format!(
            "INSERT INTO identities (id, handle, email, role, secret_hash) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {IDENTITY_COLUMNS}"
        );
        let result = sqlx::query_as::<_, IdentityRecord>(&query)
            .bind(Uuid::new_v4())
            .bind(&new.handle)
            .bind(&new.email)
            .bind(new.role.as_str())
            .bind(&new.secret_hash)
            .fetch_one(&mut *lease)
            .await
            .map_err(DbError::from);

        lease.settle(result).await
    }

    /// Find identity by handle, active or not
    pub async fn find_by_handle(
        db: &Database,
        handle: &str,
    ) -> Result<Option<IdentityRecord>, DbError> {
        let query = format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE handle = $1");
        let query = query.as_str();

        db.retrying(move || async move {
            let mut lease = db.acquire().await?;
            let result = sqlx::query_as::<_, IdentityRecord>(query)
                .bind(handle)
                .fetch_optional(&mut *lease)
                .await
                .map_err(DbError::from);
            lease.settle(result).await
        })
        .await
    }

    /// Find identity by ID, active or not
    pub async fn find_by_id(db: &Database, id: Uuid) -> Result<Option<IdentityRecord>, DbError> {
        let query = format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE id = $1");
        let query = query.as_str();

        db.retrying(move || async move {
            let mut lease = db.acquire().await?;
            let result = sqlx::query_as::<_, IdentityRecord>(query)
                .bind(id)
                .fetch_optional(&mut *lease)
                .await
                .map_err(DbError::from);
            lease.settle(result).await
        })
        .await
    }

    /// Replace the stored secret hash
    pub async fn update_hash(db: &Database, id: Uuid, secret_hash: &str) -> Result<(), DbError> {
        db.retrying(move || async move {
            let mut lease = db.acquire().await?;
            let result = Self::set_hash(&mut lease, id, secret_hash).await;
            lease.settle(result).await
        })
        .await
    }

    /// Swap `current_hash` for `new_hash` only if it is still the stored
    /// value. Returns whether the swap happened, so a rehash racing a
    /// rotation can never undo it.
    pub async fn upgrade_hash(
        db: &Database,
        id: Uuid,
        current_hash: &str,
        new_hash: &str,
    ) -> Result<bool, DbError> {
        db.retrying(move || async move {
            let mut lease = db.acquire().await?;
            let result = sqlx::query(
                r#"
                UPDATE identities
                SET secret_hash = $3, updated_at = NOW()
                WHERE id = $1 AND secret_hash = $2
                "#,
            )
            .bind(id)
            .bind(current_hash)
            .bind(new_hash)
            .execute(&mut *lease)
            .await
            .map(|done| done.rows_affected() == 1)
            .map_err(DbError::from);
            lease.settle(result).await
        })
        .await
    }

    /// Soft-delete an identity. Disabling twice is not an error.
    pub async fn disable(db: &Database, id: Uuid) -> Result<(), DbError> {
        db.retrying(move || async move {
            let mut lease = db.acquire().await?;
            let result = sqlx::query(
                r#"
                UPDATE identities
                SET active = FALSE, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .execute(&mut *lease)
            .await
            .map_err(DbError::from)
            .and_then(|done| match done.rows_affected() {
                0 => Err(DbError::NotFound),
                _ => Ok(()),
            });
            lease.settle(result).await
        })
        .await
    }

    /// Read an active identity and hold its row lock until the surrounding
    /// transaction ends
    pub async fn lock_by_id(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<IdentityRecord>, DbError> {
        let query = format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities WHERE id = $1 AND active FOR UPDATE"
        );
        let record = sqlx::query_as::<_, IdentityRecord>(&query)
            .bind(id)
            .fetch_optional(conn)
            .await?;

        Ok(record)
    }

    /// Write a new secret hash on an already leased connection
    pub async fn set_hash(
        conn: &mut PgConnection,
        id: Uuid,
        secret_hash: &str,
    ) -> Result<(), DbError> {
        let done = sqlx::query(
            r#"
            UPDATE identities
            SET secret_hash = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(secret_hash)
        .execute(conn)
        .await?;

        if done.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }
}
