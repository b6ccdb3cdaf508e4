//! Exclusive handles on pooled connections

use super::{ConnectionFault, DbError};
use sqlx::pool::PoolConnection;
use sqlx::{Connection, PgConnection, Postgres, Transaction};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A connection borrowed from the pool for the span of one operation.
///
/// Dropping a lease hands the connection back to the idle set. A lease whose
/// operation hit a connectivity failure must go through [`Lease::settle`] or
/// [`Lease::discard`] instead, which closes the connection so the pool opens
/// a fresh one.
pub struct Lease {
    conn: PoolConnection<Postgres>,
    acquired_at: Instant,
    _slot: LeaseSlot,
}

/// One unit of the owning [`Database`](super::Database)'s checked-out count,
/// given back when the lease goes away by any path
pub(super) struct LeaseSlot(Arc<AtomicU32>);

impl LeaseSlot {
    pub(super) fn take(leased: &Arc<AtomicU32>) -> Self {
        leased.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(leased))
    }
}

impl Drop for LeaseSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Lease {
    pub(super) fn new(conn: PoolConnection<Postgres>, slot: LeaseSlot) -> Self {
        Self {
            conn,
            acquired_at: Instant::now(),
            _slot: slot,
        }
    }

    /// Open a transaction on this lease's connection.
    ///
    /// The transaction borrows the lease, so it can never outlive it or move
    /// to another connection. It rolls back on drop unless committed.
    pub async fn transaction(&mut self) -> Result<Transaction<'_, Postgres>, DbError> {
        Ok(Connection::begin(&mut *self.conn).await?)
    }

    /// How long this lease has been held
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Release the lease according to the outcome of the work done on it
    pub async fn settle<T, E: ConnectionFault>(self, result: Result<T, E>) -> Result<T, E> {
        match &result {
            Err(err) if err.poisons_connection() => self.discard().await,
            _ => debug!(held_ms = self.held_for().as_millis() as u64, "Lease released"),
        }
        result
    }

    /// Close the underlying connection instead of returning it to the pool
    pub async fn discard(self) {
        warn!(
            held_ms = self.held_for().as_millis() as u64,
            "Discarding broken database connection"
        );
        metrics::counter!("db_connections_discarded_total").increment(1);
        let conn = self.conn.detach();
        if let Err(e) = conn.close().await {
            debug!(error = %e, "Broken connection did not close cleanly");
        }
    }
}

impl Deref for Lease {
    type Target = PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for Lease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}
