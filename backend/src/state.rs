//! Application state management
//!
//! This module provides the shared application state that is passed
//! to all request handlers via Axum's state extraction.
//!
//! # Design Principles
//!
//! 1. **Pre-compute expensive resources**: JWT keys, the hashing decoy and the
//!    DB pool are created once
//! 2. **Cheap cloning**: All fields use Arc or are already Clone-cheap
//! 3. **Immutable after creation**: State is read-only during request handling

use crate::auth::{JwtService, PasswordService, RevocationStore, SharedClock, SystemClock};
use crate::config::AppConfig;
use crate::db::Database;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Shared application state
///
/// This struct holds all shared resources that handlers need access to.
/// All fields are designed for cheap cloning across async tasks.
#[derive(Clone)]
pub struct AppState {
    /// Leasing front-end over the connection pool
    pub db: Database,
    /// Application configuration
    pub config: Arc<AppConfig>,
    /// Pre-initialized JWT service with cached keys
    pub jwt: JwtService,
    /// Bounded argon2 worker set
    pub passwords: PasswordService,
    pub revocations: Arc<dyn RevocationStore>,
    pub clock: SharedClock,
    /// Renders `/metrics`; absent when no recorder is installed
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Create a new application state reading the system clock
    ///
    /// # Note
    /// This pre-computes JWT keys and the hashing decoy. Both are expensive,
    /// so this should only be called once at application startup.
    pub fn new(
        db: Database,
        config: AppConfig,
        revocations: Arc<dyn RevocationStore>,
    ) -> anyhow::Result<Self> {
        Self::with_clock(db, config, revocations, Arc::new(SystemClock))
    }

    pub fn with_clock(
        db: Database,
        config: AppConfig,
        revocations: Arc<dyn RevocationStore>,
        clock: SharedClock,
    ) -> anyhow::Result<Self> {
        let jwt = JwtService::with_clock(&config.jwt, clock.clone());
        let passwords = PasswordService::new(&config.password)?;

        Ok(Self {
            db,
            config: Arc::new(config),
            jwt,
            passwords,
            revocations,
            clock,
            metrics: None,
        })
    }

    /// Attach the Prometheus handle used by the `/metrics` route
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Get a reference to the database
    #[inline]
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Get a reference to the configuration
    #[inline]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Get a reference to the JWT service
    #[inline]
    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    #[inline]
    pub fn passwords(&self) -> &PasswordService {
        &self.passwords
    }

    #[inline]
    pub fn revocations(&self) -> &dyn RevocationStore {
        self.revocations.as_ref()
    }

    #[inline]
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }
}
