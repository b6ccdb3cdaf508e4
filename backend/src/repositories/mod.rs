//! Database repositories
//!
//! Provides data access layer for database operations.

pub mod identity;

pub use identity::{IdentityRecord, IdentityRepository, NewIdentity};
