//! Authentication module
//!
//! Provides JWT-based authentication with argon2 password hashing.

pub mod clock;
mod jwt;
mod middleware;
mod password;
mod revocation;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use jwt::{Claims, IssuedToken, JwtKeys, JwtService, TokenLifetimes, TokenSubject, TokenType};
pub use middleware::{auth_middleware, AuthUser};
pub use password::{HashError, PasswordService};
pub use revocation::{MemoryRevocationStore, RedisRevocationStore, RevocationStore};
