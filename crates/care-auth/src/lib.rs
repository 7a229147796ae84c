//! # care-auth — Authentication Primitives
//!
//! - [`tokens`] — access/refresh token pairs signed with HS256, one secret
//!   per token kind, with refresh-token families for rotation and reuse
//!   detection.
//! - [`password`] — Argon2id hashing in PHC string format.
//! - [`rate_limit`] — sliding-window login throttling keyed by hashed IP and
//!   hashed email, backed by Redis or a process-local fallback.
//!
//! Nothing here touches the datastore; session persistence and the refresh
//! protocol's atomic rotation live in the API crate.

pub mod password;
pub mod rate_limit;
pub mod tokens;

pub use password::{hash_password, verify_password, PasswordError};
pub use rate_limit::{Decision, RateLimitConfig, RateLimiter, Window};
pub use tokens::{
    AccessClaims, RefreshClaims, TokenConfig, TokenError, TokenManager, TokenPair,
};
