//! # Middleware
//!
//! Execution order for authenticated routes:
//!
//! ```text
//! TraceLayer → metrics → request id → auth → audit → pagination → RBAC guard → handler
//! ```
//!
//! `POST /auth/login` skips auth, audit and pagination and passes through
//! [`login_rate_limit`] instead.

pub mod audit;
pub mod login_rate_limit;
pub mod metrics;
pub mod pagination;
pub mod rbac;
