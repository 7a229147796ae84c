//! # Login Rate Limiting
//!
//! Two independent sliding windows guard the login route: one keyed by the
//! client IP and one keyed by the lower-cased email. Both keys are SHA-256
//! hashed before they reach any store.
//!
//! A check that is allowed records the attempt. A check that is denied
//! records nothing and reports how long until the oldest attempt leaves
//! the window.
//!
//! ## Store selection
//!
//! ```text
//! enabled = false            → Disabled (always allow)
//! REDIS_URL set + reachable  → Redis sorted-set window (shared across processes)
//! fallback enabled           → process-local VecDeque window
//! otherwise                  → Disabled
//! ```
//!
//! Store errors at runtime fail open: the attempt is allowed and a warning
//! is logged.

mod memory;
mod redis_store;

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use care_core::sha256_hex;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("rate limit store error: {0}")]
    Store(#[from] redis::RedisError),
}

/// `limit` attempts per `period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub limit: u32,
    pub period: Duration,
}

impl Window {
    pub fn new(limit: u32, period: Duration) -> Self {
        Self { limit, period }
    }
}

/// Result of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until a retry can succeed; zero when allowed.
    pub retry_after: u64,
    /// Unix seconds at which the window is fully clear.
    pub reset_at: i64,
}

impl Decision {
    fn open(window: Window) -> Self {
        Self {
            allowed: true,
            limit: window.limit,
            remaining: window.limit,
            retry_after: 0,
            reset_at: Utc::now().timestamp(),
        }
    }
}

/// Startup configuration. Custom `Debug` redacts the Redis URL, which may
/// embed credentials.
#[derive(Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub fallback_enabled: bool,
    pub redis_url: Option<String>,
    pub ip: Window,
    pub email: Window,
}

impl std::fmt::Debug for RateLimitConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitConfig")
            .field("enabled", &self.enabled)
            .field("fallback_enabled", &self.fallback_enabled)
            .field("redis_url", &self.redis_url.as_ref().map(|_| "[REDACTED]"))
            .field("ip", &self.ip)
            .field("email", &self.email)
            .finish()
    }
}

#[derive(Clone)]
enum Backend {
    Redis(RedisStore),
    Memory(MemoryStore),
    Disabled,
}

/// The login rate limiter. Cheap to clone.
#[derive(Clone)]
pub struct RateLimiter {
    backend: Backend,
    ip: Window,
    email: Window,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("backend", &self.backend_name())
            .field("ip", &self.ip)
            .field("email", &self.email)
            .finish()
    }
}

impl RateLimiter {
    /// Select a store per the module-level rules.
    pub async fn connect(config: &RateLimitConfig) -> Self {
        if !config.enabled {
            tracing::warn!("login rate limiting disabled");
            return Self::disabled(config.ip, config.email);
        }
        if let Some(url) = &config.redis_url {
            match RedisStore::connect(url).await {
                Ok(store) => {
                    tracing::info!("login rate limiting backed by redis");
                    return Self {
                        backend: Backend::Redis(store),
                        ip: config.ip,
                        email: config.email,
                    };
                }
                Err(e) => {
                    tracing::warn!(error = %e, "redis unreachable at startup");
                }
            }
        }
        if config.fallback_enabled {
            tracing::info!("login rate limiting backed by in-process store");
            return Self::in_memory(config.ip, config.email);
        }
        tracing::warn!("no rate limit store available and fallback disabled; login is unthrottled");
        Self::disabled(config.ip, config.email)
    }

    pub fn in_memory(ip: Window, email: Window) -> Self {
        Self {
            backend: Backend::Memory(MemoryStore::new(memory::DEFAULT_MAX_KEYS)),
            ip,
            email,
        }
    }

    pub fn disabled(ip: Window, email: Window) -> Self {
        Self {
            backend: Backend::Disabled,
            ip,
            email,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            Backend::Redis(_) => "redis",
            Backend::Memory(_) => "memory",
            Backend::Disabled => "disabled",
        }
    }

    pub async fn check_ip(&self, ip: &str) -> Decision {
        self.check(&key("ip", ip), self.ip).await
    }

    pub async fn check_email(&self, email: &str) -> Decision {
        self.check(&key("email", &normalize_email(email)), self.email)
            .await
    }

    /// Clear the email window after a successful login.
    pub async fn reset_email(&self, email: &str) {
        let key = key("email", &normalize_email(email));
        match &self.backend {
            Backend::Redis(store) => {
                if let Err(e) = store.reset(&key).await {
                    tracing::warn!(error = %e, "failed to reset email rate limit");
                }
            }
            Backend::Memory(store) => store.reset(&key),
            Backend::Disabled => {}
        }
    }

    /// Release store resources at shutdown.
    pub fn close(&self) {
        match &self.backend {
            Backend::Memory(store) => store.clear(),
            Backend::Redis(_) | Backend::Disabled => {}
        }
        tracing::info!(backend = self.backend_name(), "rate limit store closed");
    }

    async fn check(&self, key: &str, window: Window) -> Decision {
        if window.limit == 0 {
            return Decision::open(window);
        }
        match &self.backend {
            Backend::Redis(store) => match store.hit(key, window).await {
                Ok(decision) => decision,
                Err(e) => {
                    tracing::warn!(error = %e, "rate limit store failed; allowing request");
                    Decision::open(window)
                }
            },
            Backend::Memory(store) => store.hit(key, window),
            Backend::Disabled => Decision::open(window),
        }
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn key(kind: &str, raw: &str) -> String {
    format!("ratelimit:login:{kind}:{}", sha256_hex(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(ip_limit: u32, email_limit: u32) -> RateLimiter {
        RateLimiter::in_memory(
            Window::new(ip_limit, Duration::from_secs(60)),
            Window::new(email_limit, Duration::from_secs(60)),
        )
    }

    #[test]
    fn keys_are_hashed() {
        let k = key("email", "alice@example.com");
        assert!(!k.contains("alice"));
        assert_eq!(k.len(), "ratelimit:login:email:".len() + 64);
    }

    #[tokio::test]
    async fn email_window_counts_down_then_denies() {
        let l = limiter(100, 3);
        let first = l.check_email("a@b.nl").await;
        assert!(first.allowed);
        assert_eq!(first.limit, 3);
        assert_eq!(first.remaining, 2);
        assert!(l.check_email("A@B.nl ").await.allowed);
        assert_eq!(l.check_email("a@b.nl").await.remaining, 0);
        let denied = l.check_email("a@b.nl").await;
        assert!(!denied.allowed);
        assert!(denied.retry_after >= 1);
    }

    #[tokio::test]
    async fn reset_restores_full_window() {
        let l = limiter(100, 5);
        for _ in 0..4 {
            l.check_email("user@care.nl").await;
        }
        l.reset_email("user@care.nl").await;
        assert_eq!(l.check_email("user@care.nl").await.remaining, 4);
    }

    #[tokio::test]
    async fn ip_and_email_windows_are_independent() {
        let l = limiter(1, 10);
        assert!(l.check_ip("10.0.0.1").await.allowed);
        assert!(!l.check_ip("10.0.0.1").await.allowed);
        assert!(l.check_ip("10.0.0.2").await.allowed);
        assert!(l.check_email("x@y.nl").await.allowed);
    }

    #[tokio::test]
    async fn disabled_always_allows() {
        let l = RateLimiter::disabled(
            Window::new(1, Duration::from_secs(60)),
            Window::new(1, Duration::from_secs(60)),
        );
        for _ in 0..5 {
            assert!(l.check_ip("1.1.1.1").await.allowed);
        }
        assert_eq!(l.backend_name(), "disabled");
    }

    #[tokio::test]
    async fn connect_falls_back_when_redis_is_unset() {
        let config = RateLimitConfig {
            enabled: true,
            fallback_enabled: true,
            redis_url: None,
            ip: Window::new(5, Duration::from_secs(60)),
            email: Window::new(5, Duration::from_secs(60)),
        };
        assert_eq!(RateLimiter::connect(&config).await.backend_name(), "memory");
        let config = RateLimitConfig {
            fallback_enabled: false,
            ..config
        };
        assert_eq!(RateLimiter::connect(&config).await.backend_name(), "disabled");
    }

    #[test]
    fn config_debug_redacts_url() {
        let config = RateLimitConfig {
            enabled: true,
            fallback_enabled: true,
            redis_url: Some("redis://:hunter2@cache:6379".into()),
            ip: Window::new(5, Duration::from_secs(60)),
            email: Window::new(5, Duration::from_secs(60)),
        };
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
