//! # Application State
//!
//! Shared state for the Axum application, passed to route handlers via the
//! `State` extractor. Every field is a cheap clone around an `Arc` or a
//! channel handle:
//!
//! - **store** — the persistence gateway (memory or Postgres).
//! - **tokens** — access/refresh token issuing and verification.
//! - **limiter** — the login rate limiter.
//! - **audit** — the single-writer audit logger.
//! - **objects** — attachment bytes.
//! - **config** — the parsed server configuration.
//! - **metrics** — the Prometheus registry behind `/metrics`.

use std::sync::Arc;

use care_auth::{RateLimiter, TokenError, TokenManager};
use thiserror::Error;

use crate::audit::{AuditLogger, DEFAULT_CAPACITY};
use crate::config::{AppConfig, ConfigError};
use crate::db::memory::MemoryStore;
use crate::db::{Store, StoreError};
use crate::middleware::metrics::ApiMetrics;
use crate::storage::{ObjectStore, StorageError};

/// Errors that abort startup.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("token manager error: {0}")]
    Token(#[from] TokenError),

    #[error("datastore error: {0}")]
    Store(#[from] StoreError),

    #[error("object store error: {0}")]
    Storage(#[from] StorageError),

    #[error("metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub tokens: TokenManager,
    pub limiter: RateLimiter,
    pub audit: AuditLogger,
    pub objects: ObjectStore,
    pub config: Arc<AppConfig>,
    pub metrics: ApiMetrics,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("store", &self.store.backend())
            .field("tokens", &self.tokens)
            .field("limiter", &self.limiter)
            .field("audit", &self.audit)
            .field("objects", &self.objects)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Assemble state around already-connected backends and start the audit
    /// writer. Must run inside a Tokio runtime.
    pub fn new(
        config: AppConfig,
        store: Store,
        objects: ObjectStore,
        limiter: RateLimiter,
    ) -> Result<Self, StartupError> {
        let tokens = TokenManager::new(&config.token_config()?)?;
        let metrics = ApiMetrics::new()?;
        let (audit, _writer) = AuditLogger::spawn(store.clone(), DEFAULT_CAPACITY);
        Ok(Self {
            store,
            tokens,
            limiter,
            audit,
            objects,
            config: Arc::new(config),
            metrics,
        })
    }

    /// Connect every backend named by `config`.
    pub async fn connect(config: AppConfig) -> Result<Self, StartupError> {
        let store = crate::db::init_store(config.database_url.as_deref()).await?;
        let objects = ObjectStore::connect(&config.storage_config()).await?;
        let limiter = RateLimiter::connect(&config.rate_limit_config()?).await;
        tracing::info!(
            datastore = store.backend(),
            objects = objects.backend_name(),
            rate_limit = limiter.backend_name(),
            "backends ready"
        );
        Self::new(config, store, objects, limiter)
    }

    /// Development configuration over in-memory backends.
    pub fn in_memory() -> Result<Self, StartupError> {
        Self::with_config(AppConfig::development())
    }

    /// In-memory backends with the given configuration. The rate limiter
    /// honours `rate_limit_enabled`.
    pub fn with_config(config: AppConfig) -> Result<Self, StartupError> {
        let rate = config.rate_limit_config()?;
        let limiter = if rate.enabled {
            RateLimiter::in_memory(rate.ip, rate.email)
        } else {
            RateLimiter::disabled(rate.ip, rate.email)
        };
        let store: Store = Arc::new(MemoryStore::new());
        Self::new(config, store, ObjectStore::in_memory(), limiter)
    }

    /// Release resources after the server stops: drain the audit queue,
    /// then close the rate-limit store and the datastore.
    pub async fn close(&self) {
        self.audit.shutdown().await;
        self.limiter.close();
        self.store.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_state_uses_memory_backends() {
        let state = AppState::in_memory().unwrap();
        assert_eq!(state.store.backend(), "memory");
        assert_eq!(state.objects.backend_name(), "memory");
        assert_eq!(state.limiter.backend_name(), "memory");
        assert!(!state.config.is_production());
    }

    #[tokio::test]
    async fn disabled_rate_limiting_is_honoured() {
        let mut config = AppConfig::development();
        config.rate_limit_enabled = false;
        let state = AppState::with_config(config).unwrap();
        assert_eq!(state.limiter.backend_name(), "disabled");
    }

    #[tokio::test]
    async fn production_without_secrets_fails() {
        let mut config = AppConfig::development();
        config.environment = crate::config::Environment::Production;
        let err = AppState::with_config(config).unwrap_err();
        assert!(matches!(err, StartupError::Config(ConfigError::MissingSecret(_))));
    }
}
