//! # Configuration
//!
//! Every setting is a CLI flag with an environment fallback, parsed once
//! at startup by [`AppConfig::parse`]. The raw values are then validated
//! into the runtime configs of each subsystem:
//!
//! | Runtime config | Consumer |
//! |----------------|----------|
//! | [`TokenConfig`] | `care_auth::TokenManager` |
//! | [`RateLimitConfig`] | `care_auth::RateLimiter` |
//! | [`StorageConfig`] | [`crate::storage::ObjectStore`] |
//!
//! In production both token secrets are mandatory, must differ and must be
//! at least 32 bytes. In development missing secrets are replaced by
//! ephemeral random ones, so tokens do not survive a restart.

use std::net::SocketAddr;
use std::time::Duration;

use care_auth::{RateLimitConfig, TokenConfig, Window};
use clap::{Parser, ValueEnum};
use rand_core::{OsRng, RngCore};
use thiserror::Error;
use zeroize::Zeroizing;

/// Minimum token secret length in production.
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set in production")]
    MissingSecret(&'static str),

    #[error("{0} must be at least {MIN_SECRET_LEN} bytes")]
    WeakSecret(&'static str),

    #[error("{0} must be greater than zero")]
    NonPositive(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Environment {
    Development,
    Production,
}

/// Raw server configuration.
///
/// Custom `Debug` redacts secrets and the connection strings that may
/// embed credentials.
#[derive(Clone, Parser)]
#[command(name = "care-api", about = "Care coordination API server", version)]
pub struct AppConfig {
    #[arg(long, env = "SERVER_ADDR", default_value = "0.0.0.0:8080")]
    pub server_addr: SocketAddr,

    /// Public base URL, used in the OpenAPI document.
    #[arg(long, env = "EXTERNAL_URL", default_value = "http://localhost:8080")]
    pub external_url: String,

    #[arg(long, env = "ENVIRONMENT", value_enum, default_value = "development")]
    pub environment: Environment,

    /// Postgres DSN. Absent means in-memory mode.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    #[arg(long, env = "ACCESS_TOKEN_SECRET")]
    pub access_token_secret: Option<String>,

    #[arg(long, env = "REFRESH_TOKEN_SECRET")]
    pub refresh_token_secret: Option<String>,

    #[arg(long, env = "ACCESS_TOKEN_TTL_MINUTES", default_value_t = 15)]
    pub access_token_ttl_minutes: i64,

    #[arg(long, env = "REFRESH_TOKEN_TTL_DAYS", default_value_t = 7)]
    pub refresh_token_ttl_days: i64,

    #[arg(long, env = "TOKEN_ISSUER", default_value = "care-api")]
    pub token_issuer: String,

    #[arg(long, env = "TOKEN_AUDIENCE", default_value = "care-clients")]
    pub token_audience: String,

    #[arg(long, env = "S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    #[arg(long, env = "S3_ACCESS_KEY")]
    pub s3_access_key: Option<String>,

    #[arg(long, env = "S3_SECRET_KEY")]
    pub s3_secret_key: Option<String>,

    #[arg(long, env = "S3_BUCKET", default_value = "care-attachments")]
    pub s3_bucket: String,

    #[arg(long, env = "S3_REGION", default_value = "us-east-1")]
    pub s3_region: String,

    #[arg(long, env = "S3_USE_TLS", default_value_t = true, action = clap::ArgAction::Set)]
    pub s3_use_tls: bool,

    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    #[arg(long, env = "RATE_LIMIT_ENABLED", default_value_t = true, action = clap::ArgAction::Set)]
    pub rate_limit_enabled: bool,

    #[arg(
        long,
        env = "RATE_LIMIT_FALLBACK_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub rate_limit_fallback_enabled: bool,

    #[arg(long, env = "LOGIN_IP_LIMIT", default_value_t = 20)]
    pub login_ip_limit: u32,

    #[arg(long, env = "LOGIN_IP_WINDOW_SECS", default_value_t = 900)]
    pub login_ip_window_secs: u64,

    #[arg(long, env = "LOGIN_EMAIL_LIMIT", default_value_t = 5)]
    pub login_email_limit: u32,

    #[arg(long, env = "LOGIN_EMAIL_WINDOW_SECS", default_value_t = 900)]
    pub login_email_window_secs: u64,

    #[arg(long, env = "BOOTSTRAP_ADMIN_EMAIL")]
    pub bootstrap_admin_email: Option<String>,

    #[arg(long, env = "BOOTSTRAP_ADMIN_PASSWORD")]
    pub bootstrap_admin_password: Option<String>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const REDACTED: &str = "[REDACTED]";
        let redact = |v: &Option<String>| v.as_ref().map(|_| REDACTED);
        f.debug_struct("AppConfig")
            .field("server_addr", &self.server_addr)
            .field("external_url", &self.external_url)
            .field("environment", &self.environment)
            .field("database_url", &redact(&self.database_url))
            .field("access_token_secret", &redact(&self.access_token_secret))
            .field("refresh_token_secret", &redact(&self.refresh_token_secret))
            .field("access_token_ttl_minutes", &self.access_token_ttl_minutes)
            .field("refresh_token_ttl_days", &self.refresh_token_ttl_days)
            .field("token_issuer", &self.token_issuer)
            .field("token_audience", &self.token_audience)
            .field("s3_endpoint", &self.s3_endpoint)
            .field("s3_access_key", &redact(&self.s3_access_key))
            .field("s3_secret_key", &redact(&self.s3_secret_key))
            .field("s3_bucket", &self.s3_bucket)
            .field("s3_region", &self.s3_region)
            .field("s3_use_tls", &self.s3_use_tls)
            .field("redis_url", &redact(&self.redis_url))
            .field("rate_limit_enabled", &self.rate_limit_enabled)
            .field("rate_limit_fallback_enabled", &self.rate_limit_fallback_enabled)
            .field("login_ip_limit", &self.login_ip_limit)
            .field("login_ip_window_secs", &self.login_ip_window_secs)
            .field("login_email_limit", &self.login_email_limit)
            .field("login_email_window_secs", &self.login_email_window_secs)
            .field("bootstrap_admin_email", &self.bootstrap_admin_email)
            .field("bootstrap_admin_password", &redact(&self.bootstrap_admin_password))
            .finish()
    }
}

/// Object store settings. `endpoint == None` selects the in-process store.
#[derive(Clone)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub bucket: String,
    pub region: String,
    pub use_tls: bool,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key.as_ref().map(|_| "[REDACTED]"))
            .field("secret_key", &self.secret_key.as_ref().map(|_| "[REDACTED]"))
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("use_tls", &self.use_tls)
            .finish()
    }
}

impl AppConfig {
    /// Development mode with every external service unset: in-memory
    /// datastore, object store and rate-limit store.
    pub fn development() -> Self {
        let mut config = Self::parse_from(["care-api"]);
        config.environment = Environment::Development;
        config.database_url = None;
        config.redis_url = None;
        config.s3_endpoint = None;
        config.access_token_secret = None;
        config.refresh_token_secret = None;
        config.bootstrap_admin_email = None;
        config.bootstrap_admin_password = None;
        config
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn token_config(&self) -> Result<TokenConfig, ConfigError> {
        if self.access_token_ttl_minutes <= 0 {
            return Err(ConfigError::NonPositive("ACCESS_TOKEN_TTL_MINUTES"));
        }
        if self.refresh_token_ttl_days <= 0 {
            return Err(ConfigError::NonPositive("REFRESH_TOKEN_TTL_DAYS"));
        }
        Ok(TokenConfig {
            access_secret: self.secret("ACCESS_TOKEN_SECRET", &self.access_token_secret)?,
            refresh_secret: self.secret("REFRESH_TOKEN_SECRET", &self.refresh_token_secret)?,
            access_ttl: chrono::Duration::minutes(self.access_token_ttl_minutes),
            refresh_ttl: chrono::Duration::days(self.refresh_token_ttl_days),
            issuer: self.token_issuer.clone(),
            audience: self.token_audience.clone(),
        })
    }

    pub fn rate_limit_config(&self) -> Result<RateLimitConfig, ConfigError> {
        if self.login_ip_limit == 0 {
            return Err(ConfigError::NonPositive("LOGIN_IP_LIMIT"));
        }
        if self.login_email_limit == 0 {
            return Err(ConfigError::NonPositive("LOGIN_EMAIL_LIMIT"));
        }
        if self.login_ip_window_secs == 0 {
            return Err(ConfigError::NonPositive("LOGIN_IP_WINDOW_SECS"));
        }
        if self.login_email_window_secs == 0 {
            return Err(ConfigError::NonPositive("LOGIN_EMAIL_WINDOW_SECS"));
        }
        Ok(RateLimitConfig {
            enabled: self.rate_limit_enabled,
            fallback_enabled: self.rate_limit_fallback_enabled,
            redis_url: self.redis_url.clone().filter(|u| !u.trim().is_empty()),
            ip: Window::new(
                self.login_ip_limit,
                Duration::from_secs(self.login_ip_window_secs),
            ),
            email: Window::new(
                self.login_email_limit,
                Duration::from_secs(self.login_email_window_secs),
            ),
        })
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            endpoint: self.s3_endpoint.clone().filter(|e| !e.trim().is_empty()),
            access_key: self.s3_access_key.clone(),
            secret_key: self.s3_secret_key.clone(),
            bucket: self.s3_bucket.clone(),
            region: self.s3_region.clone(),
            use_tls: self.s3_use_tls,
        }
    }

    fn secret(
        &self,
        name: &'static str,
        value: &Option<String>,
    ) -> Result<Zeroizing<Vec<u8>>, ConfigError> {
        match value.as_deref().filter(|v| !v.is_empty()) {
            Some(v) if self.is_production() && v.len() < MIN_SECRET_LEN => {
                Err(ConfigError::WeakSecret(name))
            }
            Some(v) => Ok(Zeroizing::new(v.as_bytes().to_vec())),
            None if self.is_production() => Err(ConfigError::MissingSecret(name)),
            None => {
                tracing::warn!(
                    secret = name,
                    "not set; using an ephemeral secret, tokens will not survive a restart"
                );
                let mut bytes = Zeroizing::new(vec![0u8; MIN_SECRET_LEN]);
                OsRng.fill_bytes(&mut bytes);
                Ok(bytes)
            }
        }
    }
}
