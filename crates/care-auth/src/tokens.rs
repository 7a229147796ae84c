//! # Token Manager
//!
//! Two bearer tokens per session, both HS256 with a distinct secret:
//!
//! | Token   | TTL     | Claims                                                   |
//! |---------|---------|----------------------------------------------------------|
//! | access  | minutes | `iss, aud, sub, employeeId, iat, exp`                    |
//! | refresh | days    | access claims + `tokenFamily, tokenHash`                 |
//!
//! Verification pins the algorithm to HS256 and checks `exp`, `iss` and
//! `aud`. Any failure (expired, bad signature, wrong algorithm, wrong
//! audience or issuer, malformed) collapses to [`TokenError::InvalidToken`];
//! the precise reason is logged at debug level only.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid token")]
    InvalidToken,

    #[error("token signing failed: {0}")]
    Signing(String),

    #[error("token configuration error: {0}")]
    Config(String),
}

/// Access-token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessClaims {
    pub iss: String,
    pub aud: String,
    /// User id.
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_id: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

/// Refresh-token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshClaims {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_id: Option<String>,
    pub token_family: String,
    pub token_hash: String,
    pub iat: i64,
    pub exp: i64,
}

/// A freshly issued access + refresh pair.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    /// Access-token lifetime in seconds.
    pub expires_in: i64,
    pub refresh_expires_at: DateTime<Utc>,
}

/// Secrets, lifetimes and the `iss`/`aud` pair.
///
/// Custom `Debug` redacts both secrets.
#[derive(Clone)]
pub struct TokenConfig {
    pub access_secret: Zeroizing<Vec<u8>>,
    pub refresh_secret: Zeroizing<Vec<u8>>,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub issuer: String,
    pub audience: String,
}

impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("access_secret", &"[REDACTED]")
            .field("refresh_secret", &"[REDACTED]")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish()
    }
}

/// Issues and verifies token pairs. Cheap to clone.
#[derive(Clone)]
pub struct TokenManager {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
    refresh_ttl: Duration,
    issuer: String,
    audience: String,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    pub fn new(config: &TokenConfig) -> Result<Self, TokenError> {
        if config.access_secret.is_empty() || config.refresh_secret.is_empty() {
            return Err(TokenError::Config("token secrets must not be empty".into()));
        }
        if config.access_secret.as_slice() == config.refresh_secret.as_slice() {
            return Err(TokenError::Config(
                "access and refresh secrets must differ".into(),
            ));
        }
        if config.access_ttl <= Duration::zero() || config.refresh_ttl <= Duration::zero() {
            return Err(TokenError::Config("token lifetimes must be positive".into()));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_audience(&[config.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.leeway = 0;

        Ok(Self {
            access_encoding: EncodingKey::from_secret(&config.access_secret),
            access_decoding: DecodingKey::from_secret(&config.access_secret),
            refresh_encoding: EncodingKey::from_secret(&config.refresh_secret),
            refresh_decoding: DecodingKey::from_secret(&config.refresh_secret),
            validation,
            access_ttl: config.access_ttl,
            refresh_ttl: config.refresh_ttl,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
        })
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Issue a pair for `user_id` in refresh family `family` with the
    /// opaque rotation hash `hash`.
    pub fn issue_pair(
        &self,
        user_id: &str,
        employee_id: Option<&str>,
        family: &str,
        hash: &str,
        now: DateTime<Utc>,
    ) -> Result<TokenPair, TokenError> {
        let access_exp = now + self.access_ttl;
        let refresh_exp = now + self.refresh_ttl;

        let access = AccessClaims {
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            sub: user_id.to_string(),
            employee_id: employee_id.map(str::to_string),
            iat: now.timestamp(),
            exp: access_exp.timestamp(),
        };
        let refresh = RefreshClaims {
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            sub: user_id.to_string(),
            employee_id: employee_id.map(str::to_string),
            token_family: family.to_string(),
            token_hash: hash.to_string(),
            iat: now.timestamp(),
            exp: refresh_exp.timestamp(),
        };

        let header = Header::new(Algorithm::HS256);
        let access_token = encode(&header, &access, &self.access_encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        let refresh_token = encode(&header, &refresh, &self.refresh_encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer",
            expires_in: self.access_ttl.num_seconds(),
            refresh_expires_at: refresh_exp,
        })
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        decode::<AccessClaims>(token, &self.access_decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "access token rejected");
                TokenError::InvalidToken
            })
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        decode::<RefreshClaims>(token, &self.refresh_decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "refresh token rejected");
                TokenError::InvalidToken
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TokenConfig {
        TokenConfig {
            access_secret: Zeroizing::new(b"access-secret-access-secret-0123".to_vec()),
            refresh_secret: Zeroizing::new(b"refresh-secret-refresh-secret-01".to_vec()),
            access_ttl: Duration::minutes(15),
            refresh_ttl: Duration::days(7),
            issuer: "care-api".into(),
            audience: "care-clients".into(),
        }
    }

    fn manager() -> TokenManager {
        TokenManager::new(&config()).unwrap()
    }

    #[test]
    fn pair_round_trips_claims() {
        let m = manager();
        let pair = m
            .issue_pair("user-1", Some("emp-1"), "fam-1", "hash-1", Utc::now())
            .unwrap();
        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.expires_in, 900);

        let access = m.verify_access(&pair.access_token).unwrap();
        assert_eq!(access.sub, "user-1");
        assert_eq!(access.employee_id.as_deref(), Some("emp-1"));

        let refresh = m.verify_refresh(&pair.refresh_token).unwrap();
        assert_eq!(refresh.token_family, "fam-1");
        assert_eq!(refresh.token_hash, "hash-1");
    }

    #[test]
    fn token_kinds_are_not_interchangeable() {
        let m = manager();
        let pair = m.issue_pair("u", None, "f", "h", Utc::now()).unwrap();
        assert_eq!(m.verify_access(&pair.refresh_token), Err(TokenError::InvalidToken));
        assert_eq!(m.verify_refresh(&pair.access_token), Err(TokenError::InvalidToken));
    }

    #[test]
    fn expired_token_is_rejected() {
        let m = manager();
        let issued = Utc::now() - Duration::hours(2);
        let pair = m.issue_pair("u", None, "f", "h", issued).unwrap();
        assert_eq!(m.verify_access(&pair.access_token), Err(TokenError::InvalidToken));
        assert!(m.verify_refresh(&pair.refresh_token).is_ok());
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let m = manager();
        let pair = m.issue_pair("u", None, "f", "h", Utc::now()).unwrap();
        let sig_start = pair.access_token.rfind('.').unwrap() + 1;
        let mut token = pair.access_token.clone();
        let first = token.remove(sig_start);
        token.insert(sig_start, if first == 'A' { 'B' } else { 'A' });
        assert_eq!(m.verify_access(&token), Err(TokenError::InvalidToken));
        assert_eq!(m.verify_access("not.a.jwt"), Err(TokenError::InvalidToken));
        assert_eq!(m.verify_access(""), Err(TokenError::InvalidToken));
    }

    #[test]
    fn algorithm_mismatch_is_rejected() {
        let m = manager();
        let now = Utc::now();
        let claims = AccessClaims {
            iss: "care-api".into(),
            aud: "care-clients".into(),
            sub: "u".into(),
            employee_id: None,
            iat: now.timestamp(),
            exp: (now + Duration::minutes(5)).timestamp(),
        };
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(&config().access_secret),
        )
        .unwrap();
        assert_eq!(m.verify_access(&token), Err(TokenError::InvalidToken));
    }

    #[test]
    fn wrong_audience_or_issuer_is_rejected() {
        let m = manager();
        let other = TokenManager::new(&TokenConfig {
            audience: "someone-else".into(),
            ..config()
        })
        .unwrap();
        let pair = other.issue_pair("u", None, "f", "h", Utc::now()).unwrap();
        assert_eq!(m.verify_access(&pair.access_token), Err(TokenError::InvalidToken));

        let other = TokenManager::new(&TokenConfig {
            issuer: "rogue".into(),
            ..config()
        })
        .unwrap();
        let pair = other.issue_pair("u", None, "f", "h", Utc::now()).unwrap();
        assert_eq!(m.verify_access(&pair.access_token), Err(TokenError::InvalidToken));
    }

    #[test]
    fn config_validation() {
        let same = TokenConfig {
            refresh_secret: config().access_secret.clone(),
            ..config()
        };
        assert!(matches!(TokenManager::new(&same), Err(TokenError::Config(_))));
        let empty = TokenConfig {
            access_secret: Zeroizing::new(Vec::new()),
            ..config()
        };
        assert!(matches!(TokenManager::new(&empty), Err(TokenError::Config(_))));
    }

    #[test]
    fn debug_redacts_secrets() {
        let rendered = format!("{:?}", config());
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("access-secret"));
    }
}
