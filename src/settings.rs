//! Process settings
//!
//! Loaded once at startup from an optional YAML file, then overridden by
//! `TOKEN_EXCHANGE_*` environment variables (`__` separates nested keys, e.g.
//! `TOKEN_EXCHANGE_JWKS__CACHE_TTL=30s`).
//!
//! These are host-level knobs. The per-deployment engine configuration
//! (issuer, subject JWKS URI, default TTL) lives in storage; see
//! [`ExchangeConfig`](crate::exchange_config::ExchangeConfig).

use std::path::Path;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "TOKEN_EXCHANGE_";

/// Top-level settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Remote JWKS fetching
    pub jwks: JwksSettings,
    /// Signing key cache
    pub key_cache: KeyCacheSettings,
    /// Logging
    pub log: LogSettings,
}

/// Remote JWKS fetch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwksSettings {
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// How long a fetched key set is reused. Zero (the default) fetches on
    /// every validation, so a withdrawn key stops validating immediately.
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
    /// Refuse plain-HTTP JWKS URIs
    pub require_https: bool,
}

impl Default for JwksSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            cache_ttl: Duration::ZERO,
            require_https: true,
        }
    }
}

/// Signing key cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyCacheSettings {
    /// Maximum cached signers. Zero disables caching.
    pub capacity: usize,
}

impl Default for KeyCacheSettings {
    fn default() -> Self {
        Self { capacity: 64 }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// `json` for structured output, anything else for plain text
    pub format: Option<String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: None,
        }
    }
}

impl Settings {
    /// Load settings from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Settings file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        figment.extract().map_err(|e| Error::Config(e.to_string()))
    }

    /// Settings suitable for tests against a local plain-HTTP JWKS server.
    #[must_use]
    pub fn insecure_for_tests() -> Self {
        let mut settings = Self::default();
        settings.jwks.require_https = false;
        settings
    }
}
