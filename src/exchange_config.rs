//! Engine configuration persisted in storage.
//!
//! Unlike [`Settings`](crate::settings::Settings), which a host loads at
//! startup, this record is written through the engine's config operations and
//! read on every exchange.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::storage::{self, Storage};
use crate::{Error, Result};

/// Storage key of the configuration record.
pub const CONFIG_KEY: &str = "config";

/// Default lifetime of issued tokens.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// `iss` and `act.iss` of issued tokens
    pub issuer: String,
    /// JWKS used to verify subject tokens
    pub subject_jwks_uri: String,
    /// Token lifetime for roles without their own `ttl`
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
}

/// Request to write the configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigRequest {
    /// Issuer (required)
    pub issuer: String,
    /// Subject JWKS URI (required, absolute http or https URL)
    pub subject_jwks_uri: String,
    /// Defaults to 24h
    #[serde(with = "humantime_serde")]
    pub default_ttl: Option<Duration>,
}

impl TryFrom<ConfigRequest> for ExchangeConfig {
    type Error = Error;

    fn try_from(request: ConfigRequest) -> Result<Self> {
        let issuer = request.issuer.trim();
        if issuer.is_empty() {
            return Err(Error::malformed("issuer is required"));
        }

        let uri = request.subject_jwks_uri.trim();
        if uri.is_empty() {
            return Err(Error::malformed("subject_jwks_uri is required"));
        }
        let parsed = Url::parse(uri)
            .map_err(|e| Error::malformed(format!("subject_jwks_uri is not a URL: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::malformed(format!(
                "subject_jwks_uri must be http or https, got {}",
                parsed.scheme()
            )));
        }

        let default_ttl = request.default_ttl.unwrap_or(DEFAULT_TTL);
        if default_ttl.as_secs() == 0 {
            return Err(Error::malformed("default_ttl must be at least one second"));
        }

        Ok(Self {
            issuer: issuer.to_string(),
            subject_jwks_uri: uri.to_string(),
            default_ttl,
        })
    }
}

/// Reads and writes the configuration record.
pub struct ConfigStore {
    storage: Arc<dyn Storage>,
}

impl ConfigStore {
    /// Create a config store.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Validate and persist, replacing any existing configuration.
    pub async fn write(&self, request: ConfigRequest) -> Result<ExchangeConfig> {
        let config = ExchangeConfig::try_from(request)?;
        storage::put_json(self.storage.as_ref(), CONFIG_KEY, &config).await?;
        info!(issuer = %config.issuer, jwks_uri = %config.subject_jwks_uri, "Engine configuration written");
        Ok(config)
    }

    /// Current configuration, if any.
    pub async fn read(&self) -> Result<Option<ExchangeConfig>> {
        storage::get_json(self.storage.as_ref(), CONFIG_KEY).await
    }

    /// Current configuration, or [`Error::NotFound`].
    pub async fn require(&self) -> Result<ExchangeConfig> {
        self.read()
            .await?
            .ok_or_else(|| Error::NotFound("engine not configured".to_string()))
    }

    /// Remove the configuration.
    pub async fn delete(&self) -> Result<()> {
        self.storage.delete(CONFIG_KEY).await?;
        info!("Engine configuration deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn request() -> ConfigRequest {
        ConfigRequest {
            issuer: "https://exchange.example".into(),
            subject_jwks_uri: "https://idp.example/.well-known/jwks.json".into(),
            default_ttl: None,
        }
    }

    #[tokio::test]
    async fn write_applies_default_ttl() {
        let store = ConfigStore::new(Arc::new(MemoryStorage::new()));
        let config = store.write(request()).await.unwrap();
        assert_eq!(config.default_ttl, DEFAULT_TTL);
        assert_eq!(store.read().await.unwrap(), Some(config));
    }

    #[tokio::test]
    async fn require_without_config_is_not_found() {
        let store = ConfigStore::new(Arc::new(MemoryStorage::new()));
        let err = store.require().await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn delete_clears_config() {
        let store = ConfigStore::new(Arc::new(MemoryStorage::new()));
        store.write(request()).await.unwrap();
        store.delete().await.unwrap();
        assert!(store.read().await.unwrap().is_none());
    }

    #[test]
    fn rejects_missing_issuer_and_bad_uri() {
        let mut req = request();
        req.issuer = "  ".into();
        assert!(ExchangeConfig::try_from(req).is_err());

        let mut req = request();
        req.subject_jwks_uri = "not a url".into();
        assert!(ExchangeConfig::try_from(req).is_err());

        let mut req = request();
        req.subject_jwks_uri = "file:///etc/jwks.json".into();
        let err = ExchangeConfig::try_from(req).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::MalformedInput);
    }

    #[test]
    fn ttl_parses_humantime() {
        let req: ConfigRequest = serde_json::from_value(serde_json::json!({
            "issuer": "i",
            "subject_jwks_uri": "http://localhost/jwks",
            "default_ttl": "15m"
        }))
        .unwrap();
        assert_eq!(req.default_ttl, Some(Duration::from_secs(900)));
    }
}
