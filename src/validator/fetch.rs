//! Remote JWKS fetching with an optional per-URI TTL cache.
//!
//! Every failure (transport, non-2xx status, undecodable body) surfaces as
//! [`Error::UpstreamUnavailable`]. A cached set is only served while fresh;
//! there is no stale fallback when a refresh fails.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use jsonwebtoken::jwk::JwkSet;
use tracing::debug;

use crate::settings::JwksSettings;
use crate::{Error, Result};

struct CachedJwks {
    keys: Arc<JwkSet>,
    fetched_at: Instant,
}

/// A fetched key set and whether it came from the cache.
pub struct Fetched {
    /// The key set
    pub keys: Arc<JwkSet>,
    /// `true` when served from cache without a network request
    pub cached: bool,
}

/// JWKS fetcher with an optional cache keyed by URI.
pub struct JwksFetcher {
    http: reqwest::Client,
    cache: DashMap<String, CachedJwks>,
    ttl: Duration,
}

impl JwksFetcher {
    /// Build a fetcher from settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the HTTP client cannot be built.
    pub fn new(settings: &JwksSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .https_only(settings.require_https)
            .timeout(settings.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build JWKS HTTP client: {e}")))?;
        Ok(Self {
            http,
            cache: DashMap::new(),
            ttl: settings.cache_ttl,
        })
    }

    /// Whether fetched sets are cached at all.
    #[must_use]
    pub fn caching_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Return the key set for `uri`, from cache when fresh unless
    /// `force_refresh` is set.
    pub async fn get(&self, uri: &str, force_refresh: bool) -> Result<Fetched> {
        if !force_refresh && self.caching_enabled() {
            if let Some(entry) = self.cache.get(uri) {
                if entry.fetched_at.elapsed() < self.ttl {
                    debug!(jwks_uri = %uri, "JWKS served from cache");
                    return Ok(Fetched {
                        keys: Arc::clone(&entry.keys),
                        cached: true,
                    });
                }
            }
        }

        let keys = Arc::new(self.fetch(uri).await?);

        if self.caching_enabled() {
            self.cache.insert(
                uri.to_string(),
                CachedJwks {
                    keys: Arc::clone(&keys),
                    fetched_at: Instant::now(),
                },
            );
        }

        Ok(Fetched {
            keys,
            cached: false,
        })
    }

    /// Drop every cached set.
    pub fn clear(&self) {
        self.cache.clear();
    }

    async fn fetch(&self, uri: &str) -> Result<JwkSet> {
        debug!(jwks_uri = %uri, "Fetching JWKS");

        let response = self
            .http
            .get(uri)
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("JWKS fetch from {uri} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::UpstreamUnavailable(format!(
                "JWKS endpoint {uri} returned {status}"
            )));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("JWKS from {uri} is not a key set: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(require_https: bool) -> JwksSettings {
        JwksSettings {
            timeout: Duration::from_secs(1),
            cache_ttl: Duration::ZERO,
            require_https,
        }
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_upstream_unavailable() {
        // GIVEN: nothing listening on the target port
        let fetcher = JwksFetcher::new(&settings(false)).unwrap();

        // WHEN: fetching
        let err = fetcher
            .get("http://127.0.0.1:1/jwks", false)
            .await
            .err()
            .unwrap();

        // THEN: a hard upstream failure
        assert_eq!(err.kind(), crate::ErrorKind::UpstreamUnavailable);
    }

    #[tokio::test]
    async fn https_only_refuses_plain_http() {
        let fetcher = JwksFetcher::new(&settings(true)).unwrap();
        let err = fetcher
            .get("http://127.0.0.1:1/jwks", false)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::UpstreamUnavailable);
    }

    #[test]
    fn zero_ttl_disables_cache() {
        let fetcher = JwksFetcher::new(&settings(false)).unwrap();
        assert!(!fetcher.caching_enabled());
    }
}
