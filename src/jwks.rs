//! Public JWKS for verifying tokens minted by this engine.
//!
//! Read-only and safe to serve unauthenticated. No keys yields an empty set,
//! not an error. A key whose stored record cannot be decoded is skipped with a
//! warning so one bad record never takes the whole endpoint down.

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rsa::RsaPublicKey;
use rsa::traits::PublicKeyParts;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::Result;
use crate::keys::{KeyStore, SigningAlgorithm};

/// One RSA public key in JWK form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type, always `RSA`
    pub kty: String,
    /// Public key use, always `sig`
    #[serde(rename = "use")]
    pub key_use: String,
    /// Signature algorithm
    pub alg: String,
    /// Key id
    pub kid: String,
    /// Modulus, base64url without padding
    pub n: String,
    /// Public exponent, base64url without padding
    pub e: String,
}

impl Jwk {
    /// Build a signing JWK from an RSA public key.
    #[must_use]
    pub fn from_rsa(kid: &str, algorithm: SigningAlgorithm, key: &RsaPublicKey) -> Self {
        Self {
            kty: "RSA".to_string(),
            key_use: "sig".to_string(),
            alg: algorithm.as_str().to_string(),
            kid: kid.to_string(),
            n: URL_SAFE_NO_PAD.encode(key.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(key.e().to_bytes_be()),
        }
    }
}

/// A JSON Web Key Set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    /// Public keys, ordered by key name
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    /// Find a key by id.
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid == kid)
    }
}

/// Publishes the engine's signing keys as a JWKS.
pub struct JwksPublisher {
    keys: Arc<KeyStore>,
}

impl JwksPublisher {
    /// Create a publisher over `keys`.
    #[must_use]
    pub fn new(keys: Arc<KeyStore>) -> Self {
        Self { keys }
    }

    /// Current public key set, optionally filtered to one key id.
    ///
    /// # Errors
    ///
    /// Only a failure to list keys from storage is an error.
    pub async fn public_key_set(&self, kid: Option<&str>) -> Result<JwkSet> {
        let mut set = JwkSet::default();

        for name in self.keys.list().await? {
            let record = match self.keys.record(&name).await {
                Ok(Some(record)) => record,
                // deleted between list and read
                Ok(None) => continue,
                Err(e) => {
                    warn!(key = %name, error = %e, "Skipping unreadable signing key");
                    continue;
                }
            };

            if kid.is_some_and(|kid| kid != record.key_id) {
                continue;
            }

            match record.public_key() {
                Ok(public) => set
                    .keys
                    .push(Jwk::from_rsa(&record.key_id, record.algorithm, &public)),
                Err(e) => {
                    warn!(key = %name, error = %e, "Skipping malformed signing key");
                }
            }
        }

        Ok(set)
    }
}
