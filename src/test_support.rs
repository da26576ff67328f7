//! Shared fixtures for unit tests.

use std::sync::LazyLock;

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rsa::RsaPrivateKey;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::LineEnding;
use serde_json::{Value, json};

use crate::Claims;
use crate::jwks::Jwk;
use crate::keys::SigningAlgorithm;

/// An identity-provider key that signs subject tokens.
pub struct TestSigner {
    pub kid: String,
    key: RsaPrivateKey,
    encoding: EncodingKey,
}

static SHARED: LazyLock<TestSigner> = LazyLock::new(|| TestSigner::generate("idp-key-1"));

impl TestSigner {
    pub fn generate(kid: &str) -> Self {
        let key = RsaPrivateKey::new(&mut rsa::rand_core::OsRng, 2048).unwrap();
        let pem = key.to_pkcs1_pem(LineEnding::LF).unwrap();
        let encoding = EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap();
        Self {
            kid: kid.to_string(),
            key,
            encoding,
        }
    }

    pub fn shared() -> &'static Self {
        &SHARED
    }

    pub fn sign(&self, claims: &Claims) -> String {
        self.sign_with_kid(claims, &self.kid)
    }

    pub fn sign_with_kid(&self, claims: &Claims, kid: &str) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        jsonwebtoken::encode(&header, claims, &self.encoding).unwrap()
    }

    pub fn jwk_set_value(&self) -> Value {
        let jwk = Jwk::from_rsa(&self.kid, SigningAlgorithm::Rs256, &self.key.to_public_key());
        json!({ "keys": [jwk] })
    }

    pub fn jwk_set(&self) -> JwkSet {
        serde_json::from_value(self.jwk_set_value()).unwrap()
    }
}

/// Build a claim map from a JSON object literal.
pub fn claims(value: Value) -> Claims {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}
