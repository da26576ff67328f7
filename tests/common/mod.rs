//! Shared fixtures for engine integration tests.
//!
//! - [`TestIdp`]: an RSA identity provider that signs subject tokens
//! - [`MockJwks`]: an axum server publishing the IdP key set on 127.0.0.1
//! - [`Harness`]: a configured [`Engine`] with one signing key `k1`

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use axum::http::StatusCode;
use axum::{Json, Router, routing::get};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use parking_lot::RwLock;
use rsa::RsaPrivateKey;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::LineEnding;
use rsa::traits::PublicKeyParts;
use serde_json::{Value, json};

use token_exchange::Engine;
use token_exchange::entity::{Entity, StaticEntityResolver};
use token_exchange::exchange_config::ConfigRequest;
use token_exchange::keys::CreateKeyRequest;
use token_exchange::role::RoleRequest;
use token_exchange::settings::Settings;
use token_exchange::storage::MemoryStorage;

pub const ENGINE_ISSUER: &str = "https://exchange.example";
pub const IDP_ISSUER: &str = "https://idp";
pub const ENTITY_ID: &str = "entity-456";

/// Identity provider signing subject tokens.
pub struct TestIdp {
    pub kid: String,
    key: RsaPrivateKey,
    encoding: EncodingKey,
}

static PRIMARY_IDP: LazyLock<TestIdp> = LazyLock::new(|| TestIdp::generate("idp-key-1"));
static SECONDARY_IDP: LazyLock<TestIdp> = LazyLock::new(|| TestIdp::generate("idp-key-2"));

impl TestIdp {
    fn generate(kid: &str) -> Self {
        let key = RsaPrivateKey::new(&mut rsa::rand_core::OsRng, 2048).unwrap();
        let pem = key.to_pkcs1_pem(LineEnding::LF).unwrap();
        let encoding = EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap();
        Self {
            kid: kid.to_string(),
            key,
            encoding,
        }
    }

    pub fn primary() -> &'static Self {
        &PRIMARY_IDP
    }

    pub fn secondary() -> &'static Self {
        &SECONDARY_IDP
    }

    pub fn jwk(&self) -> Value {
        let public = self.key.to_public_key();
        json!({
            "kty": "RSA",
            "use": "sig",
            "alg": "RS256",
            "kid": self.kid,
            "n": URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
            "e": URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
        })
    }

    pub fn sign(&self, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid.clone());
        jsonwebtoken::encode(&header, claims, &self.encoding).unwrap()
    }
}

/// Unix time now.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// A subject token body that passes every check by default.
pub fn subject_claims() -> Value {
    json!({
        "sub": "user-123",
        "iss": IDP_ISSUER,
        "aud": ["svc-a"],
        "exp": now() + 300,
        "iat": now(),
        "email": "user@example.com",
        "groups": ["eng", "ops"]
    })
}

/// A JWKS endpoint whose key set can be swapped while running.
pub struct MockJwks {
    pub base_url: String,
    keys: Arc<RwLock<Value>>,
    hits: Arc<AtomicUsize>,
}

impl MockJwks {
    pub async fn start(initial: Value) -> Self {
        let keys = Arc::new(RwLock::new(initial));
        let hits = Arc::new(AtomicUsize::new(0));

        let served = Arc::clone(&keys);
        let counter = Arc::clone(&hits);
        let app = Router::new()
            .route(
                "/jwks",
                get(move || {
                    let served = Arc::clone(&served);
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Json(served.read().clone())
                    }
                }),
            )
            .route("/broken", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
            .route("/not-json", get(|| async { "hello" }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            keys,
            hits,
        }
    }

    pub fn url(&self) -> String {
        format!("{}/jwks", self.base_url)
    }

    pub fn set_keys(&self, keys: Value) {
        *self.keys.write() = keys;
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// A configured engine with one RS256 key `k1`.
pub struct Harness {
    pub engine: Engine,
    pub jwks: MockJwks,
    pub entities: Arc<StaticEntityResolver>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_settings(Settings::insecure_for_tests()).await
    }

    pub async fn with_settings(settings: Settings) -> Self {
        let jwks = MockJwks::start(json!({ "keys": [TestIdp::primary().jwk()] })).await;

        let entities = Arc::new(StaticEntityResolver::new());
        entities.insert(
            Entity::new(ENTITY_ID)
                .with_name("build-agent")
                .with_metadata("team", "platform"),
        );

        let engine = Engine::new(&settings, Arc::new(MemoryStorage::new()), entities.clone()).unwrap();

        engine.create_key(CreateKeyRequest::new("k1")).await.unwrap();
        engine
            .write_config(ConfigRequest {
                issuer: ENGINE_ISSUER.to_string(),
                subject_jwks_uri: jwks.url(),
                default_ttl: None,
            })
            .await
            .unwrap();

        Self {
            engine,
            jwks,
            entities,
        }
    }

    /// Create a role on `k1` with the given scopes and the standard templates.
    pub async fn role(&self, name: &str, scopes: &[&str]) {
        self.role_with(name, |r| {
            r.scopes = Some(scopes.iter().map(|s| (*s).to_string()).collect());
        })
        .await;
    }

    /// Create a role on `k1`, customised by `edit`.
    pub async fn role_with(&self, name: &str, edit: impl FnOnce(&mut RoleRequest)) {
        let mut request = RoleRequest {
            key_name: Some("k1".to_string()),
            ttl: Some(Duration::from_secs(3600)),
            actor_template: Some(r#"{"act": {"sub": "agent:{{identity.entity.id}}"}}"#.to_string()),
            subject_template: Some("{}".to_string()),
            ..RoleRequest::default()
        };
        edit(&mut request);
        self.engine.create_role(name, request).await.unwrap();
    }
}

/// Verify an engine-issued token against the engine's own JWKS and return
/// its header and claims.
pub async fn verify_issued(engine: &Engine, token: &str) -> (Header, Value) {
    let header = jsonwebtoken::decode_header(token).unwrap();
    let kid = header.kid.clone().unwrap();

    let set = engine.get_jwks(Some(&kid)).await.unwrap();
    assert_eq!(set.keys.len(), 1, "issued kid must be published");
    let jwk = &set.keys[0];

    let key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e).unwrap();
    let mut validation = Validation::new(header.alg);
    validation.validate_aud = false;
    let data = jsonwebtoken::decode::<Value>(token, &key, &validation).unwrap();
    (header, data.claims)
}
