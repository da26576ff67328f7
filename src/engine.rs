//! Engine facade
//!
//! [`Engine`] wires the collaborators together and exposes the outward
//! operations: token exchange, key and role management, the public JWKS and
//! the persisted configuration. Request and response types are serde-ready so
//! a host can carry them over any transport.
//!
//! # Exchange flow
//!
//! ```text
//! role ─► config ─► validate subject token ─► resolve entity
//!      ─► render actor + subject templates ─► sign with role key
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::entity::EntityResolver;
use crate::exchange_config::{ConfigRequest, ConfigStore, ExchangeConfig};
use crate::issuer::{ActorSubject, IssueRequest, TokenIssuer};
use crate::jwks::{JwkSet, JwksPublisher};
use crate::keys::{CreateKeyRequest, CreateKeyResponse, KeyInfo, KeyStore};
use crate::role::{DelegationRole, RoleRequest, RoleStore};
use crate::settings::Settings;
use crate::storage::Storage;
use crate::template::{self, ClaimTemplate};
use crate::validator::TokenValidator;
use crate::{Error, Result};

/// A token exchange request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeTokenRequest {
    /// Role to exchange under
    pub role: String,
    /// The subject's signed JWT
    pub subject_token: String,
}

/// A successful token exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeTokenResponse {
    /// The delegated JWT
    pub token: String,
}

/// The token exchange engine.
pub struct Engine {
    keys: Arc<KeyStore>,
    roles: RoleStore,
    config: ConfigStore,
    jwks: JwksPublisher,
    validator: TokenValidator,
    issuer: TokenIssuer,
    entities: Arc<dyn EntityResolver>,
    clock: Arc<dyn Clock>,
}

impl Engine {
    /// Create an engine using the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the JWKS HTTP client cannot be built.
    pub fn new(
        settings: &Settings,
        storage: Arc<dyn Storage>,
        entities: Arc<dyn EntityResolver>,
    ) -> Result<Self> {
        Self::with_clock(settings, storage, entities, Arc::new(SystemClock))
    }

    /// Create an engine with an explicit clock.
    pub fn with_clock(
        settings: &Settings,
        storage: Arc<dyn Storage>,
        entities: Arc<dyn EntityResolver>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let keys = Arc::new(KeyStore::new(
            Arc::clone(&storage),
            Arc::clone(&clock),
            settings.key_cache.capacity,
        ));
        Ok(Self {
            roles: RoleStore::new(Arc::clone(&storage), Arc::clone(&keys)),
            config: ConfigStore::new(storage),
            jwks: JwksPublisher::new(Arc::clone(&keys)),
            validator: TokenValidator::new(&settings.jwks)?,
            issuer: TokenIssuer::new(Arc::clone(&keys), Arc::clone(&clock)),
            keys,
            entities,
            clock,
        })
    }

    /// Exchange a subject token for a delegated token.
    ///
    /// `entity_id` identifies the authenticated caller (the actor).
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] for an unknown role or missing configuration
    /// - any validation error from [`TokenValidator`](crate::validator::TokenValidator)
    /// - [`Error::EntityResolution`] if the caller cannot be resolved
    /// - [`Error::MalformedInput`] if a template cannot be rendered
    /// - [`Error::KeyNotFound`] if the role's signing key was deleted
    #[instrument(skip_all, fields(role = %request.role, entity_id = %entity_id))]
    pub async fn exchange_token(
        &self,
        entity_id: &str,
        request: &ExchangeTokenRequest,
    ) -> Result<ExchangeTokenResponse> {
        match self.exchange(entity_id, request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                warn!(kind = %e.kind(), error = %e, "Token exchange denied");
                Err(e)
            }
        }
    }

    async fn exchange(
        &self,
        entity_id: &str,
        request: &ExchangeTokenRequest,
    ) -> Result<ExchangeTokenResponse> {
        if request.subject_token.is_empty() {
            return Err(Error::malformed("subject_token is required"));
        }

        let role = self
            .roles
            .read(&request.role)
            .await?
            .ok_or_else(|| Error::NotFound(format!("role {:?}", request.role)))?;
        let config = self.config.require().await?;

        let subject_claims = self
            .validator
            .validate_for_role(
                &request.subject_token,
                &config.subject_jwks_uri,
                role.bindings(),
                self.clock.unix_now(),
            )
            .await?;

        let entity = self.entities.resolve(entity_id).await?;

        let actor_claims = ClaimTemplate::compile(&role.actor_template)?
            .render(&entity.template_context())?;
        let rendered_subject_claims = ClaimTemplate::compile(&role.subject_template)?
            .render(&template::subject_context(&subject_claims))?;

        let issue = IssueRequest {
            role: &role,
            subject_claims: &subject_claims,
            actor_claims: &actor_claims,
            rendered_subject_claims: &rendered_subject_claims,
            entity_id: &entity.id,
            ttl: role.effective_ttl(config.default_ttl),
        };
        let token = self.issuer.issue(&config.issuer, &issue).await?;

        let actor = ActorSubject::resolve(&actor_claims, &entity.id);
        info!(
            key = %role.key_name,
            act_sub = %actor.as_str(),
            act_synthesized = actor.is_synthesized(),
            "Delegated token issued"
        );

        Ok(ExchangeTokenResponse { token })
    }

    // Keys

    /// Generate a signing key.
    pub async fn create_key(&self, request: CreateKeyRequest) -> Result<CreateKeyResponse> {
        self.keys.create(request).await
    }

    /// Public view of a key, or `None`.
    pub async fn read_key(&self, name: &str) -> Result<Option<KeyInfo>> {
        self.keys.read(name).await
    }

    /// Delete a key. Roles referencing it will fail at exchange time.
    pub async fn delete_key(&self, name: &str) -> Result<()> {
        self.keys.delete(name).await
    }

    /// Names of all keys.
    pub async fn list_keys(&self) -> Result<Vec<String>> {
        self.keys.list().await
    }

    /// Public JWKS, optionally filtered to one `kid`. Needs no authentication.
    pub async fn get_jwks(&self, kid: Option<&str>) -> Result<JwkSet> {
        self.jwks.public_key_set(kid).await
    }

    // Roles

    /// Create a role.
    pub async fn create_role(&self, name: &str, request: RoleRequest) -> Result<DelegationRole> {
        self.roles.create(name, request).await
    }

    /// Read a role, or `None`.
    pub async fn read_role(&self, name: &str) -> Result<Option<DelegationRole>> {
        self.roles.read(name).await
    }

    /// Update a role.
    pub async fn update_role(&self, name: &str, request: RoleRequest) -> Result<DelegationRole> {
        self.roles.update(name, request).await
    }

    /// Delete a role.
    pub async fn delete_role(&self, name: &str) -> Result<()> {
        self.roles.delete(name).await
    }

    /// Names of all roles.
    pub async fn list_roles(&self) -> Result<Vec<String>> {
        self.roles.list().await
    }

    // Config

    /// Write the engine configuration.
    pub async fn write_config(&self, request: ConfigRequest) -> Result<ExchangeConfig> {
        self.config.write(request).await
    }

    /// Read the engine configuration, or `None`.
    pub async fn read_config(&self) -> Result<Option<ExchangeConfig>> {
        self.config.read().await
    }

    /// Delete the engine configuration.
    pub async fn delete_config(&self) -> Result<()> {
        self.config.delete().await
    }
}
