//! Delegation roles.
//!
//! A role names the signing key, token lifetime, subject-token bindings,
//! templates and scopes for one kind of exchange. Roles are validated when
//! written: the key must exist and both templates must compile. At exchange
//! time a role is read-only.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::keys::KeyStore;
use crate::storage::{self, Storage};
use crate::template::ClaimTemplate;
use crate::validator::Bindings;
use crate::{Error, Result};

/// Storage prefix for role records.
pub const ROLE_PREFIX: &str = "roles/";

/// A stored delegation role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationRole {
    /// Role name
    pub name: String,
    /// Signing key used for tokens issued under this role
    pub key_name: String,
    /// Token lifetime; falls back to the engine default when unset
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub ttl: Option<Duration>,
    /// Required subject-token `iss`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_issuer: Option<String>,
    /// Acceptable subject-token `aud` values
    #[serde(default)]
    pub bound_audiences: Vec<String>,
    /// Template for actor claims
    pub actor_template: String,
    /// Template for `subject_claims`
    pub subject_template: String,
    /// Delegation scopes, emitted space-joined as `scope`
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl DelegationRole {
    /// Subject-token bindings for the validator.
    #[must_use]
    pub fn bindings(&self) -> Bindings<'_> {
        Bindings {
            issuer: self.bound_issuer.as_deref(),
            audiences: &self.bound_audiences,
        }
    }

    /// Token lifetime, given the engine default.
    #[must_use]
    pub fn effective_ttl(&self, default_ttl: Duration) -> Duration {
        self.ttl.unwrap_or(default_ttl)
    }

    fn validate(&self) -> Result<()> {
        crate::validate_name("role", &self.name)?;
        if self.key_name.is_empty() {
            return Err(Error::malformed("key_name is required"));
        }
        if self.ttl.is_some_and(|ttl| ttl.as_secs() == 0) {
            return Err(Error::malformed("ttl must be at least one second"));
        }
        if let Some(scope) = self
            .scopes
            .iter()
            .find(|s| s.is_empty() || s.chars().any(char::is_whitespace))
        {
            return Err(Error::malformed(format!(
                "scope {scope:?} must be non-empty and contain no whitespace"
            )));
        }
        if self.bound_audiences.iter().any(String::is_empty) {
            return Err(Error::malformed("bound_audiences must not contain empty values"));
        }
        ClaimTemplate::compile(&self.actor_template)
            .map_err(|e| Error::malformed(format!("actor_template: {e}")))?;
        ClaimTemplate::compile(&self.subject_template)
            .map_err(|e| Error::malformed(format!("subject_template: {e}")))?;
        Ok(())
    }
}

/// Fields for creating or updating a role. On update, `None` keeps the
/// stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleRequest {
    /// Signing key name (required on create)
    pub key_name: Option<String>,
    /// Token lifetime
    #[serde(with = "humantime_serde")]
    pub ttl: Option<Duration>,
    /// Required subject-token issuer; an empty string clears it
    pub bound_issuer: Option<String>,
    /// Acceptable subject-token audiences
    pub bound_audiences: Option<Vec<String>>,
    /// Actor claims template (required on create)
    pub actor_template: Option<String>,
    /// Subject claims template (required on create)
    pub subject_template: Option<String>,
    /// Delegation scopes
    pub scopes: Option<Vec<String>>,
}

impl RoleRequest {
    fn apply(self, role: &mut DelegationRole) {
        if let Some(key_name) = self.key_name {
            role.key_name = key_name;
        }
        if self.ttl.is_some() {
            role.ttl = self.ttl;
        }
        if let Some(issuer) = self.bound_issuer {
            role.bound_issuer = Some(issuer).filter(|i| !i.is_empty());
        }
        if let Some(audiences) = self.bound_audiences {
            role.bound_audiences = audiences;
        }
        if let Some(template) = self.actor_template {
            role.actor_template = template;
        }
        if let Some(template) = self.subject_template {
            role.subject_template = template;
        }
        if let Some(scopes) = self.scopes {
            role.scopes = scopes;
        }
    }
}

/// Role CRUD over the storage collaborator.
pub struct RoleStore {
    storage: Arc<dyn Storage>,
    keys: Arc<KeyStore>,
}

impl RoleStore {
    /// Create a role store. `keys` is consulted to validate `key_name`.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, keys: Arc<KeyStore>) -> Self {
        Self { storage, keys }
    }

    /// Create a new role.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyExists`] if the name is taken
    /// - [`Error::MalformedInput`] for missing fields or bad templates
    /// - [`Error::KeyNotFound`] if `key_name` does not exist
    pub async fn create(&self, name: &str, request: RoleRequest) -> Result<DelegationRole> {
        crate::validate_name("role", name)?;
        if self.read(name).await?.is_some() {
            return Err(Error::AlreadyExists(format!("role {name:?}")));
        }

        let key_name = request
            .key_name
            .clone()
            .ok_or_else(|| Error::malformed("key_name is required"))?;
        if request.actor_template.is_none() {
            return Err(Error::malformed("actor_template is required"));
        }
        if request.subject_template.is_none() {
            return Err(Error::malformed("subject_template is required"));
        }

        let mut role = DelegationRole {
            name: name.to_string(),
            key_name,
            ttl: None,
            bound_issuer: None,
            bound_audiences: Vec::new(),
            actor_template: String::new(),
            subject_template: String::new(),
            scopes: Vec::new(),
        };
        request.apply(&mut role);

        self.save(&role).await?;
        info!(role = %role.name, key = %role.key_name, "Role created");
        Ok(role)
    }

    /// Update fields of an existing role.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the role does not exist, otherwise as
    /// [`create`](Self::create).
    pub async fn update(&self, name: &str, request: RoleRequest) -> Result<DelegationRole> {
        let mut role = self
            .read(name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("role {name:?}")))?;
        request.apply(&mut role);

        self.save(&role).await?;
        info!(role = %role.name, key = %role.key_name, "Role updated");
        Ok(role)
    }

    /// Read a role. Absent roles yield `Ok(None)`.
    pub async fn read(&self, name: &str) -> Result<Option<DelegationRole>> {
        storage::get_json(self.storage.as_ref(), &storage_key(name)).await
    }

    /// Delete a role.
    pub async fn delete(&self, name: &str) -> Result<()> {
        self.storage.delete(&storage_key(name)).await?;
        info!(role = %name, "Role deleted");
        Ok(())
    }

    /// Names of all roles, sorted.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut names = self.storage.list(ROLE_PREFIX).await?;
        names.sort();
        Ok(names)
    }

    async fn save(&self, role: &DelegationRole) -> Result<()> {
        role.validate()?;
        if !self.keys.exists(&role.key_name).await? {
            return Err(Error::KeyNotFound(format!(
                "role {:?} references unknown key {:?}",
                role.name, role.key_name
            )));
        }
        storage::put_json(self.storage.as_ref(), &storage_key(&role.name), role).await
    }
}

fn storage_key(name: &str) -> String {
    format!("{ROLE_PREFIX}{name}")
}
