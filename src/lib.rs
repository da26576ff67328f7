//! Token Exchange Engine
//!
//! OAuth 2.0 Token Exchange (RFC 8693) delegation: a caller presents a
//! subject's signed JWT and receives a new token stating "actor acting on
//! behalf of subject", signed with an engine-managed key.
//!
//! # Components
//!
//! - **[`validator`]**: remote JWKS discovery, signature verification,
//!   expiry and issuer/audience binding checks
//! - **[`template`]**: renders actor and subject claim templates
//! - **[`keys`]**: RSA key generation and storage; private keys never leave it
//! - **[`jwks`]**: publishes public keys for downstream verifiers
//! - **[`issuer`]**: assembles `act`, `scope` and `subject_claims` and signs
//!
//! Storage, entity resolution and time are host-provided collaborators (see
//! [`storage::Storage`], [`entity::EntityResolver`], [`clock::Clock`]).
//! [`Engine`] ties everything together.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod engine;
pub mod entity;
pub mod error;
pub mod exchange_config;
pub mod issuer;
pub mod jwks;
pub mod keys;
pub mod role;
pub mod settings;
pub mod storage;
pub mod template;
pub mod validator;

#[cfg(test)]
mod test_support;

use std::sync::LazyLock;

use regex::Regex;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub use engine::{Engine, ExchangeTokenRequest, ExchangeTokenResponse};
pub use error::{Error, ErrorKind, Result};

/// A decoded JWT claim set.
pub type Claims = serde_json::Map<String, serde_json::Value>;

static NAME_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\w(([\w.-]+)?\w)?$").ok());

/// Validate a key or role name.
pub(crate) fn validate_name(what: &str, name: &str) -> Result<()> {
    let valid = NAME_PATTERN
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(name));
    if valid {
        Ok(())
    } else {
        Err(Error::malformed(format!(
            "invalid {what} name {name:?}: use letters, digits, '_', '.', '-', starting and ending with a word character"
        )))
    }
}

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `settings.level`.
pub fn setup_tracing(settings: &settings::LogSettings) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match settings.format.as_deref() {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Config(format!("failed to install tracing subscriber: {e}")))
}
