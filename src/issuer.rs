//! Delegated token assembly and signing.
//!
//! Output claims:
//!
//! | Claim | Source |
//! |-------|--------|
//! | `iss` | engine issuer |
//! | `sub` | subject token `sub`, verbatim |
//! | `iat`, `exp` | clock, `iat + ttl` |
//! | `aud` | actor claims `aud`, if present |
//! | `act` | `{sub, iss}` only; `iss` is always the engine issuer, see [`ActorSubject`] |
//! | `scope` | role scopes joined by `" "`, omitted when empty |
//! | `subject_claims` | rendered subject template, omitted when empty |
//! | anything else | remaining actor claims, minus [`RESERVED_CLAIMS`] |

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::Header;
use serde_json::{Map, Value};
use tracing::debug;

use crate::clock::Clock;
use crate::keys::KeyStore;
use crate::role::DelegationRole;
use crate::{Claims, Error, Result};

/// Top-level claims a template can never set or override.
pub const RESERVED_CLAIMS: &[&str] = &[
    "iss",
    "sub",
    "iat",
    "exp",
    "nbf",
    "aud",
    "act",
    "scope",
    "subject_claims",
];

/// Where `act.sub` came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorSubject {
    /// The actor template rendered a non-empty `act.sub` string
    Template(String),
    /// Synthesized as `entity:<id>` from the caller's entity id
    Synthesized(String),
}

impl ActorSubject {
    /// Pick the actor subject for a token.
    #[must_use]
    pub fn resolve(actor_claims: &Claims, entity_id: &str) -> Self {
        match actor_claims
            .get("act")
            .and_then(|act| act.get("sub"))
            .and_then(Value::as_str)
        {
            Some(sub) if !sub.is_empty() => Self::Template(sub.to_string()),
            _ => Self::Synthesized(format!("entity:{entity_id}")),
        }
    }

    /// The subject string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Template(s) | Self::Synthesized(s) => s,
        }
    }

    /// Whether the fallback was used.
    #[must_use]
    pub fn is_synthesized(&self) -> bool {
        matches!(self, Self::Synthesized(_))
    }
}

/// Inputs to one issuance.
#[derive(Debug, Clone, Copy)]
pub struct IssueRequest<'a> {
    /// Role the exchange runs under
    pub role: &'a DelegationRole,
    /// Validated subject token claims
    pub subject_claims: &'a Claims,
    /// Rendered actor template
    pub actor_claims: &'a Claims,
    /// Rendered subject template
    pub rendered_subject_claims: &'a Claims,
    /// Caller entity id
    pub entity_id: &'a str,
    /// Token lifetime
    pub ttl: Duration,
}

/// Build the claim set of a delegated token.
///
/// # Errors
///
/// [`Error::MalformedInput`] if the subject token has no string `sub`, or the
/// actor template produced an `aud` that is not a string or string array.
pub fn build_claims(issuer: &str, request: &IssueRequest<'_>, now: i64) -> Result<Claims> {
    let sub = request
        .subject_claims
        .get("sub")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::malformed("subject token has no string sub claim"))?;

    let ttl = i64::try_from(request.ttl.as_secs())
        .map_err(|_| Error::malformed("ttl is out of range"))?;

    let mut claims = Map::new();
    claims.insert("iss".into(), Value::from(issuer));
    claims.insert("sub".into(), Value::from(sub));
    claims.insert("iat".into(), Value::from(now));
    claims.insert("exp".into(), Value::from(now.saturating_add(ttl)));

    if let Some(aud) = request.actor_claims.get("aud") {
        claims.insert("aud".into(), audience(aud)?);
    }

    let actor = ActorSubject::resolve(request.actor_claims, request.entity_id);
    let mut act = Map::new();
    act.insert("sub".into(), Value::from(actor.as_str()));
    act.insert("iss".into(), Value::from(issuer));
    claims.insert("act".into(), Value::Object(act));

    if !request.role.scopes.is_empty() {
        claims.insert("scope".into(), Value::from(request.role.scopes.join(" ")));
    }

    if !request.rendered_subject_claims.is_empty() {
        claims.insert(
            "subject_claims".into(),
            Value::Object(request.rendered_subject_claims.clone()),
        );
    }

    for (key, value) in request.actor_claims {
        if !RESERVED_CLAIMS.contains(&key.as_str()) {
            claims.insert(key.clone(), value.clone());
        }
    }

    Ok(claims)
}

fn audience(aud: &Value) -> Result<Value> {
    match aud {
        Value::String(_) => Ok(aud.clone()),
        Value::Array(items) if items.iter().all(Value::is_string) => Ok(aud.clone()),
        other => Err(Error::malformed(format!(
            "actor template aud must be a string or string array, got {other}"
        ))),
    }
}

/// Signs delegated tokens with role-selected keys.
pub struct TokenIssuer {
    keys: Arc<KeyStore>,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    /// Create an issuer.
    #[must_use]
    pub fn new(keys: Arc<KeyStore>, clock: Arc<dyn Clock>) -> Self {
        Self { keys, clock }
    }

    /// Build and sign a delegated token.
    ///
    /// # Errors
    ///
    /// [`Error::KeyNotFound`] if the role's key has been deleted, or any
    /// error from [`build_claims`].
    pub async fn issue(&self, issuer: &str, request: &IssueRequest<'_>) -> Result<String> {
        let signer = self.keys.signer(&request.role.key_name).await?;
        let claims = build_claims(issuer, request, self.clock.unix_now())?;

        let mut header = Header::new(signer.algorithm.jwt_algorithm());
        header.kid = Some(signer.key_id.clone());
        header.typ = Some("JWT".to_string());

        let token = jsonwebtoken::encode(&header, &claims, signer.encoding_key())
            .map_err(|e| Error::Internal(format!("failed to sign token: {e}")))?;

        debug!(
            role = %request.role.name,
            kid = %signer.key_id,
            alg = %signer.algorithm,
            "Delegated token signed"
        );
        Ok(token)
    }
}
