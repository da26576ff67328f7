//! Subject token validation.
//!
//! [`TokenValidator::validate`] only proves the token was signed by a key in
//! the configured JWKS and returns the raw claim map. The temporal and binding
//! checks are separate functions so each can be exercised on its own:
//!
//! 1. signature + structure ([`TokenValidator::validate`])
//! 2. [`check_expiration`]
//! 3. [`check_bound_issuer`]
//! 4. [`check_bound_audiences`]
//!
//! [`TokenValidator::validate_for_role`] runs all four in that order and stops
//! at the first failure.

pub mod fetch;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation};
use serde_json::Value;
use tracing::debug;

use crate::keys::SigningAlgorithm;
use crate::settings::JwksSettings;
use crate::{Claims, Error, Result};

pub use fetch::JwksFetcher;

/// Issuer and audience constraints a role places on subject tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bindings<'a> {
    /// Exact `iss` required, if set
    pub issuer: Option<&'a str>,
    /// Acceptable `aud` values; empty accepts any
    pub audiences: &'a [String],
}

/// Validates subject tokens against a remote JWKS.
pub struct TokenValidator {
    fetcher: JwksFetcher,
}

impl TokenValidator {
    /// Create a validator from JWKS settings.
    pub fn new(settings: &JwksSettings) -> Result<Self> {
        Ok(Self {
            fetcher: JwksFetcher::new(settings)?,
        })
    }

    /// Verify `token` against the key set at `jwks_uri` and return its claims.
    ///
    /// Does not check `exp`, `iss` or `aud`.
    ///
    /// # Errors
    ///
    /// - [`Error::MalformedInput`] if the token is not a JWT
    /// - [`Error::UpstreamUnavailable`] if the key set cannot be fetched
    /// - [`Error::KeyNotFound`] if no key matches the header `kid`
    /// - [`Error::SignatureInvalid`] for a bad signature or algorithm
    pub async fn validate(&self, token: &str, jwks_uri: &str) -> Result<Claims> {
        let header = parse_header(token)?;

        let fetched = self.fetcher.get(jwks_uri, false).await?;
        match verify_with_header(token, &header, &fetched.keys) {
            Err(Error::KeyNotFound(_)) if fetched.cached => {
                debug!(kid = ?header.kid, "Key not found in cached JWKS, refreshing");
                let refreshed = self.fetcher.get(jwks_uri, true).await?;
                verify_with_header(token, &header, &refreshed.keys)
            }
            result => result,
        }
    }

    /// Full validation pipeline for one exchange.
    pub async fn validate_for_role(
        &self,
        token: &str,
        jwks_uri: &str,
        bindings: Bindings<'_>,
        now: i64,
    ) -> Result<Claims> {
        let claims = self.validate(token, jwks_uri).await?;
        check_expiration(&claims, now)?;
        check_bound_issuer(&claims, bindings.issuer)?;
        check_bound_audiences(&claims, bindings.audiences)?;
        Ok(claims)
    }
}

/// Verify `token` against an already-fetched key set.
pub fn verify_with_jwks(token: &str, jwks: &JwkSet) -> Result<Claims> {
    let header = parse_header(token)?;
    verify_with_header(token, &header, jwks)
}

fn parse_header(token: &str) -> Result<Header> {
    jsonwebtoken::decode_header(token).map_err(|e| match unsupported_alg(token) {
        Some(alg) => Error::SignatureInvalid(format!("token algorithm {alg:?} is not supported")),
        None => Error::malformed(format!("subject token is not a valid JWT: {e}")),
    })
}

/// The `alg` of a decodable header that `jsonwebtoken` has no variant for
/// (e.g. `none`).
fn unsupported_alg(token: &str) -> Option<String> {
    let segment = token.split('.').next()?;
    let bytes = URL_SAFE_NO_PAD.decode(segment.trim_end_matches('=')).ok()?;
    let header: Value = serde_json::from_slice(&bytes).ok()?;
    let alg = header.get("alg")?.as_str()?;
    alg.parse::<Algorithm>().is_err().then(|| alg.to_string())
}

fn verify_with_header(token: &str, header: &Header, jwks: &JwkSet) -> Result<Claims> {
    if SigningAlgorithm::from_jwt_algorithm(header.alg).is_none() {
        return Err(Error::SignatureInvalid(format!(
            "token algorithm {:?} is not supported",
            header.alg
        )));
    }

    let kid = header
        .kid
        .as_deref()
        .ok_or_else(|| Error::KeyNotFound("subject token header has no kid".to_string()))?;

    let key = find_decoding_key(jwks, kid, header.alg)?;

    let mut validation = Validation::new(header.alg);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    validation.leeway = 0;

    jsonwebtoken::decode::<Claims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(map_jwt_error)
}

/// Find the RSA key for `kid`, refusing keys published for another algorithm.
fn find_decoding_key(jwks: &JwkSet, kid: &str, alg: Algorithm) -> Result<DecodingKey> {
    let jwk = jwks
        .keys
        .iter()
        .find(|k| k.common.key_id.as_deref() == Some(kid))
        .ok_or_else(|| Error::KeyNotFound(format!("no JWKS entry for kid {kid:?}")))?;

    if let Some(key_alg) = &jwk.common.key_algorithm {
        if !key_algorithm_matches(key_alg, alg) {
            return Err(Error::SignatureInvalid(format!(
                "JWK {kid:?} is published for {key_alg:?}, token declares {alg:?}"
            )));
        }
    }

    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e)
            .map_err(|e| Error::SignatureInvalid(format!("JWK {kid:?} is unusable: {e}"))),
        _ => Err(Error::SignatureInvalid(format!("JWK {kid:?} is not an RSA key"))),
    }
}

fn key_algorithm_matches(key_alg: &KeyAlgorithm, alg: Algorithm) -> bool {
    matches!(
        (key_alg, alg),
        (KeyAlgorithm::RS256, Algorithm::RS256)
            | (KeyAlgorithm::RS384, Algorithm::RS384)
            | (KeyAlgorithm::RS512, Algorithm::RS512)
    )
}

fn map_jwt_error(e: jsonwebtoken::errors::Error) -> Error {
    use jsonwebtoken::errors::ErrorKind as Jwt;
    match e.kind() {
        Jwt::InvalidToken | Jwt::Base64(_) | Jwt::Json(_) | Jwt::Utf8(_) => {
            Error::malformed(format!("subject token is malformed: {e}"))
        }
        _ => Error::SignatureInvalid(e.to_string()),
    }
}

/// Fail with [`Error::Expired`] if `exp` is before `now` (Unix seconds).
///
/// `exp` may be an integer or a float. Missing or non-numeric is
/// [`Error::MalformedClaims`].
#[allow(clippy::cast_possible_truncation)]
pub fn check_expiration(claims: &Claims, now: i64) -> Result<()> {
    let exp = match claims.get("exp") {
        None => return Err(Error::MalformedClaims("missing exp claim".to_string())),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.floor() as i64))
            .ok_or_else(|| Error::MalformedClaims(format!("exp {n} is out of range")))?,
        Some(other) => {
            return Err(Error::MalformedClaims(format!(
                "exp has unsupported type: {other}"
            )));
        }
    };

    if now > exp {
        return Err(Error::Expired { expired_at: exp });
    }
    Ok(())
}

/// Require `iss` to equal `bound` exactly. No-op when unbound.
pub fn check_bound_issuer(claims: &Claims, bound: Option<&str>) -> Result<()> {
    let Some(expected) = bound.filter(|b| !b.is_empty()) else {
        return Ok(());
    };

    match claims.get("iss").and_then(Value::as_str) {
        Some(iss) if iss == expected => Ok(()),
        actual => Err(Error::IssuerMismatch {
            expected: expected.to_string(),
            actual: actual.unwrap_or("<absent>").to_string(),
        }),
    }
}

/// Require `aud` (string or array) to intersect `bound`. No-op when unbound.
pub fn check_bound_audiences(claims: &Claims, bound: &[String]) -> Result<()> {
    if bound.is_empty() {
        return Ok(());
    }

    let matches = match claims.get("aud") {
        Some(Value::String(s)) => bound.iter().any(|b| b == s),
        Some(Value::Array(arr)) => arr
            .iter()
            .filter_map(Value::as_str)
            .any(|s| bound.iter().any(|b| b == s)),
        _ => false,
    };

    if matches {
        Ok(())
    } else {
        Err(Error::AudienceMismatch(format!(
            "token aud {} not in bound audiences {bound:?}",
            claims.get("aud").map_or_else(|| "<absent>".to_string(), Value::to_string)
        )))
    }
}
