//! Error types for the token exchange engine

use thiserror::Error;

/// Result type alias for the token exchange engine
pub type Result<T> = std::result::Result<T, Error>;

/// Token exchange errors
///
/// Every validation failure has its own variant so that a host can tell an
/// audience mismatch from an expired token without parsing message text.
/// Use [`Error::kind`] to branch on the category.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing required field, bad JSON template, bad JWT structure
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Role, key, or engine configuration is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Subject token signature did not verify
    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    /// Subject token `exp` is in the past
    #[error("Subject token expired at {expired_at}")]
    Expired {
        /// Expiry as Unix epoch seconds
        expired_at: i64,
    },

    /// `exp` claim missing or of an unrecognized type
    #[error("Malformed claims: {0}")]
    MalformedClaims(String),

    /// Subject token `iss` does not equal the role's bound issuer
    #[error("Issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch {
        /// Bound issuer configured on the role
        expected: String,
        /// Issuer found in the token (`<absent>` when missing)
        actual: String,
    },

    /// Subject token `aud` does not intersect the role's bound audiences
    #[error("Audience mismatch: {0}")]
    AudienceMismatch(String),

    /// No key matches the requested key id or key name
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Algorithm outside the supported RSA family
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// RSA modulus size outside 2048/3072/4096
    #[error("Unsupported key size: {0}")]
    UnsupportedKeySize(u32),

    /// Name already in use
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Remote JWKS could not be fetched or decoded
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Storage collaborator failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Entity resolution collaborator failure
    #[error("Entity resolution failed: {0}")]
    EntityResolution(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable error category, independent of message text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`Error::MalformedInput`]
    MalformedInput,
    /// See [`Error::NotFound`]
    NotFound,
    /// See [`Error::SignatureInvalid`]
    SignatureInvalid,
    /// See [`Error::Expired`]
    Expired,
    /// See [`Error::MalformedClaims`]
    MalformedClaims,
    /// See [`Error::IssuerMismatch`]
    IssuerMismatch,
    /// See [`Error::AudienceMismatch`]
    AudienceMismatch,
    /// See [`Error::KeyNotFound`]
    KeyNotFound,
    /// See [`Error::UnsupportedAlgorithm`]
    UnsupportedAlgorithm,
    /// See [`Error::UnsupportedKeySize`]
    UnsupportedKeySize,
    /// See [`Error::AlreadyExists`]
    AlreadyExists,
    /// See [`Error::UpstreamUnavailable`]
    UpstreamUnavailable,
    /// See [`Error::Storage`]
    Storage,
    /// See [`Error::EntityResolution`]
    EntityResolution,
    /// Configuration, JSON and internal failures
    Internal,
}

impl ErrorKind {
    /// Snake-case identifier suitable for wire responses and log fields
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MalformedInput => "malformed_input",
            Self::NotFound => "not_found",
            Self::SignatureInvalid => "signature_invalid",
            Self::Expired => "expired",
            Self::MalformedClaims => "malformed_claims",
            Self::IssuerMismatch => "issuer_mismatch",
            Self::AudienceMismatch => "audience_mismatch",
            Self::KeyNotFound => "key_not_found",
            Self::UnsupportedAlgorithm => "unsupported_algorithm",
            Self::UnsupportedKeySize => "unsupported_key_size",
            Self::AlreadyExists => "already_exists",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::Storage => "storage",
            Self::EntityResolution => "entity_resolution",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Create a malformed input error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedInput(message.into())
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Category of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedInput(_) => ErrorKind::MalformedInput,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::SignatureInvalid(_) => ErrorKind::SignatureInvalid,
            Self::Expired { .. } => ErrorKind::Expired,
            Self::MalformedClaims(_) => ErrorKind::MalformedClaims,
            Self::IssuerMismatch { .. } => ErrorKind::IssuerMismatch,
            Self::AudienceMismatch(_) => ErrorKind::AudienceMismatch,
            Self::KeyNotFound(_) => ErrorKind::KeyNotFound,
            Self::UnsupportedAlgorithm(_) => ErrorKind::UnsupportedAlgorithm,
            Self::UnsupportedKeySize(_) => ErrorKind::UnsupportedKeySize,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            Self::Storage(_) => ErrorKind::Storage,
            Self::EntityResolution(_) => ErrorKind::EntityResolution,
            Self::Config(_) | Self::Json(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the error describes a problem with the caller's input
    /// (as opposed to an engine or collaborator failure)
    #[must_use]
    pub fn is_user_facing(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::Storage
                | ErrorKind::EntityResolution
                | ErrorKind::UpstreamUnavailable
                | ErrorKind::Internal
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_have_distinct_kinds() {
        // GIVEN: one error from each validation step
        let errors = [
            Error::SignatureInvalid("bad".into()),
            Error::Expired { expired_at: 0 },
            Error::IssuerMismatch {
                expected: "a".into(),
                actual: "b".into(),
            },
            Error::AudienceMismatch("none".into()),
        ];

        // WHEN: mapped to kinds
        let mut kinds: Vec<&str> = errors.iter().map(|e| e.kind().as_str()).collect();
        kinds.dedup();

        // THEN: no two share a category
        assert_eq!(kinds.len(), 4);
    }

    #[test]
    fn collaborator_failures_are_not_user_facing() {
        assert!(!Error::storage("disk").is_user_facing());
        assert!(!Error::UpstreamUnavailable("timeout".into()).is_user_facing());
        assert!(Error::malformed("missing sub").is_user_facing());
        assert!(Error::AudienceMismatch("x".into()).is_user_facing());
    }

    #[test]
    fn issuer_mismatch_message_names_both_issuers() {
        let err = Error::IssuerMismatch {
            expected: "https://trusted".into(),
            actual: "https://untrusted".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("https://trusted"));
        assert!(msg.contains("https://untrusted"));
    }
}
