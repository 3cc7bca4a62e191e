//! Error types for the core kit.
//!
//! Every fallible operation returns [`CoreKitResult`]. Variants map onto the
//! taxonomy callers branch on (authentication, topology, missing state, factor
//! validity, key format, signing client preconditions) plus the ambient
//! storage and serialization failures.

use thiserror::Error;

/// Core kit error type.
#[derive(Error, Debug)]
pub enum CoreKitError {
    // Login errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Node topology resolution failed: {0}")]
    TopologyResolution(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    // Session state errors
    #[error("Missing state: {0}")]
    MissingState(&'static str),

    // Factor errors
    #[error("Invalid factor: {0}")]
    InvalidFactor(String),

    #[error("Factor key does not match public key {expected}")]
    KeyMismatch { expected: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("MFA already enabled")]
    MfaAlreadyEnabled,

    // Key format errors
    #[error("Public key should be in uncompressed format, got {length} hex characters")]
    InvalidPublicKeyFormat { length: usize },

    // Signing client errors
    #[error("TSS client not connected")]
    ClientNotConnected,

    #[error("TSS client not ready after precompute")]
    ClientNotReady,

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Timed out after {0} ms")]
    Timeout(u128),

    // Threshold key engine errors
    #[error("Threshold key error: {0}")]
    ThresholdKey(String),

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    // Input validation errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreKitError {
    /// Stable error code for callers that branch on error kind.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "AUTHENTICATION_ERROR",
            Self::TopologyResolution(_) => "TOPOLOGY_RESOLUTION_ERROR",
            Self::InvalidEndpoint(_) => "INVALID_ENDPOINT",
            Self::MissingState(_) => "MISSING_STATE",
            Self::InvalidFactor(_) => "INVALID_FACTOR",
            Self::KeyMismatch { .. } => "KEY_MISMATCH",
            Self::NotFound(_) => "NOT_FOUND",
            Self::MfaAlreadyEnabled => "MFA_ALREADY_ENABLED",
            Self::InvalidPublicKeyFormat { .. } => "INVALID_PUBLIC_KEY_FORMAT",
            Self::ClientNotConnected => "CLIENT_NOT_CONNECTED",
            Self::ClientNotReady => "CLIENT_NOT_READY",
            Self::SigningFailed(_) => "SIGNING_FAILED",
            Self::Timeout(_) => "TIMEOUT",
            Self::ThresholdKey(_) => "THRESHOLD_KEY_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Deserialization(_) => "DESERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether a recovery attempt that failed with this error should be
    /// treated as "nothing to recover from" rather than a broken factor.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::MissingState(_))
    }
}

// Conversion from common error types

impl From<std::io::Error> for CoreKitError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for CoreKitError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::Deserialization(err.to_string())
        } else {
            Self::Serialization(err.to_string())
        }
    }
}

impl From<redb::Error> for CoreKitError {
    fn from(err: redb::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::DatabaseError> for CoreKitError {
    fn from(err: redb::DatabaseError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::TableError> for CoreKitError {
    fn from(err: redb::TableError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::TransactionError> for CoreKitError {
    fn from(err: redb::TransactionError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::CommitError> for CoreKitError {
    fn from(err: redb::CommitError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::StorageError> for CoreKitError {
    fn from(err: redb::StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for CoreKitError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Authentication(format!("Invalid id token: {err}"))
    }
}

impl From<k256::elliptic_curve::Error> for CoreKitError {
    fn from(err: k256::elliptic_curve::Error) -> Self {
        Self::InvalidInput(format!("Invalid secp256k1 key material: {err}"))
    }
}

impl From<hex::FromHexError> for CoreKitError {
    fn from(err: hex::FromHexError) -> Self {
        Self::InvalidInput(format!("Invalid hex: {err}"))
    }
}

/// Result type alias for core kit operations.
pub type CoreKitResult<T> = Result<T, CoreKitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            CoreKitError::InvalidFactor("test".to_string()).error_code(),
            "INVALID_FACTOR"
        );
        assert_eq!(
            CoreKitError::MissingState("tkey").error_code(),
            "MISSING_STATE"
        );
        assert_eq!(CoreKitError::ClientNotReady.error_code(), "CLIENT_NOT_READY");
    }

    #[test]
    fn test_not_found_classification() {
        assert!(CoreKitError::NotFound("device factor".to_string()).is_not_found());
        assert!(CoreKitError::MissingState("metadata public key").is_not_found());
        assert!(!CoreKitError::InvalidFactor("bad".to_string()).is_not_found());
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert!(matches!(
            CoreKitError::from(err),
            CoreKitError::Deserialization(_)
        ));
    }
}
