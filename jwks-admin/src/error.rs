//! Error handling for JWKS administration
//!
//! Every failure kind a caller may branch on is a distinct variant.

use thiserror::Error;

/// Type alias for Results with key-set administration errors
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for key-set administration
#[derive(Error, Debug)]
pub enum Error {
    /// A key with the same `kid` is already part of the key set
    #[error("Key with kid '{0}' already exists")]
    DuplicateKeyId(String),

    /// No key with the given `kid` exists in the key set
    #[error("Key with kid '{0}' does not exist")]
    KeyNotFound(String),

    /// A patch document could not be applied; `index` is the failing operation
    #[error("Invalid patch operation at index {index}: {reason}")]
    InvalidPatch {
        /// Zero-based position of the failing operation in the patch document
        index: usize,
        /// What went wrong
        reason: String,
    },

    /// A key entry is structurally invalid
    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// Importing a credential into the keystore failed
    #[error("Import failed: {0}")]
    Import(#[from] ImportFailure),

    /// The stored document changed since it was loaded
    #[error("Concurrent modification detected: {0}")]
    ConcurrencyConflict(String),

    /// The configuration store or keystore could not be reached or written
    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    /// A store call did not complete in time; its outcome is unknown
    #[error("Store call '{operation}' timed out after {timeout_ms} ms")]
    StoreTimeout {
        /// The store operation that timed out
        operation: &'static str,
        /// The configured call timeout
        timeout_ms: u64,
    },

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serde JSON error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Reasons a credential import can fail
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImportFailure {
    /// The declared import format is not recognized
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The certificate and private key belong to different key pairs
    #[error("Certificate public key does not match the private key")]
    KeyCertMismatch,

    /// The certificate's key algorithm cannot be imported
    #[error("Unsupported key algorithm: {0}")]
    UnsupportedKeyAlgorithm(String),

    /// The certificate or private key text could not be decoded
    #[error("Malformed key material: {0}")]
    MalformedMaterial(String),

    /// The alias is empty or contains only whitespace
    #[error("Invalid alias: {0:?}")]
    InvalidAlias(String),

    /// The keystore already holds a credential under this alias
    #[error("Alias '{0}' is already in use")]
    AliasInUse(String),

    /// No credential is stored under this alias
    #[error("No credential stored under alias '{0}'")]
    CredentialNotFound(String),
}

impl Error {
    /// Creates an invalid patch error for the operation at `index`
    pub fn invalid_patch(index: usize, reason: impl Into<String>) -> Self {
        Error::InvalidPatch {
            index,
            reason: reason.into(),
        }
    }

    /// Whether the error is a compare-and-swap conflict that a fresh
    /// read-modify-write cycle may resolve
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::ConcurrencyConflict(_))
    }
}
