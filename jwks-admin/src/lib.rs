//! JWKS administration
//!
//! This crate maintains an identity provider's published key set (JWKS):
//! adding, patching and removing key entries while several administrators
//! may be editing the same configuration document, and importing
//! certificate/private-key pairs into a credential keystore.
//!
//! All mutations of the key set go through [`KeySetRepository`], which
//! applies them with optimistic concurrency against a [`ConfigurationStore`].

/// Configuration
pub mod config;

/// Error types
pub mod error;

/// Pure key-set consistency rules
pub mod guard;

/// Credential import
pub mod importer;

/// Single key entries and their JSON codec
pub mod key_entry;

/// Ordered, kid-indexed key set
pub mod key_set;

/// Credential keystore
pub mod key_store;

/// JSON Patch over key entries and key sets
pub mod patch;

/// Compare-and-swap key-set repository
pub mod repository;

mod retry;

/// Configuration document stores
pub mod store;

/// Test utilities
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{ImporterConfig, RepositoryConfig};
pub use error::{Error, ImportFailure, Result};
pub use importer::{public_key_entry, CredentialSummary, ImportRequest, KeyStoreImporter};
pub use key_entry::{KeyEntry, KeyType, KeyUse};
pub use key_set::KeySet;
pub use key_store::{
    CredentialAlgorithm, FileKeyStore, InMemoryKeyStore, KeyStore, KeyStoreEntry,
};
pub use patch::{Patch, PatchOperation};
pub use repository::KeySetRepository;
pub use store::{
    ConfigurationRecord, ConfigurationStore, FileConfigurationStore, InMemoryConfigurationStore,
    VersionToken,
};

/// Version of the JWKS administration library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
