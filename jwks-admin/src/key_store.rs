//! Credential keystore
//!
//! This module defines the [`KeyStore`] trait holding imported
//! certificate/private-key pairs under an alias, together with an
//! in-memory and a file-backed implementation.
//!
//! # Security Considerations
//!
//! [`FileKeyStore`] keeps private keys as plaintext PKCS#8 PEM inside a
//! JSON file:
//! - **No encryption at rest**: access control relies on file permissions
//! - **Single document**: every write replaces the whole file atomically
//!
//! Deployments that need stronger guarantees should implement [`KeyStore`]
//! over an HSM, a cloud KMS or a platform keychain.
//!
//! Keystore contents are independent of the published key set. A key entry
//! refers to a credential only by alias (by convention the alias is the
//! entry's `kid`), and removing one never removes the other.

use crate::error::{Error, ImportFailure, Result};
use crate::store::write_atomically;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Key algorithm family of an imported credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialAlgorithm {
    /// RSA of any modulus size
    #[serde(rename = "RSA")]
    Rsa,
    /// ECDSA over NIST P-256
    #[serde(rename = "EC-P256")]
    EcP256,
    /// ECDSA over secp256k1
    #[serde(rename = "EC-secp256k1")]
    EcSecp256k1,
    /// Ed25519
    #[serde(rename = "Ed25519")]
    Ed25519,
}

impl CredentialAlgorithm {
    /// The JWA algorithm a key entry built from this credential uses by default
    pub fn default_jwa(&self) -> &'static str {
        match self {
            CredentialAlgorithm::Rsa => "RS256",
            CredentialAlgorithm::EcP256 => "ES256",
            CredentialAlgorithm::EcSecp256k1 => "ES256K",
            CredentialAlgorithm::Ed25519 => "EdDSA",
        }
    }
}

impl fmt::Display for CredentialAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CredentialAlgorithm::Rsa => "RSA",
            CredentialAlgorithm::EcP256 => "EC-P256",
            CredentialAlgorithm::EcSecp256k1 => "EC-secp256k1",
            CredentialAlgorithm::Ed25519 => "Ed25519",
        };
        f.write_str(name)
    }
}

/// A certificate and its private key stored under an alias
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyStoreEntry {
    /// Unique name of the credential
    pub alias: String,
    /// Key algorithm family
    pub algorithm: CredentialAlgorithm,
    /// Certificate chain as PEM, leaf first
    pub certificate_pem: String,
    /// Private key as PKCS#8 PEM
    pub private_key_pem: String,
    /// When the credential was imported
    pub imported_at: DateTime<Utc>,
}

impl fmt::Debug for KeyStoreEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStoreEntry")
            .field("alias", &self.alias)
            .field("algorithm", &self.algorithm)
            .field("certificate_pem", &self.certificate_pem)
            .field("private_key_pem", &"[REDACTED]")
            .field("imported_at", &self.imported_at)
            .finish()
    }
}

/// Trait for credential storage backends
///
/// All operations are async to support network-based backends.
///
/// # Error Handling
///
/// Implementations should:
/// - Return `ImportFailure::CredentialNotFound` for missing aliases
/// - Return `ImportFailure::AliasInUse` from `store_entry` when the alias is
///   taken and `replace_existing` is false, checked atomically with the write
/// - Return `Error::PersistenceUnavailable` for backend failures
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Stores `entry` under its alias
    async fn store_entry(&self, entry: KeyStoreEntry, replace_existing: bool) -> Result<()>;

    /// Loads the credential stored under `alias`
    async fn load_entry(&self, alias: &str) -> Result<KeyStoreEntry>;

    /// Removes the credential stored under `alias` and returns it
    async fn delete_entry(&self, alias: &str) -> Result<KeyStoreEntry>;

    /// Checks whether `alias` is in use
    async fn contains_alias(&self, alias: &str) -> Result<bool>;

    /// Lists all credentials ordered by alias
    async fn list_entries(&self) -> Result<Vec<KeyStoreEntry>>;

    /// Lists all aliases in order
    async fn list_aliases(&self) -> Result<Vec<String>> {
        Ok(self
            .list_entries()
            .await?
            .into_iter()
            .map(|entry| entry.alias)
            .collect())
    }
}

#[async_trait]
impl<K: KeyStore + ?Sized> KeyStore for std::sync::Arc<K> {
    async fn store_entry(&self, entry: KeyStoreEntry, replace_existing: bool) -> Result<()> {
        (**self).store_entry(entry, replace_existing).await
    }

    async fn load_entry(&self, alias: &str) -> Result<KeyStoreEntry> {
        (**self).load_entry(alias).await
    }

    async fn delete_entry(&self, alias: &str) -> Result<KeyStoreEntry> {
        (**self).delete_entry(alias).await
    }

    async fn contains_alias(&self, alias: &str) -> Result<bool> {
        (**self).contains_alias(alias).await
    }

    async fn list_entries(&self) -> Result<Vec<KeyStoreEntry>> {
        (**self).list_entries().await
    }
}

fn not_found(alias: &str) -> Error {
    Error::Import(ImportFailure::CredentialNotFound(alias.to_string()))
}

fn insert_entry(
    entries: &mut BTreeMap<String, KeyStoreEntry>,
    entry: KeyStoreEntry,
    replace_existing: bool,
) -> Result<()> {
    if !replace_existing && entries.contains_key(&entry.alias) {
        return Err(Error::Import(ImportFailure::AliasInUse(entry.alias)));
    }
    entries.insert(entry.alias.clone(), entry);
    Ok(())
}

/// Process-local keystore
#[derive(Debug, Default)]
pub struct InMemoryKeyStore {
    entries: Mutex<BTreeMap<String, KeyStoreEntry>>,
    unavailable: AtomicBool,
}

impl InMemoryKeyStore {
    /// Creates an empty keystore
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the backend going away (`false`) or coming back (`true`)
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, KeyStoreEntry>>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::PersistenceUnavailable(
                "in-memory keystore is marked unavailable".to_string(),
            ));
        }
        self.entries
            .lock()
            .map_err(|_| Error::PersistenceUnavailable("keystore lock poisoned".to_string()))
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn store_entry(&self, entry: KeyStoreEntry, replace_existing: bool) -> Result<()> {
        insert_entry(&mut *self.entries()?, entry, replace_existing)
    }

    async fn load_entry(&self, alias: &str) -> Result<KeyStoreEntry> {
        self.entries()?.get(alias).cloned().ok_or_else(|| not_found(alias))
    }

    async fn delete_entry(&self, alias: &str) -> Result<KeyStoreEntry> {
        self.entries()?.remove(alias).ok_or_else(|| not_found(alias))
    }

    async fn contains_alias(&self, alias: &str) -> Result<bool> {
        Ok(self.entries()?.contains_key(alias))
    }

    async fn list_entries(&self) -> Result<Vec<KeyStoreEntry>> {
        Ok(self.entries()?.values().cloned().collect())
    }
}

/// On-disk layout of [`FileKeyStore`]
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredCredentials {
    #[serde(default)]
    credentials: BTreeMap<String, KeyStoreEntry>,
}

/// Plaintext JSON file keystore
///
/// Writes are serialized by a lock held by this instance; share one
/// instance between all writers of the same path.
#[derive(Debug)]
pub struct FileKeyStore {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl FileKeyStore {
    /// Creates a keystore for the file at `path`; the file need not exist
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<StoredCredentials> {
        if !self.path.exists() {
            return Ok(StoredCredentials::default());
        }
        let contents = fs::read_to_string(&self.path).map_err(|e| {
            Error::PersistenceUnavailable(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            Error::PersistenceUnavailable(format!("failed to parse {}: {}", self.path.display(), e))
        })
    }

    fn write(&self, stored: &StoredCredentials) -> Result<()> {
        let contents = serde_json::to_string_pretty(stored)?;
        write_atomically(&self.path, &contents)
    }
}

#[async_trait]
impl KeyStore for FileKeyStore {
    async fn store_entry(&self, entry: KeyStoreEntry, replace_existing: bool) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut stored = self.read()?;
        insert_entry(&mut stored.credentials, entry, replace_existing)?;
        self.write(&stored)
    }

    async fn load_entry(&self, alias: &str) -> Result<KeyStoreEntry> {
        self.read()?
            .credentials
            .remove(alias)
            .ok_or_else(|| not_found(alias))
    }

    async fn delete_entry(&self, alias: &str) -> Result<KeyStoreEntry> {
        let _guard = self.lock.lock().await;
        let mut stored = self.read()?;
        let removed = stored
            .credentials
            .remove(alias)
            .ok_or_else(|| not_found(alias))?;
        self.write(&stored)?;
        Ok(removed)
    }

    async fn contains_alias(&self, alias: &str) -> Result<bool> {
        Ok(self.read()?.credentials.contains_key(alias))
    }

    async fn list_entries(&self) -> Result<Vec<KeyStoreEntry>> {
        Ok(self.read()?.credentials.into_values().collect())
    }
}
