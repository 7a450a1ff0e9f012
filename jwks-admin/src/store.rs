//! Configuration document persistence
//!
//! The identity provider keeps its runtime configuration in a single
//! document. This module defines that document ([`ConfigurationRecord`]),
//! the opaque [`VersionToken`] used for compare-and-swap, and the
//! [`ConfigurationStore`] trait with two implementations:
//!
//! - [`InMemoryConfigurationStore`]: process-local, used in tests and when
//!   embedding the repository in a service that persists elsewhere
//! - [`FileConfigurationStore`]: a JSON file replaced atomically on write
//!
//! Stores only offer "load whole document" and "replace whole document if
//! unchanged"; there is no field-level locking.

use crate::error::{Error, Result};
use crate::key_set::KeySet;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;
use tracing::{debug, warn};

/// Opaque marker of a stored document's revision
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    /// Wraps an existing token value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The token of a document that has never been written
    pub fn initial() -> Self {
        Self("initial".to_string())
    }

    /// Generates a fresh random token
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The raw token value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The shared configuration document.
///
/// Only the key set is interpreted; every other section is carried along
/// untouched so a key-set mutation never drops unrelated configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationRecord {
    /// The published key set
    #[serde(default)]
    pub web_keys: KeySet,

    /// All other configuration sections
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl ConfigurationRecord {
    /// Creates a record holding only a key set
    pub fn with_key_set(web_keys: KeySet) -> Self {
        Self {
            web_keys,
            other: Map::new(),
        }
    }
}

/// Trait for configuration document stores
///
/// Implementations must be `Send + Sync` so one store can serve concurrent
/// administrative requests.
///
/// # Error Handling
///
/// Implementations should:
/// - Return `Error::PersistenceUnavailable` when the backend cannot be read or written
/// - Return `Error::ConcurrencyConflict` from `compare_and_swap` when the stored
///   version differs from the expected one, without writing anything
#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    /// Loads the current document and its version
    async fn load(&self) -> Result<(ConfigurationRecord, VersionToken)>;

    /// Replaces the document if the stored version still equals `expected`.
    ///
    /// # Returns
    /// The version of the newly written document
    async fn compare_and_swap(
        &self,
        record: &ConfigurationRecord,
        expected: &VersionToken,
    ) -> Result<VersionToken>;
}

#[async_trait]
impl<'a, S: ConfigurationStore + ?Sized> ConfigurationStore for &'a S {
    async fn load(&self) -> Result<(ConfigurationRecord, VersionToken)> {
        (**self).load().await
    }

    async fn compare_and_swap(
        &self,
        record: &ConfigurationRecord,
        expected: &VersionToken,
    ) -> Result<VersionToken> {
        (**self).compare_and_swap(record, expected).await
    }
}

#[async_trait]
impl<S: ConfigurationStore + ?Sized> ConfigurationStore for std::sync::Arc<S> {
    async fn load(&self) -> Result<(ConfigurationRecord, VersionToken)> {
        (**self).load().await
    }

    async fn compare_and_swap(
        &self,
        record: &ConfigurationRecord,
        expected: &VersionToken,
    ) -> Result<VersionToken> {
        (**self).compare_and_swap(record, expected).await
    }
}

/// Process-local configuration store
#[derive(Debug)]
pub struct InMemoryConfigurationStore {
    state: RwLock<(ConfigurationRecord, VersionToken)>,
    revision: AtomicU64,
    available: AtomicBool,
    save_attempts: AtomicUsize,
    conflicts: AtomicUsize,
}

impl InMemoryConfigurationStore {
    /// Creates a store holding an empty document
    pub fn new() -> Self {
        Self::with_record(ConfigurationRecord::default())
    }

    /// Creates a store holding `record`
    pub fn with_record(record: ConfigurationRecord) -> Self {
        Self {
            state: RwLock::new((record, VersionToken::new("0"))),
            revision: AtomicU64::new(0),
            available: AtomicBool::new(true),
            save_attempts: AtomicUsize::new(0),
            conflicts: AtomicUsize::new(0),
        }
    }

    /// Simulates the backend going away (`false`) or coming back (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of `compare_and_swap` calls received
    pub fn save_attempts(&self) -> usize {
        self.save_attempts.load(Ordering::SeqCst)
    }

    /// Number of `compare_and_swap` calls rejected as conflicts
    pub fn conflicts(&self) -> usize {
        self.conflicts.load(Ordering::SeqCst)
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::PersistenceUnavailable(
                "in-memory store is marked unavailable".to_string(),
            ))
        }
    }
}

impl Default for InMemoryConfigurationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigurationStore for InMemoryConfigurationStore {
    async fn load(&self) -> Result<(ConfigurationRecord, VersionToken)> {
        self.ensure_available()?;
        let state = self
            .state
            .read()
            .map_err(|_| Error::PersistenceUnavailable("store lock poisoned".to_string()))?;
        Ok(state.clone())
    }

    async fn compare_and_swap(
        &self,
        record: &ConfigurationRecord,
        expected: &VersionToken,
    ) -> Result<VersionToken> {
        self.save_attempts.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;

        let mut state = self
            .state
            .write()
            .map_err(|_| Error::PersistenceUnavailable("store lock poisoned".to_string()))?;

        if &state.1 != expected {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
            return Err(Error::ConcurrencyConflict(format!(
                "expected version {}, found {}",
                expected, state.1
            )));
        }

        let next = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        let version = VersionToken::new(next.to_string());
        *state = (record.clone(), version.clone());
        Ok(version)
    }
}

/// On-disk layout of [`FileConfigurationStore`]
#[derive(Debug, Serialize, Deserialize)]
struct StoredDocument {
    version: VersionToken,
    record: ConfigurationRecord,
}

/// Configuration store backed by a JSON file.
///
/// Compare-and-swap is serialized by a lock held by this instance, and the
/// file is replaced through a temporary file and a rename so readers never
/// observe a partial document. Share one instance (e.g. behind an `Arc`)
/// between all writers of the same path.
#[derive(Debug)]
pub struct FileConfigurationStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileConfigurationStore {
    /// Creates a store for the document at `path`; the file need not exist
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<Option<StoredDocument>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.path).map_err(|e| {
            Error::PersistenceUnavailable(format!(
                "failed to read {}: {}",
                self.path.display(),
                e
            ))
        })?;
        let document = serde_json::from_str(&contents).map_err(|e| {
            Error::PersistenceUnavailable(format!(
                "failed to parse {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(Some(document))
    }
}

#[async_trait]
impl ConfigurationStore for FileConfigurationStore {
    async fn load(&self) -> Result<(ConfigurationRecord, VersionToken)> {
        match self.read_document()? {
            Some(document) => Ok((document.record, document.version)),
            None => Ok((ConfigurationRecord::default(), VersionToken::initial())),
        }
    }

    async fn compare_and_swap(
        &self,
        record: &ConfigurationRecord,
        expected: &VersionToken,
    ) -> Result<VersionToken> {
        let _guard = self.write_lock.lock().await;

        let current = self
            .read_document()?
            .map(|document| document.version)
            .unwrap_or_else(VersionToken::initial);
        if &current != expected {
            return Err(Error::ConcurrencyConflict(format!(
                "expected version {}, found {}",
                expected, current
            )));
        }

        let document = StoredDocument {
            version: VersionToken::generate(),
            record: record.clone(),
        };
        let contents = serde_json::to_string_pretty(&document)?;
        write_atomically(&self.path, &contents)?;
        debug!(path = %self.path.display(), version = %document.version, "configuration document replaced");

        Ok(document.version)
    }
}

/// Writes `contents` to `path` through a sibling temporary file and a rename.
///
/// The temporary file is flushed to disk before the rename, so the target
/// holds either the previous or the new document after a crash.
pub(crate) fn write_atomically(path: &Path, contents: &str) -> Result<()> {
    let unavailable = |action: &str, e: std::io::Error| {
        Error::PersistenceUnavailable(format!("failed to {} {}: {}", action, path.display(), e))
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| unavailable("create directory for", e))?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let temp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let written = fs::File::create(&temp_path).and_then(|mut file| {
        file.write_all(contents.as_bytes())?;
        file.sync_all()
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(unavailable("write", e));
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        unavailable("replace", e)
    })?;

    // The new document is in place; a failed directory sync only weakens durability
    if let Err(e) = sync_parent(path) {
        warn!(path = %path.display(), error = %e, "failed to sync parent directory");
    }
    Ok(())
}

/// Persists the directory entry created by a rename
#[cfg(unix)]
fn sync_parent(path: &Path) -> std::io::Result<()> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => fs::File::open(parent)?.sync_all(),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
