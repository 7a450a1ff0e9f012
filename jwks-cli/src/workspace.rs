//! Data directory and the stores inside it

use crate::error::{Error, Result};
use jwks_admin::{
    FileConfigurationStore, FileKeyStore, ImporterConfig, KeySetRepository, KeyStoreImporter,
    RepositoryConfig,
};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Environment variable naming the data directory
pub const ENV_HOME: &str = "JWKS_HOME";
/// Data directory name under the user's home directory
pub const DEFAULT_DIR: &str = ".jwks";
/// Configuration document file name
pub const CONFIG_FILE: &str = "config.json";
/// Keystore file name
pub const KEYSTORE_FILE: &str = "keystore.json";

/// Resolves the data directory: `explicit`, then `JWKS_HOME`, then `~/.jwks`
pub fn resolve_root(explicit: Option<&str>) -> Result<PathBuf> {
    if let Some(root) = explicit {
        return Ok(PathBuf::from(root));
    }
    if let Some(home) = env::var_os(ENV_HOME).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    dirs::home_dir()
        .map(|home| home.join(DEFAULT_DIR))
        .ok_or_else(|| Error::configuration("Could not determine home directory"))
}

/// The file-backed repository and keystore of one data directory
pub struct AdminWorkspace {
    root: PathBuf,
    repository: KeySetRepository<FileConfigurationStore>,
    key_store: Arc<FileKeyStore>,
}

impl AdminWorkspace {
    /// Opens (and creates if needed) the data directory at `root`
    pub fn open(root: impl Into<PathBuf>, config: RepositoryConfig) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            Error::configuration(format!("Failed to create {}: {}", root.display(), e))
        })?;
        debug!(root = %root.display(), "opening data directory");

        let store = FileConfigurationStore::new(root.join(CONFIG_FILE));
        let repository = KeySetRepository::with_config(store, config)?;
        let key_store = Arc::new(FileKeyStore::new(root.join(KEYSTORE_FILE)));

        Ok(Self {
            root,
            repository,
            key_store,
        })
    }

    /// The data directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The key-set repository
    pub fn repository(&self) -> &KeySetRepository<FileConfigurationStore> {
        &self.repository
    }

    /// An importer over the keystore
    pub fn importer(&self, config: ImporterConfig) -> KeyStoreImporter<Arc<FileKeyStore>> {
        KeyStoreImporter::with_config(Arc::clone(&self.key_store), config)
    }
}
