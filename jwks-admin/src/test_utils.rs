//! Test utilities for JWKS administration
//!
//! This module provides file-backed stores that live in a temporary
//! directory instead of the user's data directory.

use crate::error::{Error, Result};
use crate::key_store::FileKeyStore;
use crate::store::FileConfigurationStore;
use std::path::PathBuf;
use tempfile::TempDir;

/// File name of the configuration document inside a data directory
pub const CONFIG_FILE: &str = "config.json";
/// File name of the keystore inside a data directory
pub const KEYSTORE_FILE: &str = "keystore.json";

/// A configuration store and keystore in a temporary directory
pub struct TestStores {
    /// The temporary directory (kept alive for the duration of the test)
    temp_dir: TempDir,
    /// Configuration document store
    pub configuration: FileConfigurationStore,
    /// Credential keystore
    pub key_store: FileKeyStore,
}

impl TestStores {
    /// Creates both stores in a fresh temporary directory
    pub fn new() -> Result<Self> {
        let temp_dir = tempfile::tempdir()
            .map_err(|e| Error::PersistenceUnavailable(format!("Failed to create temp dir: {}", e)))?;

        let configuration = FileConfigurationStore::new(temp_dir.path().join(CONFIG_FILE));
        let key_store = FileKeyStore::new(temp_dir.path().join(KEYSTORE_FILE));

        Ok(Self {
            temp_dir,
            configuration,
            key_store,
        })
    }

    /// Path of the configuration document
    pub fn configuration_path(&self) -> PathBuf {
        self.temp_dir.path().join(CONFIG_FILE)
    }
}
