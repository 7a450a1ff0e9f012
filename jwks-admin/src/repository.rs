//! Key-set repository
//!
//! [`KeySetRepository`] is the only component that talks to the
//! configuration store. Every mutation is a read-modify-write cycle:
//!
//! 1. load the current document and its version
//! 2. compute the new key set from the loaded one with a pure function
//! 3. compare-and-swap the document against the loaded version
//!
//! When another writer got there first, the cycle restarts from a fresh
//! load, so the mutation is always re-evaluated against the state it will
//! replace. The number of cycles is bounded by
//! [`RepositoryConfig::max_attempts`].

use crate::config::RepositoryConfig;
use crate::error::{Error, Result};
use crate::guard;
use crate::key_entry::KeyEntry;
use crate::key_set::KeySet;
use crate::patch::{self, Patch};
use crate::retry::{compute_backoff, with_timeout};
use crate::store::{ConfigurationRecord, ConfigurationStore, VersionToken};
use tracing::{debug, info, warn};

/// Administrative access to the published key set
#[derive(Debug)]
pub struct KeySetRepository<S> {
    store: S,
    config: RepositoryConfig,
}

impl<S: ConfigurationStore> KeySetRepository<S> {
    /// Creates a repository over `store` with the default configuration
    pub fn new(store: S) -> Self {
        Self {
            store,
            config: RepositoryConfig::default(),
        }
    }

    /// Creates a repository with an explicit configuration
    pub fn with_config(store: S, config: RepositoryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    /// The underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The active configuration
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Loads the current document and its version
    pub async fn load(&self) -> Result<(ConfigurationRecord, VersionToken)> {
        with_timeout(self.config.call_timeout, "load", self.store.load()).await
    }

    /// Replaces the document if its stored version is still `expected`
    pub async fn try_save(
        &self,
        record: &ConfigurationRecord,
        expected: &VersionToken,
    ) -> Result<VersionToken> {
        with_timeout(
            self.config.call_timeout,
            "compare_and_swap",
            self.store.compare_and_swap(record, expected),
        )
        .await
    }

    /// Runs a read-modify-write cycle with `mutation`, retrying on conflicts.
    ///
    /// `mutation` may run several times, each time against a freshly
    /// loaded key set. If it fails, nothing is persisted and its error is
    /// returned as is. Only [`Error::ConcurrencyConflict`] is retried.
    pub async fn mutate<F>(&self, mut mutation: F) -> Result<KeySet>
    where
        F: FnMut(&KeySet) -> Result<KeySet> + Send,
    {
        let max_attempts = self.config.max_attempts;

        for attempt in 1..=max_attempts {
            let (mut record, version) = self.load().await?;
            let next = mutation(&record.web_keys)?;
            record.web_keys = next.clone();

            match self.try_save(&record, &version).await {
                Ok(new_version) => {
                    debug!(
                        attempt,
                        version = %new_version,
                        keys = next.len(),
                        "key set committed"
                    );
                    return Ok(next);
                }
                Err(err) if err.is_conflict() && attempt < max_attempts => {
                    let delay = compute_backoff(&self.config, attempt - 1);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "CAS conflict, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_conflict() => {
                    warn!(max_attempts, "CAS conflict, attempts exhausted");
                    return Err(Error::ConcurrencyConflict(format!(
                        "key set changed concurrently on each of {} attempts",
                        max_attempts
                    )));
                }
                Err(err) => return Err(err),
            }
        }

        Err(Error::ConcurrencyConflict(format!(
            "key set changed concurrently on each of {} attempts",
            max_attempts
        )))
    }

    /// Returns the current key set
    pub async fn list_keys(&self) -> Result<KeySet> {
        let (record, _) = self.load().await?;
        Ok(record.web_keys)
    }

    /// Returns the entry with the given `kid`
    pub async fn get_key(&self, kid: &str) -> Result<KeyEntry> {
        let (record, _) = self.load().await?;
        guard::find_by_kid(&record.web_keys, kid)
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(kid.to_string()))
    }

    /// Adds a new entry; its `kid` must not be in use
    #[tracing::instrument(skip(self, entry), fields(kid = %entry.kid))]
    pub async fn add_key(&self, entry: KeyEntry) -> Result<KeySet> {
        entry.validate()?;
        let set = self
            .mutate(|current| guard::insert(current, entry.clone()))
            .await?;
        info!(kid = %entry.kid, keys = set.len(), "key added");
        Ok(set)
    }

    /// Applies `patch` to the entry with the given `kid` and returns the
    /// patched entry
    #[tracing::instrument(skip(self, patch), fields(operations = patch.operations().len()))]
    pub async fn patch_key(&self, kid: &str, patch: &Patch) -> Result<KeyEntry> {
        let mut patched = None;
        self.mutate(|current| {
            let existing =
                guard::find_by_kid(current, kid).ok_or_else(|| Error::KeyNotFound(kid.to_string()))?;
            let entry = patch::apply(existing, patch)?;
            let next = guard::replace_by_kid(current, kid, entry.clone())?;
            patched = Some(entry);
            Ok(next)
        })
        .await?;

        let entry = patched.ok_or_else(|| Error::KeyNotFound(kid.to_string()))?;
        info!(kid, new_kid = %entry.kid, "key patched");
        Ok(entry)
    }

    /// Removes the entry with the given `kid` and returns it
    #[tracing::instrument(skip(self))]
    pub async fn delete_key(&self, kid: &str) -> Result<KeyEntry> {
        let mut removed = None;
        self.mutate(|current| {
            let entry = guard::find_by_kid(current, kid)
                .cloned()
                .ok_or_else(|| Error::KeyNotFound(kid.to_string()))?;
            let next = guard::remove_by_kid(current, kid)?;
            removed = Some(entry);
            Ok(next)
        })
        .await?;

        let entry = removed.ok_or_else(|| Error::KeyNotFound(kid.to_string()))?;
        info!(kid, "key deleted");
        Ok(entry)
    }

    /// Replaces the whole key set
    #[tracing::instrument(skip(self, key_set), fields(keys = key_set.len()))]
    pub async fn replace_key_set(&self, key_set: KeySet) -> Result<KeySet> {
        for entry in key_set.iter() {
            entry.validate()?;
        }
        let set = self.mutate(|_| Ok(key_set.clone())).await?;
        info!(keys = set.len(), "key set replaced");
        Ok(set)
    }

    /// Applies `patch` to the `{"keys": [...]}` document
    #[tracing::instrument(skip(self, patch), fields(operations = patch.operations().len()))]
    pub async fn patch_key_set(&self, patch: &Patch) -> Result<KeySet> {
        let set = self
            .mutate(|current| patch::apply_to_key_set(current, patch))
            .await?;
        info!(keys = set.len(), "key set patched");
        Ok(set)
    }
}
