use assert_matches::assert_matches;
use async_trait::async_trait;
use jwks_admin::{
    error::Result, ConfigurationRecord, ConfigurationStore, Error, InMemoryConfigurationStore,
    KeyEntry, KeySet, KeySetRepository, KeyUse, Patch, RepositoryConfig, VersionToken,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Barrier;

fn rsa(kid: &str) -> KeyEntry {
    KeyEntry::new_rsa(kid, KeyUse::Sig, "RS256", "u2hCrGnEPV8tJ0ys56L3kpSg", "AQAB")
}

fn fast_config() -> RepositoryConfig {
    RepositoryConfig::new().with_base_backoff(Duration::ZERO)
}

fn repository_with(kids: &[&str]) -> KeySetRepository<InMemoryConfigurationStore> {
    let set = KeySet::from_entries(kids.iter().map(|kid| rsa(kid)).collect()).unwrap();
    let store = InMemoryConfigurationStore::with_record(ConfigurationRecord::with_key_set(set));
    KeySetRepository::with_config(store, fast_config()).unwrap()
}

fn kids(set: &KeySet) -> Vec<String> {
    set.iter().map(|entry| entry.kid.clone()).collect()
}

/// Lets the first two loads through only together, so both callers start
/// from the same version
struct LockstepStore {
    inner: InMemoryConfigurationStore,
    barrier: Barrier,
    loads: AtomicUsize,
}

#[async_trait]
impl ConfigurationStore for LockstepStore {
    async fn load(&self) -> Result<(ConfigurationRecord, VersionToken)> {
        let loaded = self.inner.load().await;
        if self.loads.fetch_add(1, Ordering::SeqCst) < 2 {
            self.barrier.wait().await;
        }
        loaded
    }

    async fn compare_and_swap(
        &self,
        record: &ConfigurationRecord,
        expected: &VersionToken,
    ) -> Result<VersionToken> {
        self.inner.compare_and_swap(record, expected).await
    }
}

/// Rejects every write as a conflict
#[derive(Default)]
struct ContendedStore {
    inner: InMemoryConfigurationStore,
    writes: AtomicUsize,
}

#[async_trait]
impl ConfigurationStore for ContendedStore {
    async fn load(&self) -> Result<(ConfigurationRecord, VersionToken)> {
        self.inner.load().await
    }

    async fn compare_and_swap(
        &self,
        _record: &ConfigurationRecord,
        _expected: &VersionToken,
    ) -> Result<VersionToken> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(Error::ConcurrencyConflict("another writer won".to_string()))
    }
}

/// Never answers within any reasonable timeout
#[derive(Default)]
struct StalledStore {
    stall_loads: bool,
    inner: InMemoryConfigurationStore,
}

#[async_trait]
impl ConfigurationStore for StalledStore {
    async fn load(&self) -> Result<(ConfigurationRecord, VersionToken)> {
        if self.stall_loads {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.inner.load().await
    }

    async fn compare_and_swap(
        &self,
        _record: &ConfigurationRecord,
        _expected: &VersionToken,
    ) -> Result<VersionToken> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(Error::PersistenceUnavailable("unreachable".to_string()))
    }
}

#[tokio::test]
async fn test_add_key_grows_set_in_order() -> Result<()> {
    let repo = repository_with(&["a", "b"]);

    let set = repo.add_key(rsa("c")).await?;

    assert_eq!(set.len(), 3);
    assert_eq!(kids(&set), vec!["a", "b", "c"]);
    assert_eq!(repo.list_keys().await?, set);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_kid_rejected() -> Result<()> {
    let repo = repository_with(&["k1"]);

    let mut duplicate = rsa("k1");
    duplicate.alg = "PS256".to_string();
    assert_matches!(repo.add_key(duplicate).await, Err(Error::DuplicateKeyId(kid)) if kid == "k1");

    let set = repo.list_keys().await?;
    assert_eq!(set.iter().filter(|e| e.kid == "k1").count(), 1);
    assert_eq!(set.get("k1").map(|e| e.alg.as_str()), Some("RS256"));
    assert_eq!(repo.store().save_attempts(), 0);
    Ok(())
}

#[tokio::test]
async fn test_delete_nonexistent_does_not_persist() -> Result<()> {
    let repo = repository_with(&["a"]);
    let (_, before) = repo.load().await?;

    assert_matches!(repo.delete_key("nonexistent").await, Err(Error::KeyNotFound(_)));

    let (record, after) = repo.load().await?;
    assert_eq!(before, after);
    assert_eq!(kids(&record.web_keys), vec!["a"]);
    assert_eq!(repo.store().save_attempts(), 0);
    Ok(())
}

#[tokio::test]
async fn test_delete_returns_removed_entry() -> Result<()> {
    let repo = repository_with(&["a", "b", "c"]);

    let removed = repo.delete_key("b").await?;

    assert_eq!(removed, rsa("b"));
    assert_eq!(kids(&repo.list_keys().await?), vec!["a", "c"]);
    Ok(())
}

#[tokio::test]
async fn test_patch_use_to_enc() -> Result<()> {
    let repo = repository_with(&["a", "k2"]);
    let patch = Patch::parse(&json!([{"op": "replace", "path": "/use", "value": "enc"}]))?;

    let patched = repo.patch_key("k2", &patch).await?;

    assert_eq!(patched.key_use, KeyUse::Enc);
    let mut expected = rsa("k2");
    expected.key_use = KeyUse::Enc;
    assert_eq!(patched, expected);
    assert_eq!(repo.get_key("k2").await?, expected);
    assert_eq!(repo.list_keys().await?.position("k2"), Some(1));
    Ok(())
}

#[tokio::test]
async fn test_failed_patch_leaves_set_unchanged() -> Result<()> {
    let repo = repository_with(&["a"]);
    let before = repo.list_keys().await?;

    let patch = Patch::parse(&json!([
        {"op": "replace", "path": "/alg", "value": "PS512"},
        {"op": "remove", "path": "/x5u"}
    ]))?;
    assert_matches!(
        repo.patch_key("a", &patch).await,
        Err(Error::InvalidPatch { index: 1, .. })
    );

    let invalid = Patch::parse(&json!([{"op": "remove", "path": "/n"}]))?;
    assert_matches!(
        repo.patch_key("a", &invalid).await,
        Err(Error::InvalidKeyMaterial(_))
    );

    assert_matches!(
        repo.patch_key("missing", &invalid).await,
        Err(Error::KeyNotFound(_))
    );

    assert_eq!(repo.list_keys().await?, before);
    assert_eq!(repo.store().save_attempts(), 0);
    Ok(())
}

#[tokio::test]
async fn test_patch_rename_cannot_collide() -> Result<()> {
    let repo = repository_with(&["a", "b"]);
    let rename = Patch::parse(&json!([{"op": "replace", "path": "/kid", "value": "b"}]))?;

    assert_matches!(repo.patch_key("a", &rename).await, Err(Error::DuplicateKeyId(_)));
    assert_eq!(kids(&repo.list_keys().await?), vec!["a", "b"]);
    Ok(())
}

#[tokio::test]
async fn test_replace_and_patch_whole_key_set() -> Result<()> {
    let repo = repository_with(&["old"]);

    let replacement = KeySet::from_entries(vec![rsa("x"), rsa("y")])?;
    let set = repo.replace_key_set(replacement).await?;
    assert_eq!(kids(&set), vec!["x", "y"]);

    let patch = Patch::parse(&json!([
        {"op": "remove", "path": "/keys/0"},
        {"op": "add", "path": "/keys/-", "value": {
            "kid": "z", "kty": "RSA", "use": "sig", "alg": "RS256",
            "n": "u2hCrGnEPV8tJ0ys56L3kpSg", "e": "AQAB"
        }}
    ]))?;
    let set = repo.patch_key_set(&patch).await?;
    assert_eq!(kids(&set), vec!["y", "z"]);

    let duplicate = Patch::parse(&json!([
        {"op": "replace", "path": "/keys/1/kid", "value": "y"}
    ]))?;
    assert_matches!(repo.patch_key_set(&duplicate).await, Err(Error::DuplicateKeyId(_)));
    assert_eq!(kids(&repo.list_keys().await?), vec!["y", "z"]);
    Ok(())
}

#[tokio::test]
async fn test_replace_key_set_keeps_unmodelled_members() -> Result<()> {
    let repo = repository_with(&["a"]);
    let s256 = "xNGVVpx9lEUUxQ4hTWrc7JBNWSYtowcCdmjglVPEpoA";
    let raw = json!({"keys": [{
        "kid": "b", "kty": "RSA", "use": "sig", "alg": "RS256",
        "n": "u2hCrGnEPV8tJ0ys56L3kpSg", "e": "AQAB",
        "x5t#S256": s256
    }]});

    repo.replace_key_set(KeySet::parse(&raw)?).await?;

    let (record, _) = repo.load().await?;
    assert_eq!(record.web_keys.to_value(), raw);
    assert_eq!(repo.get_key("b").await?.extra["x5t#S256"], json!(s256));
    Ok(())
}

#[tokio::test]
async fn test_patch_adding_x5t_is_persisted() -> Result<()> {
    let repo = repository_with(&["a"]);
    let x5t = "6z18pM7pns3jhG9rtEozZ_hYk-8";
    let patch = Patch::parse(&json!([{"op": "add", "path": "/x5t", "value": x5t}]))?;

    let patched = repo.patch_key("a", &patch).await?;

    assert_eq!(patched.extra["x5t"], json!(x5t));
    assert_eq!(repo.get_key("a").await?, patched);
    assert_eq!(repo.store().save_attempts(), 1);
    Ok(())
}

#[tokio::test]
async fn test_replace_key_set_validates_entries() -> Result<()> {
    let repo = repository_with(&["a"]);
    let mut broken = rsa("b");
    broken.e = None;

    let replacement = KeySet::from_entries(vec![broken])?;
    assert_matches!(
        repo.replace_key_set(replacement).await,
        Err(Error::InvalidKeyMaterial(_))
    );
    assert_eq!(kids(&repo.list_keys().await?), vec!["a"]);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_distinct_inserts_both_commit() -> Result<()> {
    let store = LockstepStore {
        inner: InMemoryConfigurationStore::new(),
        barrier: Barrier::new(2),
        loads: AtomicUsize::new(0),
    };
    let repo = KeySetRepository::with_config(store, fast_config())?;

    let (first, second) = tokio::join!(repo.add_key(rsa("a")), repo.add_key(rsa("b")));
    first?;
    second?;

    let set = repo.list_keys().await?;
    assert_eq!(set.len(), 2);
    assert!(set.contains_kid("a"));
    assert!(set.contains_kid("b"));
    assert_eq!(repo.store().inner.conflicts(), 1);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_same_kid_one_wins() -> Result<()> {
    let store = LockstepStore {
        inner: InMemoryConfigurationStore::new(),
        barrier: Barrier::new(2),
        loads: AtomicUsize::new(0),
    };
    let repo = KeySetRepository::with_config(store, fast_config())?;

    let (first, second) = tokio::join!(repo.add_key(rsa("k1")), repo.add_key(rsa("k1")));

    // The retried insert is re-evaluated against the winner's key set
    let outcomes = [first.is_ok(), second.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    assert!(matches!(first, Err(Error::DuplicateKeyId(_))) || matches!(second, Err(Error::DuplicateKeyId(_))));
    assert_eq!(repo.list_keys().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_conflicts_exhaust_attempts() -> Result<()> {
    let config = fast_config().with_max_attempts(3);
    let repo = KeySetRepository::with_config(ContendedStore::default(), config)?;

    assert_matches!(repo.add_key(rsa("a")).await, Err(Error::ConcurrencyConflict(_)));
    assert_eq!(repo.store().writes.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_load_timeout_surfaces() -> Result<()> {
    let store = StalledStore {
        stall_loads: true,
        ..Default::default()
    };
    let config = fast_config().with_call_timeout(Duration::from_millis(100));
    let repo = KeySetRepository::with_config(store, config)?;

    assert_matches!(
        repo.list_keys().await,
        Err(Error::StoreTimeout { operation: "load", timeout_ms: 100 })
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_save_timeout_is_not_retried() -> Result<()> {
    let config = fast_config().with_call_timeout(Duration::from_millis(100));
    let repo = KeySetRepository::with_config(StalledStore::default(), config)?;

    assert_matches!(
        repo.add_key(rsa("a")).await,
        Err(Error::StoreTimeout { operation: "compare_and_swap", .. })
    );
    Ok(())
}
