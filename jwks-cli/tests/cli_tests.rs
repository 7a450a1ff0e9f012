use assert_matches::assert_matches;
use jwks_admin::{Error as AdminError, KeyUse, RepositoryConfig};
use jwks_cli::commands::credential::{self, CredentialCommands};
use jwks_cli::commands::keys::{self, KeyCommands};
use jwks_cli::error::{Error, Result};
use jwks_cli::output::OutputFormat;
use jwks_cli::workspace::{resolve_root, AdminWorkspace, ENV_HOME};
use serde_json::json;
use serial_test::serial;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

const FIXTURES: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../jwks-admin/tests/fixtures");

/// Workspace in an isolated temp directory
struct TestEnv {
    temp_dir: TempDir,
    workspace: AdminWorkspace,
}

impl TestEnv {
    fn new() -> Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let config = RepositoryConfig::new().with_base_backoff(Duration::ZERO);
        let workspace = AdminWorkspace::open(temp_dir.path().join("jwks"), config)?;
        Ok(Self {
            temp_dir,
            workspace,
        })
    }

    fn write(&self, name: &str, value: serde_json::Value) -> String {
        let path = self.temp_dir.path().join(name);
        std::fs::write(&path, value.to_string()).unwrap();
        path.to_string_lossy().into_owned()
    }

    async fn keys(&self, cmd: KeyCommands) -> Result<()> {
        keys::handle(&cmd, OutputFormat::Json, &self.workspace).await
    }

    async fn credential(&self, cmd: CredentialCommands) -> Result<()> {
        credential::handle(&cmd, OutputFormat::Text, &self.workspace).await
    }
}

fn fixture(name: &str) -> String {
    Path::new(FIXTURES).join(name).to_string_lossy().into_owned()
}

fn rsa_jwk(kid: &str) -> serde_json::Value {
    json!({
        "kid": kid,
        "kty": "RSA",
        "use": "sig",
        "alg": "RS256",
        "n": "u2hCrGnEPV8tJ0ys56L3kpSg",
        "e": "AQAB"
    })
}

#[tokio::test]
async fn test_key_lifecycle() -> Result<()> {
    let env = TestEnv::new()?;
    let repository = env.workspace.repository();

    let file = env.write("k1.json", rsa_jwk("k1"));
    env.keys(KeyCommands::Add { file: file.clone() }).await?;
    assert_matches!(
        env.keys(KeyCommands::Add { file }).await,
        Err(Error::Admin(AdminError::DuplicateKeyId(_)))
    );

    let patch = env.write(
        "patch.json",
        json!([{"op": "replace", "path": "/use", "value": "enc"}]),
    );
    env.keys(KeyCommands::Patch {
        kid: "k1".to_string(),
        file: patch,
    })
    .await?;
    assert_eq!(repository.get_key("k1").await?.key_use, KeyUse::Enc);

    env.keys(KeyCommands::Thumbprint {
        kid: "k1".to_string(),
    })
    .await?;

    env.keys(KeyCommands::Delete {
        kid: "k1".to_string(),
    })
    .await?;
    assert!(repository.list_keys().await?.is_empty());
    assert_matches!(
        env.keys(KeyCommands::Delete {
            kid: "k1".to_string()
        })
        .await,
        Err(Error::Admin(AdminError::KeyNotFound(_)))
    );
    Ok(())
}

#[tokio::test]
async fn test_replace_and_patch_set() -> Result<()> {
    let env = TestEnv::new()?;

    let jwks = env.write("jwks.json", json!({"keys": [rsa_jwk("a"), rsa_jwk("b")]}));
    env.keys(KeyCommands::Replace { file: jwks }).await?;

    let patch = env.write("set-patch.json", json!([{"op": "remove", "path": "/keys/0"}]));
    env.keys(KeyCommands::PatchSet { file: patch }).await?;

    let set = env.workspace.repository().list_keys().await?;
    assert_eq!(set.len(), 1);
    assert!(set.contains_kid("b"));
    Ok(())
}

#[tokio::test]
async fn test_add_keeps_unmodelled_members() -> Result<()> {
    let env = TestEnv::new()?;
    let mut jwk = rsa_jwk("k1");
    jwk["key_ops"] = json!(["verify"]);
    jwk["x5u"] = json!("https://idp.example.com/certs/k1.pem");

    let file = env.write("k1.json", jwk.clone());
    env.keys(KeyCommands::Add { file }).await?;

    let stored = env.workspace.repository().get_key("k1").await?;
    assert_eq!(jwks_admin::key_entry::serialize(&stored), jwk);
    Ok(())
}

#[tokio::test]
async fn test_invalid_input_is_reported() -> Result<()> {
    let env = TestEnv::new()?;

    let bad = env.write("bad.json", json!({"kid": "k", "kty": "RSA", "use": "sig", "alg": "RS256", "n": "AA", "e": "AQAB", "d": "secret"}));
    assert_matches!(
        env.keys(KeyCommands::Add { file: bad }).await,
        Err(Error::Admin(AdminError::InvalidKeyMaterial(_)))
    );

    let missing = env.temp_dir.path().join("missing.json");
    assert_matches!(
        env.keys(KeyCommands::Add {
            file: missing.to_string_lossy().into_owned()
        })
        .await,
        Err(Error::InvalidParameter(_))
    );
    Ok(())
}

#[tokio::test]
async fn test_import_and_publish_credential() -> Result<()> {
    let env = TestEnv::new()?;

    env.credential(CredentialCommands::Import {
        alias: "ec-signing".to_string(),
        certificate: fixture("ec_cert.pem"),
        private_key: fixture("ec_sec1_key.pem"),
        encoding: "PEM".to_string(),
        overwrite: false,
    })
    .await?;
    env.credential(CredentialCommands::List).await?;

    env.keys(KeyCommands::Publish {
        alias: "ec-signing".to_string(),
        kid: None,
        key_use: KeyUse::Sig,
        alg: None,
    })
    .await?;
    let entry = env.workspace.repository().get_key("ec-signing").await?;
    assert_eq!(entry.alg, "ES256");
    assert_eq!(entry.x5c.len(), 1);

    env.credential(CredentialCommands::Remove {
        alias: "ec-signing".to_string(),
    })
    .await?;
    assert!(env
        .workspace
        .repository()
        .list_keys()
        .await?
        .contains_kid("ec-signing"));
    Ok(())
}

#[tokio::test]
async fn test_import_mismatch_fails() -> Result<()> {
    let env = TestEnv::new()?;

    let result = env
        .credential(CredentialCommands::Import {
            alias: "rsa".to_string(),
            certificate: fixture("rsa_cert.pem"),
            private_key: fixture("rsa_other_key.pem"),
            encoding: "PEM".to_string(),
            overwrite: false,
        })
        .await;
    assert_matches!(
        result,
        Err(Error::Admin(AdminError::Import(
            jwks_admin::ImportFailure::KeyCertMismatch
        )))
    );
    Ok(())
}

#[test]
#[serial]
fn test_resolve_root_precedence() {
    let old = std::env::var_os(ENV_HOME);

    std::env::set_var(ENV_HOME, "/srv/jwks");
    assert_eq!(resolve_root(Some("/tmp/explicit")).unwrap(), PathBuf::from("/tmp/explicit"));
    assert_eq!(resolve_root(None).unwrap(), PathBuf::from("/srv/jwks"));

    std::env::remove_var(ENV_HOME);
    if let Some(home) = dirs::home_dir() {
        assert_eq!(resolve_root(None).unwrap(), home.join(".jwks"));
    }

    match old {
        Some(value) => std::env::set_var(ENV_HOME, value),
        None => std::env::remove_var(ENV_HOME),
    }
}
