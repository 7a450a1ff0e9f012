//! Credential import
//!
//! [`KeyStoreImporter`] turns a certificate and a private key, both PEM
//! text, into a keystore credential. The private key must belong to the
//! certificate's subject public key; the pair is rejected otherwise and the
//! keystore is left untouched.
//!
//! Accepted private key encodings:
//! - PKCS#8 `PRIVATE KEY` (RSA, P-256, secp256k1, Ed25519)
//! - PKCS#1 `RSA PRIVATE KEY`
//! - SEC1 `EC PRIVATE KEY` (P-256, secp256k1)
//!
//! Stored private keys are normalized to PKCS#8.

use crate::config::ImporterConfig;
use crate::error::{Error, ImportFailure, Result};
use crate::key_entry::{KeyEntry, KeyUse};
use crate::key_store::{CredentialAlgorithm, KeyStore, KeyStoreEntry};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};
use x509_cert::der::Encode;
use x509_cert::Certificate;

/// The only import format accepted
pub const PEM_FORMAT: &str = "PEM";

const OID_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";
const OID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
const OID_ED25519: &str = "1.3.101.112";

/// A credential import request in its wire form
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    /// Encoding of `certificate` and `private_key`; must be `PEM`
    pub format: String,
    /// Alias to store the credential under
    pub alias: String,
    /// Certificate chain, leaf first
    pub certificate: String,
    /// Private key of the leaf certificate
    pub private_key: String,
}

impl fmt::Debug for ImportRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportRequest")
            .field("format", &self.format)
            .field("alias", &self.alias)
            .field("certificate", &self.certificate)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// Public description of a stored credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSummary {
    /// Alias the credential is stored under
    pub alias: String,
    /// Key algorithm family
    pub algorithm: CredentialAlgorithm,
    /// Subject of the leaf certificate
    pub subject: String,
    /// End of the leaf certificate's validity
    pub not_after: Option<DateTime<Utc>>,
    /// When the credential was imported
    pub imported_at: DateTime<Utc>,
}

/// A public key in one of the supported families
#[derive(Debug, PartialEq)]
enum PublicMaterial {
    Rsa(rsa::RsaPublicKey),
    P256(p256::PublicKey),
    K256(k256::PublicKey),
    Ed25519(ed25519_dalek::VerifyingKey),
}

impl PublicMaterial {
    fn algorithm(&self) -> CredentialAlgorithm {
        match self {
            PublicMaterial::Rsa(_) => CredentialAlgorithm::Rsa,
            PublicMaterial::P256(_) => CredentialAlgorithm::EcP256,
            PublicMaterial::K256(_) => CredentialAlgorithm::EcSecp256k1,
            PublicMaterial::Ed25519(_) => CredentialAlgorithm::Ed25519,
        }
    }
}

/// A private key in one of the supported families
enum PrivateMaterial {
    Rsa(rsa::RsaPrivateKey),
    P256(p256::SecretKey),
    K256(k256::SecretKey),
    Ed25519(ed25519_dalek::SigningKey),
}

impl PrivateMaterial {
    fn public(&self) -> PublicMaterial {
        match self {
            PrivateMaterial::Rsa(key) => PublicMaterial::Rsa(key.to_public_key()),
            PrivateMaterial::P256(key) => PublicMaterial::P256(key.public_key()),
            PrivateMaterial::K256(key) => PublicMaterial::K256(key.public_key()),
            PrivateMaterial::Ed25519(key) => PublicMaterial::Ed25519(key.verifying_key()),
        }
    }

    fn to_pkcs8_pem(&self) -> Result<String> {
        let pem = match self {
            PrivateMaterial::Rsa(key) => key.to_pkcs8_pem(LineEnding::LF),
            PrivateMaterial::P256(key) => key.to_pkcs8_pem(LineEnding::LF),
            PrivateMaterial::K256(key) => key.to_pkcs8_pem(LineEnding::LF),
            PrivateMaterial::Ed25519(key) => key.to_pkcs8_pem(LineEnding::LF),
        }
        .map_err(|e| malformed(format!("failed to encode private key: {}", e)))?;
        Ok(pem.as_str().to_owned())
    }
}

/// Imports certificate/private-key pairs into a [`KeyStore`]
#[derive(Debug)]
pub struct KeyStoreImporter<K> {
    key_store: K,
    config: ImporterConfig,
}

impl<K: KeyStore> KeyStoreImporter<K> {
    /// Creates an importer with the default configuration
    pub fn new(key_store: K) -> Self {
        Self::with_config(key_store, ImporterConfig::default())
    }

    /// Creates an importer with an explicit configuration
    pub fn with_config(key_store: K, config: ImporterConfig) -> Self {
        Self { key_store, config }
    }

    /// The underlying keystore
    pub fn key_store(&self) -> &K {
        &self.key_store
    }

    /// Validates the pair and stores it under `alias`
    #[tracing::instrument(skip(self, certificate_pem, private_key_pem))]
    pub async fn import_credential(
        &self,
        format: &str,
        alias: &str,
        certificate_pem: &str,
        private_key_pem: &str,
    ) -> Result<CredentialSummary> {
        if !format.trim().eq_ignore_ascii_case(PEM_FORMAT) {
            return Err(ImportFailure::UnsupportedFormat(format.to_string()).into());
        }
        if alias.trim().is_empty() {
            return Err(ImportFailure::InvalidAlias(alias.to_string()).into());
        }

        let chain = parse_certificate_chain(certificate_pem)?;
        let leaf = &chain[0];
        let certificate_key = certificate_public_key(leaf)?;
        let private_key = parse_private_key(private_key_pem)?;

        if private_key.public() != certificate_key {
            warn!(alias, "private key does not match certificate");
            return Err(ImportFailure::KeyCertMismatch.into());
        }

        let entry = KeyStoreEntry {
            alias: alias.to_string(),
            algorithm: certificate_key.algorithm(),
            certificate_pem: certificate_pem.trim().to_string() + "\n",
            private_key_pem: private_key.to_pkcs8_pem()?,
            imported_at: Utc::now(),
        };
        let summary = summarize(&entry, leaf);

        self.key_store
            .store_entry(entry, self.config.allow_alias_overwrite)
            .await?;
        info!(alias, algorithm = %summary.algorithm, "credential imported");

        Ok(summary)
    }

    /// Imports a credential from its wire-form request
    pub async fn import(&self, request: &ImportRequest) -> Result<CredentialSummary> {
        self.import_credential(
            &request.format,
            &request.alias,
            &request.certificate,
            &request.private_key,
        )
        .await
    }

    /// Removes the credential stored under `alias`
    #[tracing::instrument(skip(self))]
    pub async fn remove_credential(&self, alias: &str) -> Result<CredentialSummary> {
        let entry = self.key_store.delete_entry(alias).await?;
        info!(alias, "credential removed");
        credential_summary(&entry)
    }

    /// Describes every stored credential
    pub async fn list_credentials(&self) -> Result<Vec<CredentialSummary>> {
        let entries = self.key_store.list_entries().await?;
        debug!(count = entries.len(), "listing credentials");
        entries.iter().map(credential_summary).collect()
    }

    /// Builds a public key entry for the credential stored under `alias`
    pub async fn key_entry_for(
        &self,
        alias: &str,
        kid: Option<&str>,
        key_use: KeyUse,
        alg: Option<&str>,
    ) -> Result<KeyEntry> {
        let entry = self.key_store.load_entry(alias).await?;
        public_key_entry(&entry, kid, key_use, alg)
    }
}

/// Describes a stored credential without exposing its private key
pub fn credential_summary(entry: &KeyStoreEntry) -> Result<CredentialSummary> {
    let chain = parse_certificate_chain(&entry.certificate_pem)?;
    Ok(summarize(entry, &chain[0]))
}

/// Builds the public key entry of a stored credential.
///
/// `kid` defaults to the credential's alias and `alg` to the family's
/// default signing algorithm. The entry carries the certificate chain as
/// `x5c` and the leaf's end of validity as `exp`.
pub fn public_key_entry(
    credential: &KeyStoreEntry,
    kid: Option<&str>,
    key_use: KeyUse,
    alg: Option<&str>,
) -> Result<KeyEntry> {
    let chain = parse_certificate_chain(&credential.certificate_pem)?;
    let leaf = &chain[0];
    let kid = kid.unwrap_or(&credential.alias);
    let alg = alg.unwrap_or_else(|| credential.algorithm.default_jwa());

    let entry = match certificate_public_key(leaf)? {
        PublicMaterial::Rsa(key) => KeyEntry::new_rsa(
            kid,
            key_use,
            alg,
            &URL_SAFE_NO_PAD.encode(key.n().to_bytes_be()),
            &URL_SAFE_NO_PAD.encode(key.e().to_bytes_be()),
        ),
        PublicMaterial::P256(key) => {
            let point = key.to_encoded_point(false);
            let (x, y) = point
                .x()
                .zip(point.y())
                .ok_or_else(|| malformed("P-256 public key has no affine coordinates"))?;
            KeyEntry::new_ec(
                kid,
                key_use,
                alg,
                "P-256",
                &URL_SAFE_NO_PAD.encode(x),
                &URL_SAFE_NO_PAD.encode(y),
            )
        }
        PublicMaterial::K256(key) => {
            let point = key.to_encoded_point(false);
            let (x, y) = point
                .x()
                .zip(point.y())
                .ok_or_else(|| malformed("secp256k1 public key has no affine coordinates"))?;
            KeyEntry::new_ec(
                kid,
                key_use,
                alg,
                "secp256k1",
                &URL_SAFE_NO_PAD.encode(x),
                &URL_SAFE_NO_PAD.encode(y),
            )
        }
        PublicMaterial::Ed25519(key) => KeyEntry::new_okp(
            kid,
            key_use,
            alg,
            "Ed25519",
            &URL_SAFE_NO_PAD.encode(key.as_bytes()),
        ),
    };

    let x5c = chain
        .iter()
        .map(|certificate| {
            certificate
                .to_der()
                .map(|der| STANDARD.encode(der))
                .map_err(|e| malformed(format!("failed to encode certificate: {}", e)))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut entry = entry.with_x5c(x5c);
    entry.exp = not_after(leaf).map(|t| t.timestamp_millis());
    entry.validate()?;
    Ok(entry)
}

fn malformed(reason: impl Into<String>) -> Error {
    Error::Import(ImportFailure::MalformedMaterial(reason.into()))
}

fn summarize(entry: &KeyStoreEntry, leaf: &Certificate) -> CredentialSummary {
    CredentialSummary {
        alias: entry.alias.clone(),
        algorithm: entry.algorithm,
        subject: leaf.tbs_certificate.subject.to_string(),
        not_after: not_after(leaf),
        imported_at: entry.imported_at,
    }
}

fn not_after(certificate: &Certificate) -> Option<DateTime<Utc>> {
    let since_epoch = certificate
        .tbs_certificate
        .validity
        .not_after
        .to_unix_duration();
    DateTime::from_timestamp(
        i64::try_from(since_epoch.as_secs()).ok()?,
        since_epoch.subsec_nanos(),
    )
}

/// Parses every `CERTIFICATE` block; the result is never empty
fn parse_certificate_chain(pem: &str) -> Result<Vec<Certificate>> {
    let pem = pem.trim();
    if !pem.contains("-----BEGIN CERTIFICATE-----") {
        return Err(malformed("no CERTIFICATE block found"));
    }
    let chain = Certificate::load_pem_chain(pem.as_bytes())
        .map_err(|e| malformed(format!("invalid certificate: {}", e)))?;
    if chain.is_empty() {
        return Err(malformed("no CERTIFICATE block found"));
    }
    Ok(chain)
}

/// Decodes the subject public key of `certificate`
fn certificate_public_key(certificate: &Certificate) -> Result<PublicMaterial> {
    let spki = &certificate.tbs_certificate.subject_public_key_info;
    let oid = spki.algorithm.oid.to_string();
    let der = spki
        .to_der()
        .map_err(|e| malformed(format!("invalid subject public key: {}", e)))?;

    match oid.as_str() {
        OID_RSA_ENCRYPTION => rsa::RsaPublicKey::from_public_key_der(&der)
            .map(PublicMaterial::Rsa)
            .map_err(|e| malformed(format!("invalid RSA public key: {}", e))),
        OID_EC_PUBLIC_KEY => {
            if let Ok(key) = p256::PublicKey::from_public_key_der(&der) {
                Ok(PublicMaterial::P256(key))
            } else if let Ok(key) = k256::PublicKey::from_public_key_der(&der) {
                Ok(PublicMaterial::K256(key))
            } else {
                Err(ImportFailure::UnsupportedKeyAlgorithm(
                    "EC key on a curve other than P-256 or secp256k1".to_string(),
                )
                .into())
            }
        }
        OID_ED25519 => ed25519_dalek::VerifyingKey::from_public_key_der(&der)
            .map(PublicMaterial::Ed25519)
            .map_err(|e| malformed(format!("invalid Ed25519 public key: {}", e))),
        other => Err(ImportFailure::UnsupportedKeyAlgorithm(other.to_string()).into()),
    }
}

/// Returns the label of the first PEM block in `pem`
fn pem_label(pem: &str) -> Option<&str> {
    pem.lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("-----BEGIN "))
        .and_then(|rest| rest.strip_suffix("-----"))
}

fn parse_private_key(pem: &str) -> Result<PrivateMaterial> {
    let pem = pem.trim();
    match pem_label(pem) {
        Some("PRIVATE KEY") => {
            if let Ok(key) = rsa::RsaPrivateKey::from_pkcs8_pem(pem) {
                Ok(PrivateMaterial::Rsa(key))
            } else if let Ok(key) = p256::SecretKey::from_pkcs8_pem(pem) {
                Ok(PrivateMaterial::P256(key))
            } else if let Ok(key) = k256::SecretKey::from_pkcs8_pem(pem) {
                Ok(PrivateMaterial::K256(key))
            } else if let Ok(key) = ed25519_dalek::SigningKey::from_pkcs8_pem(pem) {
                Ok(PrivateMaterial::Ed25519(key))
            } else {
                Err(malformed("PKCS#8 private key of an unsupported or invalid kind"))
            }
        }
        Some("RSA PRIVATE KEY") => rsa::RsaPrivateKey::from_pkcs1_pem(pem)
            .map(PrivateMaterial::Rsa)
            .map_err(|e| malformed(format!("invalid PKCS#1 private key: {}", e))),
        Some("EC PRIVATE KEY") => {
            if let Ok(key) = p256::SecretKey::from_sec1_pem(pem) {
                Ok(PrivateMaterial::P256(key))
            } else if let Ok(key) = k256::SecretKey::from_sec1_pem(pem) {
                Ok(PrivateMaterial::K256(key))
            } else {
                Err(malformed("SEC1 private key of an unsupported or invalid kind"))
            }
        }
        Some("ENCRYPTED PRIVATE KEY") => Err(ImportFailure::UnsupportedFormat(
            "encrypted PKCS#8 private key".to_string(),
        )
        .into()),
        Some(other) => Err(malformed(format!("unexpected PEM block '{}'", other))),
        None => Err(malformed("no private key PEM block found")),
    }
}
