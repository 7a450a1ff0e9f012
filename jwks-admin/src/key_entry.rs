//! JSON Web Key entries and their codec
//!
//! A [`KeyEntry`] is one public key published in the server's key set
//! (RFC 7517). Entries are parsed from and serialized to the JWK wire format
//! with [`parse`] and [`serialize`]; parsing always runs [`KeyEntry::validate`],
//! so every `KeyEntry` obtained through the codec is structurally sound for
//! its declared key type, curve and algorithm.

use crate::error::{Error, Result};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;

/// JWK members that carry private key material. A published key set must
/// never contain them.
const PRIVATE_MEMBERS: &[&str] = &["d", "p", "q", "dp", "dq", "qi", "oth", "k"];

/// The `kty` of a key entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    /// RSA public key (`n`, `e`)
    #[serde(rename = "RSA")]
    Rsa,
    /// Elliptic curve public key (`crv`, `x`, `y`)
    #[serde(rename = "EC")]
    Ec,
    /// Octet key pair (`crv`, `x`), e.g. Ed25519
    #[serde(rename = "OKP")]
    Okp,
}

impl KeyType {
    /// Returns the `kty` value as it appears on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Rsa => "RSA",
            KeyType::Ec => "EC",
            KeyType::Okp => "OKP",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The intended `use` of a key entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyUse {
    /// Signature verification
    Sig,
    /// Encryption
    Enc,
}

impl KeyUse {
    /// Returns the `use` value as it appears on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyUse::Sig => "sig",
            KeyUse::Enc => "enc",
        }
    }
}

impl std::str::FromStr for KeyUse {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sig" => Ok(KeyUse::Sig),
            "enc" => Ok(KeyUse::Enc),
            other => Err(Error::InvalidKeyMaterial(format!(
                "unknown key use '{}', expected 'sig' or 'enc'",
                other
            ))),
        }
    }
}

/// One public key of the key set.
///
/// Field order is the wire order used by [`serialize`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEntry {
    /// Key ID, unique within a key set
    pub kid: String,
    /// Key type
    pub kty: KeyType,
    /// Intended use
    #[serde(rename = "use")]
    pub key_use: KeyUse,
    /// JWA algorithm identifier
    pub alg: String,
    /// Expiry as milliseconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Curve name (EC and OKP)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    /// X coordinate (EC) or public key (OKP), base64url
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    /// Y coordinate (EC), base64url
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    /// RSA modulus, base64url
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA public exponent, base64url
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    /// Certificate chain, standard base64 DER, leaf first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub x5c: Vec<String>,
    /// Every other member (`x5t`, `x5t#S256`, `x5u`, `key_ops`, extensions),
    /// kept verbatim and serialized after the members above
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Parses and validates a single key entry from its JWK form
pub fn parse(raw: &Value) -> Result<KeyEntry> {
    let object = raw
        .as_object()
        .ok_or_else(|| Error::InvalidKeyMaterial("key entry must be a JSON object".to_string()))?;

    if let Some(member) = PRIVATE_MEMBERS.iter().find(|m| object.contains_key(**m)) {
        return Err(Error::InvalidKeyMaterial(format!(
            "private key member '{}' must not be published",
            member
        )));
    }

    let entry: KeyEntry = serde_json::from_value(raw.clone())
        .map_err(|e| Error::InvalidKeyMaterial(e.to_string()))?;
    entry.validate()?;
    Ok(entry)
}

/// Parses and validates a single key entry from JSON text
pub fn parse_str(raw: &str) -> Result<KeyEntry> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| Error::InvalidKeyMaterial(e.to_string()))?;
    parse(&value)
}

/// Serializes a key entry to its JWK form with members in wire order
pub fn serialize(entry: &KeyEntry) -> Value {
    // Every field is a string, integer, enum or string list
    serde_json::to_value(entry).unwrap_or(Value::Null)
}

impl KeyEntry {
    /// Creates an RSA entry from base64url `n` and `e`
    pub fn new_rsa(kid: &str, key_use: KeyUse, alg: &str, n: &str, e: &str) -> Self {
        Self {
            kid: kid.to_string(),
            kty: KeyType::Rsa,
            key_use,
            alg: alg.to_string(),
            exp: None,
            crv: None,
            x: None,
            y: None,
            n: Some(n.to_string()),
            e: Some(e.to_string()),
            x5c: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Creates an EC entry from a curve name and base64url coordinates
    pub fn new_ec(kid: &str, key_use: KeyUse, alg: &str, crv: &str, x: &str, y: &str) -> Self {
        Self {
            kid: kid.to_string(),
            kty: KeyType::Ec,
            key_use,
            alg: alg.to_string(),
            exp: None,
            crv: Some(crv.to_string()),
            x: Some(x.to_string()),
            y: Some(y.to_string()),
            n: None,
            e: None,
            x5c: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Creates an OKP entry from a curve name and base64url public key
    pub fn new_okp(kid: &str, key_use: KeyUse, alg: &str, crv: &str, x: &str) -> Self {
        Self {
            kid: kid.to_string(),
            kty: KeyType::Okp,
            key_use,
            alg: alg.to_string(),
            exp: None,
            crv: Some(crv.to_string()),
            x: Some(x.to_string()),
            y: None,
            n: None,
            e: None,
            x5c: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Sets the certificate chain
    pub fn with_x5c(mut self, chain: Vec<String>) -> Self {
        self.x5c = chain;
        self
    }

    /// Sets a member outside the modelled set, e.g. `x5t#S256`
    pub fn with_member(mut self, name: &str, value: Value) -> Self {
        self.extra.insert(name.to_string(), value);
        self
    }

    /// Sets the expiry
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.exp = Some(expires_at.timestamp_millis());
        self
    }

    /// Returns the expiry as a timestamp, if one is set
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(DateTime::from_timestamp_millis)
    }

    /// Whether the entry has an expiry at or before `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|exp| exp <= now)
    }

    /// Validates the entry against its declared key type, curve and algorithm
    pub fn validate(&self) -> Result<()> {
        if self.kid.trim().is_empty() {
            return Err(invalid("kid must not be empty"));
        }

        if let Some(exp) = self.exp {
            if exp < 0 {
                return Err(invalid("exp must not be negative"));
            }
        }

        match self.kty {
            KeyType::Rsa => self.validate_rsa()?,
            KeyType::Ec => self.validate_ec()?,
            KeyType::Okp => self.validate_okp()?,
        }

        for (position, cert) in self.x5c.iter().enumerate() {
            match STANDARD.decode(cert) {
                Ok(der) if !der.is_empty() => {}
                _ => {
                    return Err(invalid(format!(
                        "x5c[{}] is not a base64 encoded certificate",
                        position
                    )))
                }
            }
        }

        self.validate_extra_members()
    }

    fn validate_extra_members(&self) -> Result<()> {
        for (name, value) in &self.extra {
            if PRIVATE_MEMBERS.contains(&name.as_str()) {
                return Err(invalid(format!(
                    "private key member '{}' must not be published",
                    name
                )));
            }
            match name.as_str() {
                "x5t" => check_digest(name, value, 20)?,
                "x5t#S256" => check_digest(name, value, 32)?,
                "x5u" if !value.is_string() => {
                    return Err(invalid("'x5u' must be a URL string"));
                }
                "key_ops" => {
                    let all_strings = value
                        .as_array()
                        .is_some_and(|ops| ops.iter().all(Value::is_string));
                    if !all_strings {
                        return Err(invalid("'key_ops' must be an array of strings"));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn validate_rsa(&self) -> Result<()> {
        forbid(&self.crv, "crv", self.kty)?;
        forbid(&self.x, "x", self.kty)?;
        forbid(&self.y, "y", self.kty)?;

        let n = decode_member(&self.n, "n")?;
        let e = decode_member(&self.e, "e")?;
        if n.is_empty() || e.is_empty() {
            return Err(invalid("RSA modulus and exponent must not be empty"));
        }

        self.check_alg(&[
            "RS256",
            "RS384",
            "RS512",
            "PS256",
            "PS384",
            "PS512",
            "RSA-OAEP",
            "RSA-OAEP-256",
            "RSA1_5",
        ])
    }

    fn validate_ec(&self) -> Result<()> {
        forbid(&self.n, "n", self.kty)?;
        forbid(&self.e, "e", self.kty)?;

        let crv = self
            .crv
            .as_deref()
            .ok_or_else(|| invalid("EC key is missing 'crv'"))?;
        let (coordinate_len, signing_alg) = match crv {
            "P-256" => (32, "ES256"),
            "P-384" => (48, "ES384"),
            "P-521" => (66, "ES512"),
            "secp256k1" => (32, "ES256K"),
            other => return Err(invalid(format!("unsupported EC curve '{}'", other))),
        };

        let x = decode_member(&self.x, "x")?;
        let y = decode_member(&self.y, "y")?;
        if x.len() != coordinate_len || y.len() != coordinate_len {
            return Err(invalid(format!(
                "{} coordinates must be {} bytes",
                crv, coordinate_len
            )));
        }

        if self.alg == signing_alg {
            Ok(())
        } else {
            self.check_alg(ECDH_ALGORITHMS)
        }
    }

    fn validate_okp(&self) -> Result<()> {
        forbid(&self.y, "y", self.kty)?;
        forbid(&self.n, "n", self.kty)?;
        forbid(&self.e, "e", self.kty)?;

        let crv = self
            .crv
            .as_deref()
            .ok_or_else(|| invalid("OKP key is missing 'crv'"))?;
        let (key_len, agreement) = match crv {
            "Ed25519" => (32, false),
            "Ed448" => (57, false),
            "X25519" => (32, true),
            "X448" => (56, true),
            other => return Err(invalid(format!("unsupported OKP curve '{}'", other))),
        };

        let x = decode_member(&self.x, "x")?;
        if x.len() != key_len {
            return Err(invalid(format!("{} public key must be {} bytes", crv, key_len)));
        }

        if agreement {
            self.check_alg(ECDH_ALGORITHMS)
        } else {
            self.check_alg(&["EdDSA"])
        }
    }

    fn check_alg(&self, allowed: &[&str]) -> Result<()> {
        if allowed.contains(&self.alg.as_str()) {
            Ok(())
        } else {
            Err(invalid(format!(
                "algorithm '{}' is not valid for {} key '{}'",
                self.alg, self.kty, self.kid
            )))
        }
    }

    /// Computes the RFC 7638 JWK thumbprint (SHA-256, base64url)
    pub fn thumbprint(&self) -> Result<String> {
        let kty = Some(self.kty.as_str());
        // Required members in lexicographic order
        let required = match self.kty {
            KeyType::Rsa => vec![("e", self.e.as_deref()), ("kty", kty), ("n", self.n.as_deref())],
            KeyType::Ec => vec![
                ("crv", self.crv.as_deref()),
                ("kty", kty),
                ("x", self.x.as_deref()),
                ("y", self.y.as_deref()),
            ],
            KeyType::Okp => vec![
                ("crv", self.crv.as_deref()),
                ("kty", kty),
                ("x", self.x.as_deref()),
            ],
        };

        let mut members = Vec::with_capacity(required.len());
        for (name, value) in required {
            let value =
                value.ok_or_else(|| invalid(format!("missing '{}' for thumbprint", name)))?;
            members.push(format!("\"{}\":{}", name, Value::String(value.to_string())));
        }

        let canonical = format!("{{{}}}", members.join(","));
        Ok(URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes())))
    }
}

const ECDH_ALGORITHMS: &[&str] = &[
    "ECDH-ES",
    "ECDH-ES+A128KW",
    "ECDH-ES+A192KW",
    "ECDH-ES+A256KW",
];

fn invalid(reason: impl Into<String>) -> Error {
    Error::InvalidKeyMaterial(reason.into())
}

fn forbid(member: &Option<String>, name: &str, kty: KeyType) -> Result<()> {
    match member {
        Some(_) => Err(invalid(format!("'{}' is not a {} key parameter", name, kty))),
        None => Ok(()),
    }
}

fn check_digest(name: &str, value: &Value, len: usize) -> Result<()> {
    let decoded = value
        .as_str()
        .and_then(|encoded| URL_SAFE_NO_PAD.decode(encoded).ok());
    match decoded {
        Some(digest) if digest.len() == len => Ok(()),
        _ => Err(invalid(format!(
            "'{}' must be a base64url encoded {}-byte digest",
            name, len
        ))),
    }
}

fn decode_member(member: &Option<String>, name: &str) -> Result<Vec<u8>> {
    let encoded = member
        .as_deref()
        .ok_or_else(|| invalid(format!("missing required parameter '{}'", name)))?;
    URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| invalid(format!("'{}' is not valid base64url: {}", name, e)))
}
