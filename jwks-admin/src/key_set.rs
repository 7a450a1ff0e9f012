//! The server's key set
//!
//! A [`KeySet`] keeps its entries in insertion order, which is the order
//! they are published in, and maintains a `kid -> position` index so
//! lookups do not depend on the number of keys.

use crate::error::{Error, Result};
use crate::key_entry::{self, KeyEntry};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;

/// Ordered collection of key entries with unique `kid`s
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: Vec<KeyEntry>,
    index: HashMap<String, usize>,
}

impl KeySet {
    /// Create a new empty key set
    pub fn new() -> Self {
        Default::default()
    }

    /// Builds a key set from entries in order, rejecting duplicate `kid`s
    pub fn from_entries(entries: Vec<KeyEntry>) -> Result<Self> {
        let mut set = Self::new();
        for entry in entries {
            if set.contains_kid(&entry.kid) {
                return Err(Error::DuplicateKeyId(entry.kid));
            }
            set.push(entry);
        }
        Ok(set)
    }

    /// Parses a `{"keys": [...]}` document, validating every entry
    pub fn parse(raw: &Value) -> Result<Self> {
        let keys = raw
            .get("keys")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                Error::InvalidKeyMaterial("key set must contain a 'keys' array".to_string())
            })?;

        let entries = keys
            .iter()
            .map(key_entry::parse)
            .collect::<Result<Vec<_>>>()?;
        Self::from_entries(entries)
    }

    /// Serializes the key set to its `{"keys": [...]}` wire form
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "keys": self.keys.iter().map(key_entry::serialize).collect::<Vec<_>>()
        })
    }

    /// The entries in publication order
    pub fn keys(&self) -> &[KeyEntry] {
        &self.keys
    }

    /// Iterates over the entries in publication order
    pub fn iter(&self) -> std::slice::Iter<'_, KeyEntry> {
        self.keys.iter()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set has no entries
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Looks up an entry by `kid`
    pub fn get(&self, kid: &str) -> Option<&KeyEntry> {
        self.index.get(kid).map(|&position| &self.keys[position])
    }

    /// Position of the entry with the given `kid`
    pub fn position(&self, kid: &str) -> Option<usize> {
        self.index.get(kid).copied()
    }

    /// Whether an entry with the given `kid` exists
    pub fn contains_kid(&self, kid: &str) -> bool {
        self.index.contains_key(kid)
    }

    /// Appends an entry. The caller guarantees the `kid` is not present.
    pub(crate) fn push(&mut self, entry: KeyEntry) {
        self.index.insert(entry.kid.clone(), self.keys.len());
        self.keys.push(entry);
    }

    /// Removes the entry at `position`, shifting later entries down
    pub(crate) fn remove_at(&mut self, position: usize) -> KeyEntry {
        let removed = self.keys.remove(position);
        self.index.remove(&removed.kid);
        for slot in self.index.values_mut() {
            if *slot > position {
                *slot -= 1;
            }
        }
        removed
    }

    /// Overwrites the entry at `position`. The caller guarantees the new
    /// `kid` does not collide with any other entry.
    pub(crate) fn set_at(&mut self, position: usize, entry: KeyEntry) {
        let previous = std::mem::replace(&mut self.keys[position], entry);
        if previous.kid != self.keys[position].kid {
            self.index.remove(&previous.kid);
            self.index.insert(self.keys[position].kid.clone(), position);
        }
    }
}

impl PartialEq for KeySet {
    fn eq(&self, other: &Self) -> bool {
        self.keys == other.keys
    }
}

impl Eq for KeySet {}

impl<'a> IntoIterator for &'a KeySet {
    type Item = &'a KeyEntry;
    type IntoIter = std::slice::Iter<'a, KeyEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}

impl Serialize for KeySet {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        #[derive(Serialize)]
        struct Document<'a> {
            keys: &'a [KeyEntry],
        }

        Document { keys: &self.keys }.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for KeySet {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        KeySet::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_entry::KeyUse;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn rsa(kid: &str) -> KeyEntry {
        KeyEntry::new_rsa(kid, KeyUse::Sig, "RS256", "u2hCrGnEPV8tJ0ys", "AQAB")
    }

    #[test]
    fn test_from_entries_rejects_duplicates() {
        let result = KeySet::from_entries(vec![rsa("a"), rsa("b"), rsa("a")]);
        assert_matches!(result, Err(Error::DuplicateKeyId(kid)) if kid == "a");
    }

    #[test]
    fn test_index_tracks_removal() {
        let mut set = KeySet::from_entries(vec![rsa("a"), rsa("b"), rsa("c")]).unwrap();
        set.remove_at(0);
        assert_eq!(set.position("b"), Some(0));
        assert_eq!(set.position("c"), Some(1));
        assert!(set.get("a").is_none());
        assert_eq!(set.get("c").unwrap().kid, "c");
    }

    #[test]
    fn test_set_at_reindexes_renamed_kid() {
        let mut set = KeySet::from_entries(vec![rsa("a"), rsa("b")]).unwrap();
        set.set_at(0, rsa("z"));
        assert!(!set.contains_kid("a"));
        assert_eq!(set.position("z"), Some(0));
        assert_eq!(set.keys()[1].kid, "b");
    }

    #[test]
    fn test_parse_requires_keys_array() {
        assert_matches!(
            KeySet::parse(&json!({"other": []})),
            Err(Error::InvalidKeyMaterial(_))
        );
        assert!(KeySet::parse(&json!({"keys": []})).unwrap().is_empty());
    }

    #[test]
    fn test_serde_uses_wire_format() {
        let set = KeySet::from_entries(vec![rsa("a"), rsa("b")]).unwrap();
        let value = serde_json::to_value(&set).unwrap();
        assert_eq!(value, set.to_value());
        assert_eq!(value["keys"][1]["kid"], "b");

        let back: KeySet = serde_json::from_value(value).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn test_deserialize_rejects_duplicates() {
        let raw = json!({"keys": [
            {"kid": "a", "kty": "RSA", "use": "sig", "alg": "RS256", "n": "u2hC", "e": "AQAB"},
            {"kid": "a", "kty": "RSA", "use": "sig", "alg": "RS256", "n": "u2hC", "e": "AQAB"}
        ]});
        assert!(serde_json::from_value::<KeySet>(raw).is_err());
    }
}
