//! JSON Patch (RFC 6902) for key entries and key sets
//!
//! Supports the `add`, `remove` and `replace` operations. A [`Patch`] is
//! parsed eagerly: unknown operation kinds, missing members and malformed
//! JSON Pointers are rejected before anything is applied. Application works
//! on a private copy of the target document, so a failing operation never
//! leaves a partially patched value behind.

use crate::error::{Error, Result};
use crate::key_entry::{self, KeyEntry};
use crate::key_set::KeySet;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single patch operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    /// Adds a member, inserts into an array, or replaces an existing member
    Add {
        /// Target location (JSON Pointer)
        path: String,
        /// Value to add
        value: Value,
    },
    /// Removes an existing member or array element
    Remove {
        /// Target location (JSON Pointer)
        path: String,
    },
    /// Replaces an existing value
    Replace {
        /// Target location (JSON Pointer)
        path: String,
        /// Replacement value
        value: Value,
    },
}

impl PatchOperation {
    /// The JSON Pointer this operation targets
    pub fn path(&self) -> &str {
        match self {
            PatchOperation::Add { path, .. }
            | PatchOperation::Remove { path }
            | PatchOperation::Replace { path, .. } => path,
        }
    }
}

/// An ordered list of patch operations
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Patch {
    operations: Vec<PatchOperation>,
}

impl Patch {
    /// Creates a patch from already constructed operations
    pub fn new(operations: Vec<PatchOperation>) -> Result<Self> {
        for (index, operation) in operations.iter().enumerate() {
            Pointer::parse(operation.path()).map_err(|reason| Error::invalid_patch(index, reason))?;
        }
        Ok(Self { operations })
    }

    /// Parses a JSON Patch document
    pub fn parse(raw: &Value) -> Result<Self> {
        let items = raw
            .as_array()
            .ok_or_else(|| Error::invalid_patch(0, "patch document must be a JSON array"))?;

        let operations = items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                serde_json::from_value::<PatchOperation>(item.clone())
                    .map_err(|e| Error::invalid_patch(index, e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(operations)
    }

    /// Parses a JSON Patch document from text
    pub fn parse_str(raw: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| Error::invalid_patch(0, e.to_string()))?;
        Self::parse(&value)
    }

    /// The operations in document order
    pub fn operations(&self) -> &[PatchOperation] {
        &self.operations
    }

    /// Applies the operations in order to a copy of `document`
    pub fn apply_to_value(&self, document: &Value) -> Result<Value> {
        let mut working = document.clone();
        for (index, operation) in self.operations.iter().enumerate() {
            apply_operation(&mut working, operation)
                .map_err(|reason| Error::invalid_patch(index, reason))?;
        }
        Ok(working)
    }
}

impl<'de> Deserialize<'de> for Patch {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        Patch::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Applies `patch` to `entry`, returning the patched entry.
///
/// The result is re-validated; a structurally invalid result fails with
/// [`Error::InvalidKeyMaterial`].
pub fn apply(entry: &KeyEntry, patch: &Patch) -> Result<KeyEntry> {
    let patched = patch.apply_to_value(&key_entry::serialize(entry))?;
    key_entry::parse(&patched)
}

/// Applies `patch` to the `{"keys": [...]}` form of `key_set`.
///
/// The result must be a valid key set, including `kid` uniqueness.
pub fn apply_to_key_set(key_set: &KeySet, patch: &Patch) -> Result<KeySet> {
    let patched = patch.apply_to_value(&key_set.to_value())?;
    KeySet::parse(&patched)
}

/// A parsed JSON Pointer (RFC 6901)
#[derive(Debug, Clone, PartialEq, Eq)]
struct Pointer {
    tokens: Vec<String>,
}

impl Pointer {
    fn parse(path: &str) -> std::result::Result<Self, String> {
        if path.is_empty() {
            return Ok(Self { tokens: Vec::new() });
        }
        if !path.starts_with('/') {
            return Err(format!("path '{}' must start with '/'", path));
        }

        let tokens = path[1..]
            .split('/')
            .map(unescape_token)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|reason| format!("path '{}': {}", path, reason))?;
        Ok(Self { tokens })
    }

    fn split_last(&self) -> Option<(&[String], &str)> {
        self.tokens
            .split_last()
            .map(|(last, parent)| (parent, last.as_str()))
    }
}

fn unescape_token(token: &str) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(token.len());
    let mut chars = token.chars();
    while let Some(c) = chars.next() {
        if c == '~' {
            match chars.next() {
                Some('0') => out.push('~'),
                Some('1') => out.push('/'),
                _ => return Err(format!("invalid escape in token '{}'", token)),
            }
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

fn array_index(token: &str) -> Option<usize> {
    let leading_zero = token.len() > 1 && token.starts_with('0');
    if token.is_empty() || leading_zero || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

fn resolve_mut<'a>(document: &'a mut Value, tokens: &[String]) -> Option<&'a mut Value> {
    tokens.iter().try_fold(document, |current, token| match current {
        Value::Object(map) => map.get_mut(token),
        Value::Array(items) => array_index(token).and_then(move |i| items.get_mut(i)),
        _ => None,
    })
}

fn apply_operation(document: &mut Value, operation: &PatchOperation) -> std::result::Result<(), String> {
    let pointer = Pointer::parse(operation.path())?;
    let path = operation.path();

    match operation {
        PatchOperation::Add { value, .. } => {
            let Some((parent, last)) = pointer.split_last() else {
                *document = value.clone();
                return Ok(());
            };
            let target = resolve_mut(document, parent)
                .ok_or_else(|| format!("path '{}' does not exist", path))?;
            match target {
                Value::Object(map) => {
                    map.insert(last.to_string(), value.clone());
                }
                Value::Array(items) => {
                    if last == "-" {
                        items.push(value.clone());
                    } else {
                        let index = array_index(last)
                            .filter(|&i| i <= items.len())
                            .ok_or_else(|| format!("array index in '{}' is out of bounds", path))?;
                        items.insert(index, value.clone());
                    }
                }
                _ => return Err(format!("parent of '{}' is not an object or array", path)),
            }
        }
        PatchOperation::Remove { .. } => {
            let (parent, last) = pointer
                .split_last()
                .ok_or_else(|| "cannot remove the whole document".to_string())?;
            let target = resolve_mut(document, parent)
                .ok_or_else(|| format!("path '{}' does not exist", path))?;
            let removed = match target {
                Value::Object(map) => map.remove(last).is_some(),
                Value::Array(items) => match array_index(last).filter(|&i| i < items.len()) {
                    Some(index) => {
                        items.remove(index);
                        true
                    }
                    None => false,
                },
                _ => false,
            };
            if !removed {
                return Err(format!("path '{}' does not exist", path));
            }
        }
        PatchOperation::Replace { value, .. } => {
            let target = resolve_mut(document, &pointer.tokens)
                .ok_or_else(|| format!("path '{}' does not exist", path))?;
            *target = value.clone();
        }
    }

    Ok(())
}
