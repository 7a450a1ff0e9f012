//! Consistency rules for key-set mutations
//!
//! These are pure functions: they never modify the key set they are given
//! and return a new one instead, so a failed rule leaves the caller's
//! state exactly as it was. The repository runs them inside its
//! compare-and-swap loop against a freshly loaded key set.

use crate::error::{Error, Result};
use crate::key_entry::KeyEntry;
use crate::key_set::KeySet;

/// Appends `entry`, failing if its `kid` is already present
pub fn insert(key_set: &KeySet, entry: KeyEntry) -> Result<KeySet> {
    if key_set.contains_kid(&entry.kid) {
        return Err(Error::DuplicateKeyId(entry.kid));
    }

    let mut next = key_set.clone();
    next.push(entry);
    Ok(next)
}

/// Removes the entry with the given `kid`
pub fn remove_by_kid(key_set: &KeySet, kid: &str) -> Result<KeySet> {
    let position = key_set
        .position(kid)
        .ok_or_else(|| Error::KeyNotFound(kid.to_string()))?;

    let mut next = key_set.clone();
    next.remove_at(position);
    Ok(next)
}

/// Looks up the entry with the given `kid`
pub fn find_by_kid<'a>(key_set: &'a KeySet, kid: &str) -> Option<&'a KeyEntry> {
    key_set.get(kid)
}

/// Replaces the entry with the given `kid`, keeping its position.
///
/// The replacement may carry a different `kid` (a patched rename); it must
/// not collide with any other entry.
pub fn replace_by_kid(key_set: &KeySet, kid: &str, entry: KeyEntry) -> Result<KeySet> {
    let position = key_set
        .position(kid)
        .ok_or_else(|| Error::KeyNotFound(kid.to_string()))?;

    if entry.kid != kid && key_set.contains_kid(&entry.kid) {
        return Err(Error::DuplicateKeyId(entry.kid));
    }

    let mut next = key_set.clone();
    next.set_at(position, entry);
    Ok(next)
}
