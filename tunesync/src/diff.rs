//! Keyed-collection utilities.
//!
//! Every sync and consistency-check task decides whether a corrective
//! action is needed by diffing keyed collections, never by ad hoc
//! loops. All functions here are pure and never mutate their inputs;
//! a non-empty difference is what makes a task's `check` diverge.

use crate::errors::DuplicateKeyError;
use std::collections::BTreeMap;
use std::fmt::Display;

/// Indexes items by a key. On duplicate keys the last item wins.
pub fn index_by<K, T, I, F>(items: I, key: F) -> BTreeMap<K, T>
where
    I: IntoIterator<Item = T>,
    K: Ord,
    F: Fn(&T) -> K,
{
    let mut index = BTreeMap::new();
    for item in items {
        index.insert(key(&item), item);
    }
    index
}

/// Indexes items by a key, failing on the first repeated key.
///
/// # Errors
///
/// Returns [`DuplicateKeyError`] naming the repeated key.
pub fn index_by_unique<K, T, I, F>(items: I, key: F) -> Result<BTreeMap<K, T>, DuplicateKeyError>
where
    I: IntoIterator<Item = T>,
    K: Ord + Display,
    F: Fn(&T) -> K,
{
    let mut index = BTreeMap::new();
    for item in items {
        let k = key(&item);
        if index.contains_key(&k) {
            return Err(DuplicateKeyError::new(k.to_string()));
        }
        index.insert(k, item);
    }
    Ok(index)
}

/// Flattens one level of nesting (e.g. all tracks across all
/// playlists) into a single index. Last write wins on key collision.
pub fn index_by_nested<G, T, K, I, CI, CF, KF>(groups: I, children: CF, key: KF) -> BTreeMap<K, T>
where
    I: IntoIterator<Item = G>,
    CF: Fn(G) -> CI,
    CI: IntoIterator<Item = T>,
    KF: Fn(&T) -> K,
    K: Ord,
{
    let mut index = BTreeMap::new();
    for group in groups {
        for item in children(group) {
            index.insert(key(&item), item);
        }
    }
    index
}

/// Items whose key is in `a` but not in `b`.
///
/// `b`'s values are irrelevant, so the two maps may index different
/// item types (e.g. local files against remote tracks).
#[must_use]
pub fn difference<K, V, W>(a: &BTreeMap<K, V>, b: &BTreeMap<K, W>) -> BTreeMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    a.iter()
        .filter(|(k, _)| !b.contains_key(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Items whose key is in both maps, values taken from `a`.
#[must_use]
pub fn intersection<K, V, W>(a: &BTreeMap<K, V>, b: &BTreeMap<K, W>) -> BTreeMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    a.iter()
        .filter(|(k, _)| b.contains_key(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
