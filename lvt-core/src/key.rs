//! Stable list keying: assigns durable identities to iteration items so
//! list diffs can be incremental.

use crate::tree::Dynamic;
use std::collections::HashSet;
use std::fmt;

/// An opaque string identity for a comprehension item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(String);

impl Key {
    pub fn new(s: impl Into<String>) -> Self {
        Key(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One comprehension item as seen by the key generator: an optional
/// reserved-field hint from the source data, and the item's rendered
/// dynamic holes (used for the attribute scan and the content-hash
/// fallback).
pub struct ItemSource<'a> {
    pub explicit_key: Option<&'a str>,
    pub dynamics: &'a [Dynamic],
}

/// Default attribute priority list, scanned in order after an explicit key
/// is absent and before falling back to a content hash.
pub fn default_priority_attrs() -> Vec<String> {
    ["data-lvt-key", "data-key", "key", "id"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub struct KeyGenerator {
    priority_attrs: Vec<String>,
}

impl Default for KeyGenerator {
    fn default() -> Self {
        KeyGenerator { priority_attrs: default_priority_attrs() }
    }
}

impl KeyGenerator {
    pub fn new(priority_attrs: Vec<String>) -> Self {
        KeyGenerator { priority_attrs }
    }

    /// Assigns a [`Key`] to each item of a freshly-walked comprehension.
    ///
    /// `previous` is the key set emitted for this same comprehension site
    /// on the prior render; it seeds the collision-avoidance set so that an
    /// unrelated identity that happened to collide in an earlier render
    /// doesn't get its suffix silently reassigned to a different item.
    /// Within a single call, content-hash fallback is a pure function of
    /// rendered content, so an unchanged item always recomputes the same
    /// base key without consulting `previous` at all.
    pub fn assign(
        &self,
        items: &[ItemSource<'_>],
        statics: &[String],
        previous: &[Key],
    ) -> Vec<Key> {
        let mut used: HashSet<String> = previous.iter().map(|k| k.0.clone()).collect();
        let mut assigned = Vec::with_capacity(items.len());

        for item in items {
            let base = self.resolve_base_key(item, statics);
            let mut candidate = base.clone();
            let mut suffix = 2;
            while used.contains(&candidate) {
                tracing::warn!(base = %base, candidate = %candidate, "key collision, suffixing");
                candidate = format!("{base}-{suffix}");
                suffix += 1;
            }
            used.insert(candidate.clone());
            assigned.push(Key(candidate));
        }

        assigned
    }

    fn resolve_base_key(&self, item: &ItemSource<'_>, statics: &[String]) -> String {
        if let Some(explicit) = item.explicit_key {
            return explicit.to_string();
        }
        if let Some(from_attr) = self.scan_attribute(item, statics) {
            return from_attr;
        }
        self.content_hash(item)
    }

    /// Scans `statics` for one of the priority attribute names immediately
    /// followed by an opening quote; the dynamic hole right after that
    /// static fragment supplies the key value.
    fn scan_attribute(&self, item: &ItemSource<'_>, statics: &[String]) -> Option<String> {
        for attr in &self.priority_attrs {
            let pattern = format!("{attr}=\"");
            for (i, s) in statics.iter().enumerate() {
                if i >= item.dynamics.len() {
                    break;
                }
                if s.trim_end().ends_with(&pattern) {
                    if let Dynamic::Text(value) = &item.dynamics[i] {
                        return Some(value.clone());
                    }
                }
            }
        }
        None
    }

    fn content_hash(&self, item: &ItemSource<'_>) -> String {
        let mut hasher = blake3::Hasher::new();
        for dynamic in item.dynamics {
            match dynamic {
                Dynamic::Text(s) => {
                    hasher.update(b"t");
                    hasher.update(s.as_bytes());
                }
                Dynamic::Node(n) => {
                    hasher.update(b"n");
                    hasher.update(&n.fingerprint().to_le_bytes());
                }
            }
        }
        hasher.finalize().to_hex()[..12].to_string()
    }
}
