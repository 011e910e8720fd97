//! Patch shapes produced by the Diff Engine: the minimal delta between a
//! previous and current render.

use crate::key::Key;
use crate::tree::{Item, Node};
use std::collections::BTreeMap;

/// A patch for one interleaved node: a sparse map from dynamic index to the
/// new value at that index. Indices absent from `changes` are unchanged.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Patch {
    pub changes: BTreeMap<usize, PatchValue>,
}

impl Patch {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// The new value at one dynamic index.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchValue {
    /// The hole's rendered text changed.
    Text(String),
    /// The hole's nested subtree changed; this is a smaller patch into it.
    Patch(Box<Patch>),
    /// The hole now holds a node with no smaller patch available — a
    /// changed statics signature, a leaf replacing a subtree or vice versa,
    /// or a comprehension that exceeded the incremental list-diff budget.
    /// Sent with statics included.
    Replace(Node),
    /// The hole is a comprehension and only list-level operations changed.
    ListOps(Vec<ListOp>),
}

/// One operation against a comprehension's keyed item list, encoded on the
/// wire with the single-letter codes `a`/`i`/`r`/`u`/`o`.
#[derive(Debug, Clone, PartialEq)]
pub enum ListOp {
    /// Append new items at the end, in order. `statics` is included only the
    /// first time the client ever sees this comprehension's per-item shape
    /// (i.e. the old list was empty).
    Append { items: Vec<(Key, Item)>, statics: Option<Vec<String>> },
    /// Insert one item after `after`, or at the start if `None`.
    Insert { after: Option<Key>, key: Key, item: Item },
    /// Remove the item identified by `key`.
    Remove { key: Key },
    /// Patch an existing item's dynamics in place.
    Update { key: Key, patch: Patch },
    /// Reorder the existing items to this key order; no content changed.
    Reorder { order: Vec<Key> },
}
