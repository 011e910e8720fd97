//! The Tree Node model: the canonical static/dynamic decomposition of a
//! rendered template, either an interleaved fragment or an iteration
//! comprehension.

use crate::key::Key;

/// A rendered subtree: either interleaved statics-and-dynamics, or a
/// comprehension over a list of items sharing one set of per-item statics.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Interleaved(Interleaved),
    Comprehension(Comprehension),
}

/// `N` dynamic holes interleaved with `N+1` static fragments:
/// `statics[0] dynamics[0] statics[1] dynamics[1] ... statics[N]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Interleaved {
    pub statics: Vec<String>,
    pub dynamics: Vec<Dynamic>,
    /// Populated on every walk; only placed on the wire when
    /// `SessionConfig::expose_fingerprints` is set.
    pub fingerprint: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Dynamic {
    Text(String),
    Node(Node),
}

/// An iteration: `statics` are the `N+1` statics of the per-item template
/// body, shared by every item; `items` are the per-item dynamic holes,
/// each paired with the stable [`Key`] assigned to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    pub statics: Vec<String>,
    pub items: Vec<(Key, Item)>,
}

/// One comprehension item's dynamic holes, positionally aligned with the
/// gaps in the comprehension's `statics`.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub dynamics: Vec<Dynamic>,
}

impl Interleaved {
    pub fn new(statics: Vec<String>, dynamics: Vec<Dynamic>) -> Self {
        debug_assert_eq!(
            statics.len(),
            dynamics.len() + 1,
            "an interleaved node with N dynamics must have exactly N+1 statics"
        );
        let mut node = Interleaved { statics, dynamics, fingerprint: None };
        node.fingerprint = Some(node.compute_fingerprint());
        node
    }

    fn compute_fingerprint(&self) -> u64 {
        let mut hasher = blake3::Hasher::new();
        for s in &self.statics {
            hasher.update(b"s");
            hasher.update(s.as_bytes());
        }
        for d in &self.dynamics {
            hash_dynamic(&mut hasher, d);
        }
        fold_to_u64(hasher.finalize().as_bytes())
    }
}

impl Comprehension {
    pub fn new(statics: Vec<String>, items: Vec<(Key, Item)>) -> Self {
        for (_, item) in &items {
            debug_assert_eq!(
                item.dynamics.len(),
                statics.len().saturating_sub(1),
                "every comprehension item must have one dynamic per static gap"
            );
        }
        Comprehension { statics, items }
    }
}

impl Node {
    pub fn fingerprint(&self) -> u64 {
        match self {
            Node::Interleaved(i) => i.fingerprint.unwrap_or_else(|| i.compute_fingerprint()),
            Node::Comprehension(c) => {
                let mut hasher = blake3::Hasher::new();
                for s in &c.statics {
                    hasher.update(b"s");
                    hasher.update(s.as_bytes());
                }
                for (key, item) in &c.items {
                    hasher.update(key.as_str().as_bytes());
                    for d in &item.dynamics {
                        hash_dynamic(&mut hasher, d);
                    }
                }
                fold_to_u64(hasher.finalize().as_bytes())
            }
        }
    }

    /// The statics signature used to decide whether two nodes are the "same
    /// construct" for diffing purposes.
    pub fn statics_signature(&self) -> &[String] {
        match self {
            Node::Interleaved(i) => &i.statics,
            Node::Comprehension(c) => &c.statics,
        }
    }

    pub fn is_comprehension(&self) -> bool {
        matches!(self, Node::Comprehension(_))
    }
}

fn hash_dynamic(hasher: &mut blake3::Hasher, dynamic: &Dynamic) {
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

fn fold_to_u64(bytes: &[u8; 32]) -> u64 {
    u64::from_le_bytes(bytes[..8].try_into().unwrap())
}

/// Flattens a Tree Node into the HTML string it represents — used once, for
/// the initial full-page render; subsequent updates travel as patches,
/// never as re-rendered HTML.
pub fn render_html(node: &Node) -> String {
    let mut out = String::new();
    write_node(node, &mut out);
    out
}

fn write_node(node: &Node, out: &mut String) {
    match node {
        Node::Interleaved(i) => {
            for (idx, static_part) in i.statics.iter().enumerate() {
                out.push_str(static_part);
                if let Some(dynamic) = i.dynamics.get(idx) {
                    write_dynamic(dynamic, out);
                }
            }
        }
        Node::Comprehension(c) => {
            for (_, item) in &c.items {
                for (idx, static_part) in c.statics.iter().enumerate() {
                    out.push_str(static_part);
                    if let Some(dynamic) = item.dynamics.get(idx) {
                        write_dynamic(dynamic, out);
                    }
                }
            }
        }
    }
}

fn write_dynamic(dynamic: &Dynamic, out: &mut String) {
    match dynamic {
        Dynamic::Text(s) => out.push_str(s),
        Dynamic::Node(n) => write_node(n, out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleaved_invariant_holds_for_valid_construction() {
        let node = Interleaved::new(
            vec!["Hello ".to_string(), "!".to_string()],
            vec![Dynamic::Text("Alice".to_string())],
        );
        assert_eq!(node.statics.len(), node.dynamics.len() + 1);
        assert!(node.fingerprint.is_some());
    }

    #[test]
    fn fingerprint_is_stable_for_identical_content() {
        let a = Interleaved::new(
            vec!["Hello ".to_string(), "!".to_string()],
            vec![Dynamic::Text("Alice".to_string())],
        );
        let b = Interleaved::new(
            vec!["Hello ".to_string(), "!".to_string()],
            vec![Dynamic::Text("Alice".to_string())],
        );
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn fingerprint_changes_with_content() {
        let a = Interleaved::new(
            vec!["Hello ".to_string(), "!".to_string()],
            vec![Dynamic::Text("Alice".to_string())],
        );
        let b = Interleaved::new(
            vec!["Hello ".to_string(), "!".to_string()],
            vec![Dynamic::Text("Bob".to_string())],
        );
        assert_ne!(a.fingerprint, b.fingerprint);
    }
}
