//! Dynamic value representation and the data-lookup capability that templates
//! evaluate against.
//!
//! The design notes single out reflective field access on arbitrary host
//! structures as a capability — `{lookup(path)→value, iterate()→sequence}` —
//! rather than something the walker implements directly. [`Value`] is the
//! concrete type this reference template engine uses to back that
//! capability; a host with its own typed data model would implement the
//! same shape over compile-time accessors or generated code instead.

use indexmap::IndexMap;
use std::fmt;

/// A host data value. Mirrors the shapes `serde_json::Value` offers, but
/// keeps object field order (`IndexMap`, not a sorted map) since templates
/// may iterate a map's fields and iteration order must be stable.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn map(entries: IndexMap<String, Value>) -> Self {
        Value::Map(entries)
    }

    /// Host-language emptiness, used by `with` and `range` to pick the else
    /// branch.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Bool(b) => !b,
            Value::Number(n) => n.as_f64().map(|f| f == 0.0).unwrap_or(false),
            Value::String(s) => s.is_empty(),
            Value::List(items) => items.is_empty(),
            Value::Map(fields) => fields.is_empty(),
        }
    }

    /// Field access on a `Map`; any other shape has no named fields.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Map(fields) => fields.get(name),
            _ => None,
        }
    }

    /// Sequence this value denotes for a `range` loop. Lists iterate their
    /// items; maps iterate `(key, value)` pairs wrapped as `{key, value}`
    /// maps so a range body can address `.key`/`.value`; everything else is
    /// empty.
    pub fn iterate(&self) -> Vec<Value> {
        match self {
            Value::List(items) => items.clone(),
            Value::Map(fields) => fields
                .iter()
                .map(|(k, v)| {
                    let mut entry = IndexMap::new();
                    entry.insert("key".to_string(), Value::String(k.clone()));
                    entry.insert("value".to_string(), v.clone());
                    Value::Map(entry)
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Default stringification used for `{{ expr }}` holes.
    pub fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            Value::List(_) | Value::Map(_) => serde_json::to_string(&self.to_json())
                .unwrap_or_default(),
        }
    }

    /// Canonical JSON form, with map fields sorted by key for a
    /// deterministic byte representation. Used by `render` to stringify a
    /// `List`/`Map` hole; the tree-side key generator and fingerprint hash
    /// operate on already-rendered `Dynamic` holes instead, not on this
    /// type, and never call it.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Value::Number(n.clone()),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(fields) => {
                let mut sorted: Vec<_> = fields.iter().collect();
                sorted.sort_by(|a, b| a.0.cmp(b.0));
                let mut obj = serde_json::Map::new();
                for (k, v) in sorted {
                    obj.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(obj)
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(obj) => {
                let mut map = IndexMap::with_capacity(obj.len());
                for (k, v) in obj {
                    map.insert(k, Value::from(v));
                }
                Value::Map(map)
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
