//! The Wire Codec: serializes Tree Nodes and patches as deterministically
//! ordered JSON.
//!
//! Ordering is guaranteed by construction rather than by a sorting pass:
//! dynamic holes are keyed `0..N-1` and encoded in that ascending order,
//! and a [`crate::patch::Patch`]'s `BTreeMap<usize, _>` iterates the same
//! way — so "numeric-aware sorted, `s` first" falls out of using ordered
//! containers instead of a `HashMap`.
//!
//! `serde_json`'s `preserve_order` feature backs every `Map` here with an
//! `IndexMap`, so insertion order is also encoding order; we insert `"s"`
//! first and everything else after, in place of a custom `Serialize` impl.

use crate::patch::{ListOp, Patch, PatchValue};
use crate::tree::{Comprehension, Dynamic, Interleaved, Item, Node};
use serde_json::{Map, Number, Value as Json};

/// Encodes a full Tree Node (the initial render, or a client's persistent
/// cache reference) with statics and, if `expose_fingerprint` is set,
/// the `"f"` subtree fingerprint (off by default).
pub fn encode_node(node: &Node, expose_fingerprint: bool) -> Json {
    match node {
        Node::Interleaved(i) => encode_interleaved(i, expose_fingerprint),
        Node::Comprehension(c) => encode_comprehension(c, expose_fingerprint),
    }
}

fn encode_interleaved(i: &Interleaved, expose_fingerprint: bool) -> Json {
    let mut map = Map::new();
    map.insert("s".to_string(), Json::Array(i.statics.iter().cloned().map(Json::String).collect()));
    for (idx, dynamic) in i.dynamics.iter().enumerate() {
        map.insert(idx.to_string(), encode_dynamic(dynamic, expose_fingerprint));
    }
    if expose_fingerprint {
        if let Some(fp) = i.fingerprint {
            map.insert("f".to_string(), Json::Number(Number::from(fp)));
        }
    }
    Json::Object(map)
}

fn encode_comprehension(c: &Comprehension, expose_fingerprint: bool) -> Json {
    let mut map = Map::new();
    map.insert("s".to_string(), Json::Array(c.statics.iter().cloned().map(Json::String).collect()));
    let items = c.items.iter().map(|(_, item)| encode_item(item, expose_fingerprint)).collect();
    map.insert("d".to_string(), Json::Array(items));
    Json::Object(map)
}

/// An item's dynamic holes only — the client derives a comprehension
/// item's key independently (attribute scan or content hash), so keys are
/// never part of the initial `"d"` array; they appear only inside
/// list-operation arrays (see [`encode_list_op`]).
fn encode_item(item: &Item, expose_fingerprint: bool) -> Json {
    let mut map = Map::new();
    for (idx, dynamic) in item.dynamics.iter().enumerate() {
        map.insert(idx.to_string(), encode_dynamic(dynamic, expose_fingerprint));
    }
    Json::Object(map)
}

fn encode_dynamic(dynamic: &Dynamic, expose_fingerprint: bool) -> Json {
    match dynamic {
        Dynamic::Text(s) => Json::String(s.clone()),
        Dynamic::Node(n) => encode_node(n, expose_fingerprint),
    }
}

/// Encodes a patch: top-level `"s"`/`"f"` are never present (the client
/// already knows them from the initial render), and nested statics are
/// present only where the diff engine decided to include them.
pub fn encode_patch(patch: &Patch, expose_fingerprint: bool) -> Json {
    let mut map = Map::new();
    for (idx, value) in &patch.changes {
        map.insert(idx.to_string(), encode_patch_value(value, expose_fingerprint));
    }
    Json::Object(map)
}

fn encode_patch_value(value: &PatchValue, expose_fingerprint: bool) -> Json {
    match value {
        PatchValue::Text(s) => Json::String(s.clone()),
        PatchValue::Patch(p) => encode_patch(p, expose_fingerprint),
        PatchValue::Replace(n) => encode_node(n, expose_fingerprint),
        PatchValue::ListOps(ops) => Json::Array(ops.iter().map(|op| encode_list_op(op, expose_fingerprint)).collect()),
    }
}

fn encode_list_op(op: &ListOp, expose_fingerprint: bool) -> Json {
    match op {
        ListOp::Append { items, statics } => {
            let mut arr = vec![
                Json::String("a".to_string()),
                Json::Array(items.iter().map(|(_, item)| encode_item(item, expose_fingerprint)).collect()),
            ];
            if let Some(statics) = statics {
                arr.push(Json::Array(statics.iter().cloned().map(Json::String).collect()));
            }
            Json::Array(arr)
        }
        ListOp::Insert { after, item, .. } => {
            let (anchor, position) = match after {
                Some(key) => (Json::String(key.as_str().to_string()), "after"),
                None => (Json::Null, "start"),
            };
            Json::Array(vec![
                Json::String("i".to_string()),
                anchor,
                Json::String(position.to_string()),
                encode_item(item, expose_fingerprint),
            ])
        }
        ListOp::Remove { key } => {
            Json::Array(vec![Json::String("r".to_string()), Json::String(key.as_str().to_string())])
        }
        ListOp::Update { key, patch } => Json::Array(vec![
            Json::String("u".to_string()),
            Json::String(key.as_str().to_string()),
            encode_patch(patch, expose_fingerprint),
        ]),
        ListOp::Reorder { order } => {
            let keys = order.iter().map(|k| Json::String(k.as_str().to_string())).collect();
            Json::Array(vec![Json::String("o".to_string()), Json::Array(keys)])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{Key, KeyGenerator};
    use crate::walker::walk_template;
    use indexmap::IndexMap;
    use lvt_template::parser::parse;
    use lvt_template::{Evaluator, Value};
    use serde_json::json;

    fn data(pairs: &[(&str, Value)]) -> Value {
        let mut map = IndexMap::new();
        for (k, v) in pairs {
            map.insert(k.to_string(), v.clone());
        }
        Value::Map(map)
    }

    #[test]
    fn text_only_node_encodes_with_statics_first() {
        let ast = parse("Hello {{.Name}}").unwrap();
        let node = walk_template(
            &ast,
            &data(&[("Name", Value::string("Alice"))]),
            &Evaluator::default(),
            &KeyGenerator::default(),
            "root",
            None,
        )
        .unwrap();
        // Unwrap the container wrapper to check the inner body's shape.
        let Node::Interleaved(container) = &node else { panic!("expected container") };
        let Dynamic::Node(body) = &container.dynamics[0] else { panic!("expected body node") };
        let encoded = encode_node(body, false);
        assert_eq!(encoded, json!({"s": ["Hello ", ""], "0": "Alice"}));
    }

    #[test]
    fn fingerprint_only_present_when_exposed() {
        let ast = parse("Hello {{.Name}}").unwrap();
        let node = walk_template(
            &ast,
            &data(&[("Name", Value::string("Alice"))]),
            &Evaluator::default(),
            &KeyGenerator::default(),
            "root",
            None,
        )
        .unwrap();
        let Node::Interleaved(container) = &node else { panic!("expected container") };
        let Dynamic::Node(body) = &container.dynamics[0] else { panic!("expected body node") };
        let hidden = encode_node(body, false);
        let exposed = encode_node(body, true);
        assert!(hidden.get("f").is_none());
        assert!(exposed.get("f").is_some());
    }

    #[test]
    fn reorder_op_encodes_as_o_with_key_array() {
        let op = ListOp::Reorder { order: vec![Key::new("b"), Key::new("a")] };
        assert_eq!(encode_list_op(&op, false), json!(["o", ["b", "a"]]));
    }

    #[test]
    fn insert_after_encodes_anchor_and_omits_new_items_key() {
        let item = Item { dynamics: vec![Dynamic::Text("b".to_string())] };
        let op = ListOp::Insert { after: Some(Key::new("a")), key: Key::new("b"), item };
        assert_eq!(encode_list_op(&op, false), json!(["i", "a", "after", {"0": "b"}]));
    }
}
