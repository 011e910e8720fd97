//! The Diff Engine: compares two Tree Nodes and emits a minimal patch,
//! delegating to list-diff for matching comprehensions and applying the
//! strip-statics policy everywhere a client already holds the relevant
//! statics.

use crate::key::Key;
use crate::patch::{ListOp, Patch, PatchValue};
use crate::tree::{Comprehension, Dynamic, Interleaved, Item, Node};
use std::collections::{HashMap, HashSet};

/// More separate insertion points than this abandons the differential list
/// patch for a full comprehension replace.
pub const DEFAULT_MAX_CONTIGUOUS_INSERTION_POINTS: usize = 3;

/// Diffs two container-wrapped trees. `initial` is the very first tree ever
/// sent to this client (not the running baseline) — the reference point for
/// deciding whether a given path's statics are already known to it.
pub fn diff(old: &Node, new: &Node, initial: Option<&Node>, max_insertion_points: usize) -> Patch {
    match (old, new) {
        (Node::Interleaved(old_i), Node::Interleaved(new_i)) => {
            let initial_i = match initial {
                Some(Node::Interleaved(i)) => Some(i),
                _ => None,
            };
            diff_interleaved(old_i, new_i, initial_i, max_insertion_points)
        }
        // `walk_template` always produces a container-wrapped Interleaved
        // root; a bare comprehension at the top is not a shape this engine
        // is asked to diff, but we degrade to "nothing changed" rather than
        // panic on a malformed caller.
        _ => Patch::default(),
    }
}

fn diff_interleaved(
    old: &Interleaved,
    new: &Interleaved,
    initial: Option<&Interleaved>,
    max_insertion_points: usize,
) -> Patch {
    let mut changes = std::collections::BTreeMap::new();

    for (idx, new_dynamic) in new.dynamics.iter().enumerate() {
        let initial_dynamic = initial.and_then(|i| i.dynamics.get(idx));
        match old.dynamics.get(idx) {
            None => {
                // The hole is new. If the client's initial baseline already
                // had this key, it already holds the statics beneath it.
                changes.insert(idx, new_hole_value(new_dynamic, initial_dynamic));
            }
            Some(old_dynamic) if old_dynamic == new_dynamic => {
                // Equal: emit nothing for this hole.
            }
            Some(old_dynamic) => {
                let value = diff_dynamic(old_dynamic, new_dynamic, initial_dynamic, max_insertion_points);
                changes.insert(idx, value);
            }
        }
    }

    Patch { changes }
}

/// A hole present in `new` but absent from `old`. `initial_dynamic` is this
/// same hole's value in the very first tree ever sent to this client, if
/// any — when present, the client already holds whatever statics live
/// beneath it, so only the dynamic content needs to travel.
fn new_hole_value(new_dynamic: &Dynamic, initial_dynamic: Option<&Dynamic>) -> PatchValue {
    match (new_dynamic, initial_dynamic) {
        (Dynamic::Text(s), _) => PatchValue::Text(s.clone()),
        (Dynamic::Node(new_n), Some(Dynamic::Node(initial_n))) => known_value(new_n, initial_n),
        (Dynamic::Node(n), _) => PatchValue::Replace(n.clone()),
    }
}

/// Rebuilds `new_n` as a statics-free value by walking it alongside
/// `initial_n`, the client's first-ever view of this same path. An
/// interleaved match becomes a nested [`Patch`] carrying every dynamic
/// (never just the ones that differ, since the client has no prior value
/// here to diff against); a comprehension match becomes a full-item
/// [`ListOp::Append`] with `statics: None`. The moment the two shapes stop
/// matching — different statics, or different node kinds — this falls back
/// to [`PatchValue::Replace`], since that subtree genuinely is new to the
/// client and must carry its own statics.
fn known_value(new_n: &Node, initial_n: &Node) -> PatchValue {
    match (new_n, initial_n) {
        (Node::Interleaved(new_i), Node::Interleaved(initial_i)) if new_i.statics == initial_i.statics => {
            let mut changes = std::collections::BTreeMap::new();
            for (idx, dynamic) in new_i.dynamics.iter().enumerate() {
                let value = match (dynamic, initial_i.dynamics.get(idx)) {
                    (Dynamic::Text(s), _) => PatchValue::Text(s.clone()),
                    (Dynamic::Node(n), Some(Dynamic::Node(initial_n))) => known_value(n, initial_n),
                    (Dynamic::Node(n), _) => PatchValue::Replace(n.clone()),
                };
                changes.insert(idx, value);
            }
            PatchValue::Patch(Box::new(Patch { changes }))
        }
        (Node::Comprehension(new_c), Node::Comprehension(initial_c)) if new_c.statics == initial_c.statics => {
            PatchValue::ListOps(vec![ListOp::Append { items: new_c.items.clone(), statics: None }])
        }
        _ => PatchValue::Replace(new_n.clone()),
    }
}

fn diff_dynamic(
    old_dynamic: &Dynamic,
    new_dynamic: &Dynamic,
    initial_dynamic: Option<&Dynamic>,
    max_insertion_points: usize,
) -> PatchValue {
    match (old_dynamic, new_dynamic) {
        (Dynamic::Node(old_n), Dynamic::Node(new_n)) => {
            let initial_n = match initial_dynamic {
                Some(Dynamic::Node(n)) => Some(n),
                _ => None,
            };
            diff_node_dynamic(old_n, new_n, initial_n, max_insertion_points)
        }
        (_, Dynamic::Node(new_n)) => {
            // A leaf became a subtree: the client has never seen this shape.
            PatchValue::Replace(new_n.clone())
        }
        (_, Dynamic::Text(new_text)) => {
            // Either a plain text change, or a subtree collapsed to a leaf.
            PatchValue::Text(new_text.clone())
        }
    }
}

fn diff_node_dynamic(
    old_n: &Node,
    new_n: &Node,
    initial_n: Option<&Node>,
    max_insertion_points: usize,
) -> PatchValue {
    match (old_n, new_n) {
        (Node::Comprehension(old_c), Node::Comprehension(new_c)) if old_c.statics == new_c.statics => {
            list_diff(old_c, new_c, max_insertion_points)
        }
        // Identical `s` arrays is the whole of "structural similarity" for
        // interleaved nodes here: an `If`-wrapper's statics are always
        // `["", ""]` regardless of branch, so this check alone lets
        // recursion walk into the wrapper correctly; the branch content
        // itself is compared one level down, where a genuine shape change
        // falls through to the replace arm below.
        (Node::Interleaved(old_i), Node::Interleaved(new_i)) if old_i.statics == new_i.statics => {
            let initial_i = match initial_n {
                Some(Node::Interleaved(i)) if i.statics == new_i.statics => Some(i),
                _ => None,
            };
            PatchValue::Patch(Box::new(diff_interleaved(old_i, new_i, initial_i, max_insertion_points)))
        }
        _ => PatchValue::Replace(new_n.clone()),
    }
}

/// Compares two comprehensions of matching signature using their item keys.
fn list_diff(old_c: &Comprehension, new_c: &Comprehension, max_insertion_points: usize) -> PatchValue {
    if new_c.items.is_empty() {
        // Old non-empty (both-empty was already caught by the dynamics
        // equality check upstream): emit the empty comprehension in full so
        // the client can clear rendered items while keeping the container.
        return PatchValue::Replace(Node::Comprehension(new_c.clone()));
    }

    let old_map: HashMap<&Key, &Item> = old_c.items.iter().map(|(k, i)| (k, i)).collect();
    let new_map: HashMap<&Key, &Item> = new_c.items.iter().map(|(k, i)| (k, i)).collect();
    let old_key_set: HashSet<&Key> = old_map.keys().copied().collect();
    let new_key_set: HashSet<&Key> = new_map.keys().copied().collect();

    if old_key_set == new_key_set {
        let all_same_content = new_c
            .items
            .iter()
            .all(|(k, new_item)| items_equal_ignoring_positional(old_map[k], new_item));

        if all_same_content {
            let old_order: Vec<&Key> = old_c.items.iter().map(|(k, _)| k).collect();
            let new_order: Vec<&Key> = new_c.items.iter().map(|(k, _)| k).collect();
            if old_order == new_order {
                // Truly identical content and order; the caller's dynamics
                // equality check should already have skipped this hole.
                return PatchValue::ListOps(Vec::new());
            }
            return PatchValue::ListOps(vec![ListOp::Reorder {
                order: new_order.into_iter().cloned().collect(),
            }]);
        }
        // Same membership, some content changed, no reorder claim: fall
        // through to the general path below, which will only produce
        // `Update` operations since the key sets already match.
    }

    let mut ops = Vec::new();

    for (key, _) in &old_c.items {
        if !new_key_set.contains(key) {
            ops.push(ListOp::Remove { key: key.clone() });
        }
    }

    for (key, new_item) in &new_c.items {
        if let Some(old_item) = old_map.get(key) {
            if !items_equal_ignoring_positional(old_item, new_item) {
                let patch = diff_item(&new_c.statics, old_item, new_item, max_insertion_points);
                if !patch.is_empty() {
                    ops.push(ListOp::Update { key: key.clone(), patch });
                }
            }
        }
    }

    let added_positions: Vec<usize> = new_c
        .items
        .iter()
        .enumerate()
        .filter(|(_, (k, _))| !old_key_set.contains(k))
        .map(|(i, _)| i)
        .collect();

    if !added_positions.is_empty() {
        if old_c.items.is_empty() {
            ops.push(ListOp::Append { items: new_c.items.clone(), statics: Some(new_c.statics.clone()) });
        } else if is_single_contiguous_run(&added_positions) {
            for &pos in &added_positions {
                let (key, item) = &new_c.items[pos];
                let after = anchor_before(new_c, pos);
                ops.push(ListOp::Insert { after, key: key.clone(), item: item.clone() });
            }
        } else {
            let insertion_points = count_insertion_points(&added_positions);
            if insertion_points > max_insertion_points {
                return PatchValue::Replace(Node::Comprehension(new_c.clone()));
            }
            for &pos in &added_positions {
                let (key, item) = &new_c.items[pos];
                let after = anchor_before(new_c, pos);
                ops.push(ListOp::Insert { after, key: key.clone(), item: item.clone() });
            }
        }
    }

    PatchValue::ListOps(ops)
}

/// The key immediately preceding `pos` in `new_c`'s current order, or
/// `None` if `pos` is the first item ("start").
fn anchor_before(new_c: &Comprehension, pos: usize) -> Option<Key> {
    if pos == 0 {
        None
    } else {
        Some(new_c.items[pos - 1].0.clone())
    }
}

fn is_single_contiguous_run(positions: &[usize]) -> bool {
    positions.windows(2).all(|w| w[1] == w[0] + 1)
}

fn count_insertion_points(positions: &[usize]) -> usize {
    if positions.is_empty() {
        return 0;
    }
    1 + positions.windows(2).filter(|w| w[1] != w[0] + 1).count()
}

/// Diffs one comprehension item's dynamics as if they were an interleaved
/// node sharing the comprehension's statics. The dynamic count per item is
/// fixed by the `Comprehension::new` invariant, so "key absent from old"
/// never occurs here — every hole already existed in `old_item`.
fn diff_item(statics: &[String], old_item: &Item, new_item: &Item, max_insertion_points: usize) -> Patch {
    let old_i = item_as_interleaved(statics, old_item);
    let new_i = item_as_interleaved(statics, new_item);
    diff_interleaved(&old_i, &new_i, None, max_insertion_points)
}

fn item_as_interleaved(statics: &[String], item: &Item) -> Interleaved {
    Interleaved { statics: statics.to_vec(), dynamics: item.dynamics.clone(), fingerprint: None }
}

/// Content equality for list-diff purposes, ignoring fields that carry a
/// literal positional marker like `#0`/`#1`.
fn items_equal_ignoring_positional(a: &Item, b: &Item) -> bool {
    a.dynamics.len() == b.dynamics.len()
        && a.dynamics
            .iter()
            .zip(&b.dynamics)
            .all(|(x, y)| is_positional_marker(x) || is_positional_marker(y) || x == y)
}

fn is_positional_marker(d: &Dynamic) -> bool {
    match d {
        Dynamic::Text(s) => {
            let s = s.trim();
            s.strip_prefix('#').is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
        }
        Dynamic::Node(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyGenerator;
    use crate::walker::walk_template;
    use indexmap::IndexMap;
    use lvt_template::parser::parse;
    use lvt_template::{Evaluator, Value};

    fn data(pairs: &[(&str, Value)]) -> Value {
        let mut map = IndexMap::new();
        for (k, v) in pairs {
            map.insert(k.to_string(), v.clone());
        }
        Value::Map(map)
    }

    fn render(source: &str, data: &Value, previous: Option<&Node>) -> Node {
        let ast = parse(source).unwrap();
        let evaluator = Evaluator::default();
        let keygen = KeyGenerator::default();
        walk_template(&ast, data, &evaluator, &keygen, "root", previous).unwrap()
    }

    fn body_hole(patch: &Patch) -> &PatchValue {
        patch.changes.get(&0).expect("container's single hole should carry the change")
    }

    #[test]
    fn text_only_change_yields_single_hole_patch() {
        let initial = render("Hello {{.Name}}", &data(&[("Name", Value::string("Alice"))]), None);
        let next = render("Hello {{.Name}}", &data(&[("Name", Value::string("Bob"))]), Some(&initial));
        let patch = diff(&initial, &next, Some(&initial), DEFAULT_MAX_CONTIGUOUS_INSERTION_POINTS);
        match body_hole(&patch) {
            PatchValue::Patch(inner) => {
                assert_eq!(inner.changes.get(&0), Some(&PatchValue::Text("Bob".to_string())));
            }
            other => panic!("expected nested Patch, got {other:?}"),
        }
    }

    #[test]
    fn conditional_flip_replaces_with_statics() {
        let source = "{{if .OK}}yes{{else}}no{{end}}";
        let initial = render(source, &data(&[("OK", Value::Bool(true))]), None);
        let next = render(source, &data(&[("OK", Value::Bool(false))]), Some(&initial));
        let patch = diff(&initial, &next, Some(&initial), DEFAULT_MAX_CONTIGUOUS_INSERTION_POINTS);
        match body_hole(&patch) {
            PatchValue::Patch(inner) => match inner.changes.get(&0) {
                Some(PatchValue::Replace(Node::Interleaved(i))) => {
                    assert_eq!(i.statics, vec!["no".to_string()]);
                }
                other => panic!("expected a full replacement carrying statics, got {other:?}"),
            },
            other => panic!("expected nested Patch, got {other:?}"),
        }
    }

    #[test]
    fn list_append_from_empty_includes_statics() {
        let source = "<ul>{{range .Items}}<li>{{.}}</li>{{end}}</ul>";
        let initial = render(source, &data(&[("Items", Value::List(vec![]))]), None);
        let next = render(
            source,
            &data(&[("Items", Value::List(vec![Value::string("a")]))]),
            Some(&initial),
        );
        let patch = diff(&initial, &next, Some(&initial), DEFAULT_MAX_CONTIGUOUS_INSERTION_POINTS);
        match body_hole(&patch) {
            PatchValue::Patch(inner) => match inner.changes.get(&0) {
                Some(PatchValue::ListOps(ops)) => {
                    assert_eq!(ops.len(), 1);
                    match &ops[0] {
                        ListOp::Append { items, statics } => {
                            assert_eq!(items.len(), 1);
                            assert_eq!(statics.as_deref(), Some(&["<li>".to_string(), "</li>".to_string()][..]));
                        }
                        other => panic!("expected Append, got {other:?}"),
                    }
                }
                other => panic!("expected ListOps, got {other:?}"),
            },
            other => panic!("expected nested Patch, got {other:?}"),
        }
    }

    #[test]
    fn list_append_with_existing_items_has_no_statics() {
        let source = "<ul>{{range .Items}}<li>{{.}}</li>{{end}}</ul>";
        let initial = render(
            source,
            &data(&[("Items", Value::List(vec![Value::string("a")]))]),
            None,
        );
        let next = render(
            source,
            &data(&[("Items", Value::List(vec![Value::string("a"), Value::string("b")]))]),
            Some(&initial),
        );
        let patch = diff(&initial, &next, Some(&initial), DEFAULT_MAX_CONTIGUOUS_INSERTION_POINTS);
        match body_hole(&patch) {
            PatchValue::Patch(inner) => match inner.changes.get(&0) {
                Some(PatchValue::ListOps(ops)) => {
                    assert_eq!(ops.len(), 1);
                    assert!(matches!(&ops[0], ListOp::Insert { after: Some(_), .. }));
                }
                other => panic!("expected ListOps, got {other:?}"),
            },
            other => panic!("expected nested Patch, got {other:?}"),
        }
    }

    #[test]
    fn pure_reorder_yields_one_reorder_op() {
        let source = "<ul>{{range .Items}}<li>{{.}}</li>{{end}}</ul>";
        let initial = render(
            source,
            &data(&[("Items", Value::List(vec![Value::string("a"), Value::string("b")]))]),
            None,
        );
        let next = render(
            source,
            &data(&[("Items", Value::List(vec![Value::string("b"), Value::string("a")]))]),
            Some(&initial),
        );
        let patch = diff(&initial, &next, Some(&initial), DEFAULT_MAX_CONTIGUOUS_INSERTION_POINTS);
        match body_hole(&patch) {
            PatchValue::Patch(inner) => match inner.changes.get(&0) {
                Some(PatchValue::ListOps(ops)) => {
                    assert_eq!(ops.len(), 1);
                    assert!(matches!(&ops[0], ListOp::Reorder { .. }));
                }
                other => panic!("expected ListOps, got {other:?}"),
            },
            other => panic!("expected nested Patch, got {other:?}"),
        }
    }

    #[test]
    fn nested_path_statics_are_included_when_never_seen() {
        let source = "{{if .X}}<span>{{if .Y}}{{.Msg}}{{end}}</span>{{end}}";
        let initial = render(
            source,
            &data(&[("X", Value::Bool(true)), ("Y", Value::Bool(false)), ("Msg", Value::Null)]),
            None,
        );
        let next = render(
            source,
            &data(&[("X", Value::Bool(true)), ("Y", Value::Bool(true)), ("Msg", Value::string("hi"))]),
            Some(&initial),
        );
        let patch = diff(&initial, &next, Some(&initial), DEFAULT_MAX_CONTIGUOUS_INSERTION_POINTS);
        // container -> if(X) -> span body, two Patch levels deep before the
        // innermost hole. The inner `if .Y` contributes no Patch level of
        // its own: its wrapper statics are both empty, so `walk_list`
        // splices its single hole directly into the span body's dynamics
        // rather than keeping it as a separately-nested node. That hole
        // must carry the `<span>`-wrapped if's statics because the client
        // never received the `Y`-true branch.
        match body_hole(&patch) {
            PatchValue::Patch(outer_if) => match outer_if.changes.get(&0) {
                Some(PatchValue::Patch(span)) => match span.changes.get(&0) {
                    Some(PatchValue::Replace(Node::Interleaved(i))) => {
                        assert_eq!(i.statics, vec!["".to_string(), "".to_string()]);
                        assert_eq!(i.dynamics, vec![Dynamic::Text("hi".to_string())]);
                    }
                    other => panic!("expected full replace carrying statics, got {other:?}"),
                },
                other => panic!("expected nested Patch for the span, got {other:?}"),
            },
            other => panic!("expected nested Patch, got {other:?}"),
        }
    }

    #[test]
    fn both_empty_lists_produce_no_change() {
        let source = "<ul>{{range .Items}}<li>{{.}}</li>{{end}}</ul>";
        let initial = render(source, &data(&[("Items", Value::List(vec![]))]), None);
        let next = render(source, &data(&[("Items", Value::List(vec![]))]), Some(&initial));
        let patch = diff(&initial, &next, Some(&initial), DEFAULT_MAX_CONTIGUOUS_INSERTION_POINTS);
        assert!(patch.is_empty());
    }

    #[test]
    fn new_hole_with_known_initial_strips_statics_recursively() {
        let initial = Interleaved::new(
            vec!["<b>".to_string(), "</b>".to_string()],
            vec![Dynamic::Text("old".to_string())],
        );
        let new = Interleaved::new(
            vec!["<b>".to_string(), "</b>".to_string()],
            vec![Dynamic::Text("new".to_string())],
        );
        let value = new_hole_value(
            &Dynamic::Node(Node::Interleaved(new)),
            Some(&Dynamic::Node(Node::Interleaved(initial))),
        );
        match value {
            PatchValue::Patch(inner) => {
                assert_eq!(inner.changes.get(&0), Some(&PatchValue::Text("new".to_string())));
            }
            other => panic!("expected a statics-free nested Patch, got {other:?}"),
        }
    }

    #[test]
    fn new_hole_with_known_comprehension_initial_omits_statics() {
        let keygen = KeyGenerator::default();
        let statics = vec!["<li>".to_string(), "</li>".to_string()];
        let items = vec![(
            keygen.assign(&[crate::key::ItemSource { explicit_key: None, dynamics: &[Dynamic::Text("a".to_string())] }], &statics, &[])[0].clone(),
            Item { dynamics: vec![Dynamic::Text("a".to_string())] },
        )];
        let initial = Comprehension::new(statics.clone(), vec![]);
        let new = Comprehension::new(statics, items);
        let value = known_value(&Node::Comprehension(new.clone()), &Node::Comprehension(initial));
        match value {
            PatchValue::ListOps(ops) => {
                assert_eq!(ops.len(), 1);
                match &ops[0] {
                    ListOp::Append { items, statics } => {
                        assert_eq!(items.len(), 1);
                        assert!(statics.is_none(), "a known comprehension shape must not repeat its statics");
                    }
                    other => panic!("expected Append, got {other:?}"),
                }
            }
            other => panic!("expected ListOps, got {other:?}"),
        }
    }

    #[test]
    fn new_hole_without_known_initial_carries_statics() {
        let new = Interleaved::new(
            vec!["<b>".to_string(), "</b>".to_string()],
            vec![Dynamic::Text("new".to_string())],
        );
        let value = new_hole_value(&Dynamic::Node(Node::Interleaved(new)), None);
        assert!(matches!(value, PatchValue::Replace(Node::Interleaved(_))));
    }

    #[test]
    fn new_hole_with_shape_change_from_initial_carries_statics() {
        let initial = Interleaved::new(vec!["a".to_string()], vec![]);
        let new = Interleaved::new(
            vec!["<b>".to_string(), "</b>".to_string()],
            vec![Dynamic::Text("new".to_string())],
        );
        let value = new_hole_value(
            &Dynamic::Node(Node::Interleaved(new)),
            Some(&Dynamic::Node(Node::Interleaved(initial))),
        );
        assert!(matches!(value, PatchValue::Replace(Node::Interleaved(_))));
    }
}
