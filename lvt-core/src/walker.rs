//! The AST Walker: lowers a parsed template AST and a data binding into a
//! [`Node`].
//!
//! Composition (flattening `{{template}}` invocations) happens before this
//! module ever runs — see [`lvt_template::compose`] — so [`walk`] only ever
//! sees `Ast::Include` if a caller skipped that step, which is treated as a
//! programmer error rather than a data-dependent failure.

use crate::error::WalkError;
use crate::key::{ItemSource, KeyGenerator};
use crate::tree::{Comprehension, Dynamic, Interleaved, Item, Node};
use lvt_template::{Ast, Context, Evaluator, Expr, Value};

/// Walks a fully-composed template against `data`, producing the container-
/// wrapped tree (preprocessing rule 3: the output is wrapped in an element
/// carrying a unique id so the client can locate updates). `previous` is the
/// prior render's container-wrapped tree, if any, threaded down so the key
/// generator can find each comprehension's previous key set.
pub fn walk_template(
    ast: &Ast,
    data: &Value,
    evaluator: &Evaluator,
    keygen: &KeyGenerator,
    container_id: &str,
    previous: Option<&Node>,
) -> Result<Node, WalkError> {
    let ctx = Context::root(data);
    let previous_body = previous.and_then(single_hole_child);
    let body = walk(ast, evaluator, keygen, &ctx, previous_body)?;
    Ok(wrap_container(container_id, body))
}

fn wrap_container(id: &str, body: Node) -> Node {
    Node::Interleaved(Interleaved::new(
        vec![format!("<div id=\"{id}\">"), "</div>".to_string()],
        vec![Dynamic::Node(body)],
    ))
}

/// Walks one AST node under `ctx`, given the structurally-corresponding
/// node (if any) from the previous render.
pub fn walk(
    ast: &Ast,
    evaluator: &Evaluator,
    keygen: &KeyGenerator,
    ctx: &Context<'_>,
    previous: Option<&Node>,
) -> Result<Node, WalkError> {
    match ast {
        Ast::Text(text) => Ok(Node::Interleaved(Interleaved::new(vec![text.clone()], vec![]))),

        Ast::Action(expr) => {
            let value = evaluator.eval(expr, ctx)?;
            Ok(Node::Interleaved(Interleaved::new(
                vec![String::new(), String::new()],
                vec![Dynamic::Text(value.render())],
            )))
        }

        Ast::If { cond, then_branch, else_branch } => {
            let cond_val = evaluator.eval(cond, ctx)?;
            let branch_previous = previous.and_then(single_hole_child);
            let hole = if !cond_val.is_empty() {
                Dynamic::Node(walk(then_branch, evaluator, keygen, ctx, branch_previous)?)
            } else if let Some(else_b) = else_branch {
                Dynamic::Node(walk(else_b, evaluator, keygen, ctx, branch_previous)?)
            } else {
                // The hole must stay addressable even with nothing to show.
                Dynamic::Text(String::new())
            };
            Ok(Node::Interleaved(Interleaved::new(
                vec![String::new(), String::new()],
                vec![hole],
            )))
        }

        Ast::With { scope, body, else_branch } => {
            let scope_val = evaluator.eval(scope, ctx)?;
            if scope_val.is_empty() {
                match else_branch {
                    Some(else_b) => walk(else_b, evaluator, keygen, ctx, previous),
                    None => Ok(Node::Interleaved(Interleaved::new(vec![String::new()], vec![]))),
                }
            } else {
                walk(body, evaluator, keygen, &ctx.with_dot(scope_val), previous)
            }
        }

        Ast::Range { collection, index_var, value_var, body, else_branch } => walk_range(
            collection,
            index_var.as_deref(),
            value_var.as_deref(),
            body,
            else_branch.as_deref(),
            evaluator,
            keygen,
            ctx,
            previous,
        ),

        Ast::Include(name) => Err(WalkError::UnflattenedInclude(name.clone())),

        Ast::List(children) => walk_list(children, evaluator, keygen, ctx, previous),
    }
}

#[allow(clippy::too_many_arguments)]
fn walk_range(
    collection: &Expr,
    index_var: Option<&str>,
    value_var: Option<&str>,
    body: &Ast,
    else_branch: Option<&Ast>,
    evaluator: &Evaluator,
    keygen: &KeyGenerator,
    ctx: &Context<'_>,
    previous: Option<&Node>,
) -> Result<Node, WalkError> {
    let collection_val = evaluator.eval(collection, ctx)?;
    let raw_items = collection_val.iterate();

    if raw_items.is_empty() {
        return match else_branch {
            Some(else_b) => walk(else_b, evaluator, keygen, ctx, previous),
            None => Ok(Node::Comprehension(Comprehension::new(vec![String::new()], Vec::new()))),
        };
    }

    let mut per_item_statics: Option<Vec<String>> = None;
    let mut rendered: Vec<(Option<String>, Vec<Dynamic>)> = Vec::with_capacity(raw_items.len());

    for (idx, item_val) in raw_items.iter().enumerate() {
        let mut item_ctx = ctx.with_dot(item_val.clone());
        if let Some(name) = index_var {
            item_ctx = item_ctx.with_var(name.to_string(), Value::Number(serde_json::Number::from(idx as u64)));
        }
        if let Some(name) = value_var {
            item_ctx = item_ctx.with_var(name.to_string(), item_val.clone());
        }
        // Per-item continuity (nested fingerprint reuse inside a list body
        // across renders) is not threaded here; only the comprehension's
        // own key set carries over, via `previous_keys` below.
        let body_node = walk(body, evaluator, keygen, &item_ctx, None)?;
        let item_interleaved = ensure_interleaved(body_node);

        if let Some(expected) = &per_item_statics {
            debug_assert_eq!(
                expected, &item_interleaved.statics,
                "a range body must render identical statics for every item"
            );
        } else {
            per_item_statics = Some(item_interleaved.statics.clone());
        }

        let explicit_key = item_val.field("_k").map(Value::render);
        rendered.push((explicit_key, item_interleaved.dynamics));
    }

    let statics = per_item_statics.unwrap_or_else(|| vec![String::new()]);

    let previous_keys = match previous {
        Some(Node::Comprehension(c)) if c.statics == statics => {
            c.items.iter().map(|(k, _)| k.clone()).collect()
        }
        _ => Vec::new(),
    };

    let sources: Vec<ItemSource<'_>> = rendered
        .iter()
        .map(|(k, d)| ItemSource { explicit_key: k.as_deref(), dynamics: d.as_slice() })
        .collect();
    let keys = keygen.assign(&sources, &statics, &previous_keys);

    let items = keys
        .into_iter()
        .zip(rendered.into_iter().map(|(_, dynamics)| Item { dynamics }))
        .collect();

    Ok(Node::Comprehension(Comprehension::new(statics, items)))
}

fn walk_list(
    children: &[Ast],
    evaluator: &Evaluator,
    keygen: &KeyGenerator,
    ctx: &Context<'_>,
    previous: Option<&Node>,
) -> Result<Node, WalkError> {
    let previous_dynamics: Option<&[Dynamic]> = previous.and_then(|n| match n {
        Node::Interleaved(i) => Some(i.dynamics.as_slice()),
        Node::Comprehension(_) => None,
    });

    let mut statics: Vec<String> = vec![String::new()];
    let mut dynamics: Vec<Dynamic> = Vec::new();
    let mut dyn_index = 0usize;

    for child in children {
        let child_previous = previous_dynamics
            .and_then(|ds| ds.get(dyn_index))
            .and_then(|d| match d {
                Dynamic::Node(n) => Some(n),
                Dynamic::Text(_) => None,
            });

        let child_node = walk(child, evaluator, keygen, ctx, child_previous)?;

        match child_node {
            Node::Interleaved(inner) => {
                let Interleaved { statics: cs, dynamics: cd, .. } = inner;
                statics.last_mut().expect("accumulator always has a trailing static").push_str(&cs[0]);
                let n_dyn = cd.len();
                for (offset, d) in cd.into_iter().enumerate() {
                    dynamics.push(d);
                    statics.push(cs[offset + 1].clone());
                }
                dyn_index += n_dyn;
            }
            comp @ Node::Comprehension(_) => {
                // A range child is never spliced into the surrounding
                // statics — it occupies exactly one dynamic hole, preserved
                // as a nested comprehension.
                dynamics.push(Dynamic::Node(comp));
                statics.push(String::new());
                dyn_index += 1;
            }
        }
    }

    if dynamics.is_empty() {
        Ok(Node::Interleaved(Interleaved::new(
            vec![statics.into_iter().next().unwrap_or_default()],
            vec![],
        )))
    } else {
        Ok(Node::Interleaved(Interleaved::new(statics, dynamics)))
    }
}

fn ensure_interleaved(node: Node) -> Interleaved {
    match node {
        Node::Interleaved(i) => i,
        Node::Comprehension(c) => Interleaved::new(
            vec![String::new(), String::new()],
            vec![Dynamic::Node(Node::Comprehension(c))],
        ),
    }
}

/// Matches the `{"s":["",""], "0": inner}` shape produced by `If` (and the
/// container wrapper), returning the single child.
fn single_hole_child(n: &Node) -> Option<&Node> {
    if let Node::Interleaved(i) = n {
        if i.statics.len() == 2 && i.dynamics.len() == 1 {
            if let Dynamic::Node(inner) = &i.dynamics[0] {
                return Some(inner);
            }
        }
    }
    None
}
