//! The parsed template AST — the walker's input, produced here by
//! [`crate::parser`] rather than imported from an external host engine.

use crate::value::Value;

/// An operand or pipeline of a `{{ }}` directive.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `.` or `.Field.Nested` relative to the current context.
    Dot(Vec<String>),
    /// `$` or `$.Field.Nested` relative to the root data, used for
    /// `$.`-style rooted lookups from inside a `range` body.
    Root(Vec<String>),
    /// `$name` or `$name.Field` referring to a range-bound variable.
    Var(String, Vec<String>),
    /// A literal argument to a pipe function.
    Literal(Value),
    /// `operand | func arg...` — the parsed pipeline. The vec is the
    /// sequence of pipe stages applied left to right.
    Pipeline(Box<Expr>, Vec<PipeStage>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipeStage {
    pub func: String,
    pub args: Vec<Expr>,
}

/// The canonical, already-flattened (composition-resolved) template tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Ast {
    Text(String),
    Action(Expr),
    If {
        cond: Expr,
        then_branch: Box<Ast>,
        else_branch: Option<Box<Ast>>,
    },
    With {
        scope: Expr,
        body: Box<Ast>,
        else_branch: Option<Box<Ast>>,
    },
    Range {
        collection: Expr,
        index_var: Option<String>,
        value_var: Option<String>,
        body: Box<Ast>,
        else_branch: Option<Box<Ast>>,
    },
    /// A named-template invocation. Present only in the pre-composition
    /// tree; [`crate::compose::flatten`] replaces every occurrence before
    /// the walker ever sees it.
    Include(String),
    /// Sibling nodes in sequence, e.g. the body of an element or the whole
    /// template. An empty list renders as nothing.
    List(Vec<Ast>),
}

impl Ast {
    pub fn list(nodes: Vec<Ast>) -> Ast {
        if nodes.len() == 1 {
            nodes.into_iter().next().unwrap()
        } else {
            Ast::List(nodes)
        }
    }
}
