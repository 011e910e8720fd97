//! Reference template engine for `lvt-core`.
//!
//! The walker treats template parsing and expression evaluation as an
//! external collaborator rather than baking them in. This crate is that
//! collaborator made concrete: a tokenizer and parser for a small
//! `{{ }}`-delimited template language (`{{.Field}}`,
//! `{{if}}/{{else}}/{{end}}`, `{{with}}`, `{{range}}`,
//! `{{template "name"}}`), composition flattening with cycle detection, and
//! pipe-expression evaluation against an ordered, host-agnostic [`Value`].
//!
//! `lvt-core`'s walker only depends on the types re-exported here
//! (`Ast`, `Expr`, `Value`, `Context`, `Evaluator`); a host with its own
//! typed data model can supply an alternate engine by reproducing the same
//! shapes instead of adopting this parser.

pub mod ast;
pub mod compose;
pub mod error;
pub mod eval;
pub mod parser;
pub mod tokenizer;
pub mod value;

pub use ast::{Ast, Expr, PipeStage};
pub use compose::TemplateRegistry;
pub use error::{CompositionError, EvaluationError, TemplateParseError};
pub use eval::{Context, Evaluator};
pub use value::Value;
