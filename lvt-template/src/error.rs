//! Error kinds for the reference template engine: parse, compose, and
//! evaluate failures.

use thiserror::Error;

/// Malformed template source. Fatal for the affected template, not for the
/// server as a whole.
#[derive(Debug, Clone, Error)]
pub enum TemplateParseError {
    #[error("unterminated directive starting at byte {offset}")]
    UnterminatedDirective { offset: usize },

    #[error("unexpected {{{{end}}}} at byte {offset} with no open block")]
    UnmatchedEnd { offset: usize },

    #[error("unterminated {kind} block opened at byte {offset}")]
    UnterminatedBlock { kind: &'static str, offset: usize },

    #[error("malformed expression `{source}`: {reason}")]
    BadExpression { source: String, reason: String },

    #[error("`{keyword}` requires an argument at byte {offset}")]
    MissingArgument { keyword: &'static str, offset: usize },
}

/// Composition (template-inclusion) failures: unknown name or a cycle.
#[derive(Debug, Clone, Error)]
pub enum CompositionError {
    #[error("template `{0}` is not registered")]
    UnknownTemplate(String),

    #[error("cyclic template inclusion: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

/// Evaluation-time failures: type mismatches, missing fields, or a caught
/// panic from the host evaluator.
#[derive(Debug, Clone, Error)]
pub enum EvaluationError {
    #[error("field `{field}` not found on {on}")]
    MissingField { field: String, on: &'static str },

    #[error("variable `${0}` is not bound in this scope")]
    UnboundVariable(String),

    #[error("expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: &'static str },

    #[error("unknown template function `{0}`")]
    UnknownFunction(String),

    #[error("function `{func}` failed: {reason}")]
    FunctionFailed { func: String, reason: String },

    #[error("evaluator panicked: {0}")]
    Panicked(String),
}
