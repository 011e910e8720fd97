//! Error kinds for the walker, session, and transport layers.

use lvt_template::{CompositionError, EvaluationError, TemplateParseError};
use thiserror::Error;

/// Errors the AST walker can raise while lowering a template + data binding
/// into a [`crate::tree::Node`].
#[derive(Debug, Clone, Error)]
pub enum WalkError {
    #[error(transparent)]
    Parse(#[from] TemplateParseError),

    #[error(transparent)]
    Composition(#[from] CompositionError),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    /// A caller fed the walker an `Ast::Include` that composition flattening
    /// should have already replaced; this is a caller bug, not a
    /// data-dependent failure.
    #[error("template `{0}` was not flattened before walking")]
    UnflattenedInclude(String),
}

/// Errors a [`crate::session::PageSession`] can surface. Every variant here
/// closes the session (see [`SessionError::closes_session`]); a store's own
/// validation errors never reach this type at all — they travel back as
/// [`crate::session::ResponseMetadata`] instead.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("template evaluation failed: {0}")]
    Evaluation(#[from] WalkError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("inbound rate limit exceeded")]
    RateLimited,

    #[error("outbound write deadline exceeded")]
    WriteTimeout,

    #[error("session is closed")]
    Closed,
}

impl SessionError {
    /// Whether a caller that observes this error should close the session.
    /// Written as an exhaustive match rather than a blanket `true` so a
    /// future non-fatal variant (e.g. a validation-style error that started
    /// flowing through this type) forces a conscious decision here.
    pub fn closes_session(&self) -> bool {
        match self {
            SessionError::Evaluation(_)
            | SessionError::Transport(_)
            | SessionError::RateLimited
            | SessionError::WriteTimeout
            | SessionError::Closed => true,
        }
    }
}
