//! error type shared by the whole crate
//!
//! Two kinds of failures live side by side here:
//! - [Error::NoMatch] is a sentinel: a `${...}` placeholder had no viable
//!   alternative for the current variable context. Callers that iterate over
//!   many contexts (see [crate::render]) treat it as "skip this combination".
//! - everything else is fatal to the operation that raised it and propagates
//!   unchanged.
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No alternative of a variable expression resolved.
    #[error("no matching variable found")]
    NoMatch,

    /// A `${...}` expression is malformed.
    #[error("variable parse failed: {0}")]
    Parse(String),

    /// A node had the wrong shape for the operation at hand.
    #[error("expecting {expected} and received {actual} for '{selector}'")]
    UnexpectedType {
        expected: &'static str,
        actual: &'static str,
        selector: String,
    },

    /// Combining two trees would produce the same key twice.
    #[error("could not combine tree, key {0} present in both trees")]
    DuplicateKey(String),

    /// A reserved `condition` key could not be evaluated.
    #[error("condition {expression:?} evaluation failed: {reason}")]
    Condition { expression: String, reason: String },

    #[error("rule {name} failed")]
    Rule {
        name: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("step {name} failed")]
    Step {
        name: &'static str,
        #[source]
        source: Box<Error>,
    },

    /// A step resolved to a path that is not contained in its root directory.
    #[error("path {path:?} is outside of the root directory {root:?}")]
    PathOutsideRoot { path: PathBuf, root: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn unexpected(
        expected: &'static str,
        actual: &'static str,
        selector: impl Into<String>,
    ) -> Self {
        Error::UnexpectedType {
            expected,
            actual,
            selector: selector.into(),
        }
    }

    pub(crate) fn parse(message: impl Into<String>) -> Self {
        Error::Parse(message.into())
    }

    pub(crate) fn condition(expression: &str, reason: impl Into<String>) -> Self {
        Error::Condition {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }

    /// True when the error is the [Error::NoMatch] sentinel.
    pub fn is_no_match(&self) -> bool {
        matches!(self, Error::NoMatch)
    }
}
