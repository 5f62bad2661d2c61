use thiserror::Error;

/// Failure to parse or validate an expression.
///
/// `position` is a byte offset into the original expression. Validation
/// errors that concern the program as a whole report position 0.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse error at offset {position}: {message}")]
pub struct ParseError {
    pub position: usize,
    pub message: String,
}

impl ParseError {
    pub(crate) fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}
