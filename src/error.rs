//! Error types for chart decoding.
//!
//! Only failures that indicate misuse of the API surface here. Running out of
//! hypotheses (an empty cell) or hitting the deadline are ordinary outcomes and
//! are reported through [`crate::manager::DecodeOutcome`] instead.

use crate::parser::ParseError;
use crate::span::Span;
use thiserror::Error;

/// Result type for decoder operations.
pub type Result<T> = std::result::Result<T, DecodeError>;

/// Error type for decoder operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DecodeError {
    /// A rule's target skeleton does not line up with its slots.
    #[error("invalid rule: {0}")]
    InvalidRule(String),

    /// A hypothesis was offered to a beam that has already been finalized.
    #[error("beam {0} is finalized and no longer accepts hypotheses")]
    BeamFinalized(Span),

    /// A beam was read before it was finalized.
    #[error("beam {0} was read before being finalized")]
    BeamNotFinalized(Span),

    /// A span does not fit inside the sentence.
    #[error("span {span} is out of range for a sentence of length {len}")]
    SpanOutOfRange { span: Span, len: usize },

    /// An operation was called in the wrong controller state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Invalid search configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Grammar text could not be parsed.
    #[error("grammar parse error: {0}")]
    Parse(#[from] ParseError),

    /// IO error while writing diagnostics.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DecodeError {
    /// Create an invalid rule error.
    pub fn invalid_rule(msg: impl Into<String>) -> Self {
        DecodeError::InvalidRule(msg.into())
    }

    /// Create an invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        DecodeError::InvalidState(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        DecodeError::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = DecodeError::BeamNotFinalized(Span::new(0, 2));
        assert_eq!(err.to_string(), "beam [0..2] was read before being finalized");

        let err = DecodeError::SpanOutOfRange {
            span: Span::new(3, 4),
            len: 2,
        };
        assert!(err.to_string().contains("length 2"));
    }

    #[test]
    fn test_parse_error_converts() {
        let err: DecodeError = ParseError::UnexpectedEof.into();
        assert!(matches!(err, DecodeError::Parse(ParseError::UnexpectedEof)));
    }
}
