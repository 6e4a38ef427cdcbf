//! Error types for the atrium runtime
//!
//! Every error on the call path is classified by [`ErrorKind`]: transient
//! errors are recorded and retried by the lifecycle, fatal errors propagate
//! to the caller immediately.

use crate::types::Name;
use std::fmt;
use thiserror::Error;

/// Boxed error accepted from application code and release functions
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Whether a failure is worth retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The operation may succeed if attempted again
    Transient,
    /// The operation must not be retried
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Transient => f.write_str("transient"),
            ErrorKind::Fatal => f.write_str("fatal"),
        }
    }
}

/// Errors raised while resolving, acquiring or invoking a capability
#[derive(Debug, Error)]
pub enum AtomError {
    /// No binding currently matches the pattern
    #[error("no binding matches pattern {pattern}")]
    UnresolvedPattern { pattern: Name },

    /// The handle was released before the call could start or finish acquiring
    #[error("handle for {pattern} was released before the call completed")]
    EarlyDisposal { pattern: Name },

    /// Error raised by a capability implementation
    #[error("{message}")]
    Application {
        kind: ErrorKind,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The retry controller gave up
    #[error("gave up on {pattern} after {attempts} attempts: {summary}", summary = summarize(.errors))]
    RetriesExhausted {
        pattern: Name,
        attempts: u32,
        errors: Vec<AtomError>,
    },

    /// Arguments or results of a typed handle failed to (de)serialize
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A name or context could not be constructed
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl AtomError {
    /// A transient application error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Application {
            kind: ErrorKind::Transient,
            message: message.into(),
            source: None,
        }
    }

    /// A fatal application error
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Application {
            kind: ErrorKind::Fatal,
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an arbitrary error with an explicit classification
    pub fn with_source(kind: ErrorKind, source: impl Into<BoxError>) -> Self {
        let source = source.into();
        Self::Application {
            kind,
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AtomError::UnresolvedPattern { .. } => ErrorKind::Transient,
            AtomError::Application { kind, .. } => *kind,
            AtomError::EarlyDisposal { .. }
            | AtomError::RetriesExhausted { .. }
            | AtomError::Codec(_)
            | AtomError::Domain(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

fn summarize(errors: &[AtomError]) -> String {
    match errors {
        [] => "no errors recorded".to_string(),
        [only] => only.to_string(),
        [.., last] => format!("{} (and {} earlier)", last, errors.len() - 1),
    }
}

/// Errors raised while constructing domains, contexts and names
#[derive(Debug, Error)]
pub enum DomainError {
    /// A context needs a parent or an explicit resolver
    #[error("context requires a parent context or an explicit resolver")]
    MissingResolver,

    /// Names must be records
    #[error("name must be a record, got {0}")]
    InvalidName(String),
}

/// Result type using AtomError
pub type AtomResult<T> = std::result::Result<T, AtomError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pattern() -> Name {
        Name::new(json!({"svc": "math"})).unwrap()
    }

    #[test]
    fn test_builtin_classification() {
        assert!(AtomError::UnresolvedPattern { pattern: pattern() }.is_transient());
        assert!(!AtomError::EarlyDisposal { pattern: pattern() }.is_transient());
        let exhausted = AtomError::RetriesExhausted {
            pattern: pattern(),
            attempts: 3,
            errors: vec![AtomError::transient("busy")],
        };
        assert_eq!(exhausted.kind(), ErrorKind::Fatal);
    }

    #[test]
    fn test_application_errors_opt_into_retry() {
        assert!(AtomError::transient("busy").is_transient());
        assert!(!AtomError::fatal("broken").is_transient());

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = AtomError::with_source(ErrorKind::Transient, io);
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "reset");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_exhausted_message_mentions_last_error() {
        let err = AtomError::RetriesExhausted {
            pattern: pattern(),
            attempts: 2,
            errors: vec![AtomError::transient("first"), AtomError::transient("second")],
        };
        assert_eq!(
            err.to_string(),
            r#"gave up on {"svc":"math"} after 2 attempts: second (and 1 earlier)"#
        );
    }
}
