//! Error types and result aliases for tessera-core.
//!
//! Errors are structured for programmatic handling: parse failures carry
//! the offending input, lookup failures carry what was looked up.

/// The result type used throughout tessera-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A task key, period label, or selection string could not be parsed.
    #[error("parse error in '{input}': {message}")]
    Parse {
        /// The input that failed to parse.
        input: String,
        /// Description of what made it invalid.
        message: String,
    },

    /// A task key was not present in the catalog.
    #[error("task not found in catalog: {key}")]
    TaskNotFound {
        /// The canonical string of the missing key.
        key: String,
    },

    /// A positional index was outside the catalog bounds.
    #[error("index {index} out of range for catalog of {len} tasks")]
    IndexOutOfRange {
        /// The requested zero-based position.
        index: usize,
        /// The catalog size.
        len: usize,
    },

    /// A catalog file could not be read, written, or understood.
    #[error("catalog error: {message}")]
    Catalog {
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },
}

impl Error {
    /// Creates a new parse error.
    #[must_use]
    pub fn parse(input: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            input: input.into(),
            message: message.into(),
        }
    }

    /// Creates a new catalog error with the given message.
    #[must_use]
    pub fn catalog(message: impl Into<String>) -> Self {
        Self::Catalog {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new catalog error with a source cause.
    #[must_use]
    pub fn catalog_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Catalog {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn parse_error_display() {
        let err = Error::parse("x+03/bogus", "expected three fields");
        let msg = err.to_string();
        assert!(msg.contains("x+03/bogus"));
        assert!(msg.contains("expected three fields"));
    }

    #[test]
    fn index_error_display() {
        let err = Error::IndexOutOfRange { index: 7, len: 3 };
        assert!(err.to_string().contains("index 7"));
        assert!(err.to_string().contains("3 tasks"));
    }

    #[test]
    fn catalog_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = Error::catalog_with_source("failed to open catalog", source);
        assert!(err.to_string().contains("catalog error"));
        assert!(StdError::source(&err).is_some());
    }
}
