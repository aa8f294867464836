//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed position token '{token}': expected a base-10 nanosecond timestamp")]
    MalformedPosition { token: String },

    #[error("Provider call {operation} failed: {message}")]
    Provider { operation: String, message: String },

    #[error("{operation} failed: {source}")]
    Context {
        operation: String,
        #[source]
        source: Box<Error>,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn malformed_position(token: impl Into<String>) -> Self {
        Self::MalformedPosition {
            token: token.into(),
        }
    }

    pub fn provider(operation: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Provider {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Wrap this error with the provider operation and the resource it targeted.
    ///
    /// Provider failures keep their flat shape with the operations nested;
    /// any other error is kept as the source of the wrapper.
    pub fn context(self, operation: impl std::fmt::Display) -> Self {
        match self {
            Self::Provider {
                operation: inner,
                message,
            } => Self::Provider {
                operation: format!("{} ({})", operation, inner),
                message,
            },
            other => Self::Context {
                operation: operation.to_string(),
                source: Box::new(other),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_position_message() {
        let err = Error::malformed_position("abc");
        assert!(err.to_string().contains("'abc'"));
    }

    #[test]
    fn test_context_keeps_source_of_other_errors() {
        use std::error::Error as _;

        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "deadline elapsed");
        let err = Error::from(io).context("list streams of group g1");

        assert_eq!(
            err.to_string(),
            "list streams of group g1 failed: IO error: deadline elapsed"
        );
        let source = err.source().expect("wrapped error kept as source");
        assert!(matches!(source.downcast_ref::<Error>(), Some(Error::Io(_))));
        let root = source.source().expect("io error kept below the wrapper");
        assert_eq!(root.to_string(), "deadline elapsed");
    }

    #[test]
    fn test_context_nests_provider_operations() {
        let err = Error::provider("ListLogGroups", "403 Forbidden").context("sync");
        assert_eq!(
            err.to_string(),
            "Provider call sync (ListLogGroups) failed: 403 Forbidden"
        );
    }
}
