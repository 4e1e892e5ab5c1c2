//! The server's error taxonomy.
//!
//! Client input problems are *not* represented here; they are recovered
//! locally as [`InvalidArgument`] values and resolved to a function's
//! declared invalid value. `ServerError` covers the unrecoverable kinds:
//! author/ops configuration bugs and fatal session errors.

use thiserror::Error;

/// Unrecoverable server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// An author or operations bug: bad schema, unknown game name,
    /// misconfigured player counts. Raised immediately at load or
    /// construction time rather than degrading.
    #[error("configuration error: {0}")]
    Config(String),

    /// An unhandled error that terminates the whole session.
    #[error("fatal session error: {0}")]
    Fatal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// A client-supplied value failed validation. Carries the offending field
/// path so the reason relayed to the client is actionable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("'{path}' is invalid: {message}")]
pub struct InvalidArgument {
    pub path: String,
    pub message: String,
}

impl InvalidArgument {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Prefixes the field path with a parent segment, for errors bubbling
    /// out of nested containers.
    pub fn nested(mut self, parent: &str) -> Self {
        self.path = if self.path.is_empty() {
            parent.to_string()
        } else {
            format!("{parent}.{}", self.path)
        };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_argument_message_includes_path() {
        let err = InvalidArgument::new("count", "expected an int");
        assert_eq!(err.to_string(), "'count' is invalid: expected an int");
    }

    #[test]
    fn nested_paths_compose() {
        let err = InvalidArgument::new("1", "expected an int").nested("counts");
        assert_eq!(err.path, "counts.1");

        let err = InvalidArgument::new("", "expected a list").nested("counts");
        assert_eq!(err.path, "counts");
    }
}
