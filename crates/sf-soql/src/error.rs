//! Error types for sf-soql.

/// Result type alias for sf-soql operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for sf-soql operations.
#[derive(Debug, thiserror::Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional source error.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Create a new error with the given kind.
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, source: None }
    }

    /// Create a new error with the given kind and source.
    pub fn with_source(
        kind: ErrorKind,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
        }
    }

    /// Shorthand for a [`ErrorKind::Parse`] error.
    pub(crate) fn parse(message: impl Into<String>, soql: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse {
            message: message.into(),
            soql: soql.into(),
        })
    }

    /// Shorthand for a [`ErrorKind::Decode`] error.
    pub(crate) fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Decode(message.into()))
    }
}

/// The kind of error that occurred.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// The query text could not be parsed. Carries the offending text.
    #[error("{message}: {soql:?}")]
    Parse { message: String, soql: String },

    /// The number of `%s` placeholders does not match the parameters.
    #[error("Query has {placeholders} placeholders but {params} parameters were given")]
    ParamCount { placeholders: usize, params: usize },

    /// A closing parenthesis without a matching opening one.
    #[error("Unbalanced parenthesis at position {position}")]
    UnbalancedParenthesis { position: usize },

    /// A bound value that has no SOQL or JSON form.
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    /// A response did not have the shape the query implies.
    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::with_source(ErrorKind::Decode(err.to_string()), err)
    }
}
