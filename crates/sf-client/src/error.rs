//! Error types for sf-client.

/// Result type alias for sf-client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for sf-client operations.
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

    /// Returns true if this is an authentication error.
    pub fn is_auth_error(&self) -> bool {
        matches!(self.kind, ErrorKind::Authentication { .. })
    }

    /// Returns true if the transport gave up waiting for the server.
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout { .. })
    }

    /// The Salesforce `errorCode`, when the server sent one.
    pub fn error_code(&self) -> Option<&str> {
        match &self.kind {
            ErrorKind::SalesforceApi { error_code, .. } => Some(error_code),
            ErrorKind::Authentication { error_code, .. } => error_code.as_deref(),
            _ => None,
        }
    }
}

/// The kind of error that occurred.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// Non-success response whose body is not a Salesforce error envelope.
    #[error("HTTP error code {status}: {message}")]
    Http { status: u16, message: String },

    /// HTTP 401 from the server.
    #[error("Authentication error: {message}")]
    Authentication {
        error_code: Option<String>,
        message: String,
    },

    /// The request did not complete within the configured timeout.
    #[error("Request timeout: {url}")]
    Timeout { url: String },

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Salesforce API error response.
    #[error("Salesforce API error: {status} {error_code} - {message}")]
    SalesforceApi {
        status: u16,
        error_code: String,
        message: String,
        fields: Vec<String>,
    },

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let url = err.url().map(|u| u.to_string()).unwrap_or_default();
        let kind = if err.is_timeout() {
            ErrorKind::Timeout { url }
        } else if err.is_connect() || err.is_request() {
            ErrorKind::Connection(err.to_string())
        } else if err.is_builder() {
            ErrorKind::InvalidUrl(err.to_string())
        } else {
            ErrorKind::Other(err.to_string())
        };

        Error::with_source(kind, err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::with_source(ErrorKind::Json(err.to_string()), err)
    }
}
