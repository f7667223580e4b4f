//! Error types for sf-dbapi.
//!
//! Kinds follow the usual database driver classes: connection problems,
//! authentication, malformed queries, errors reported by Salesforce, misuse
//! of the cursor interface and internal inconsistencies.

use busbar_sf_client::sanitize_error_message;

/// Result type alias for sf-dbapi operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for sf-dbapi operations.
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

    /// The Salesforce error code, if the server reported one.
    pub fn error_code(&self) -> Option<&str> {
        match &self.kind {
            ErrorKind::Salesforce { error_code, .. } => Some(error_code),
            _ => None,
        }
    }

    pub(crate) fn interface(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Interface(message.into()))
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal(message.into()))
    }

    pub(crate) fn data(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Data(message.into()))
    }
}

/// The kind of error that occurred.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// Transport failure. Never retried.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The request did not complete in time. Never retried.
    #[error("Timeout, URL={url}")]
    Timeout { url: String },

    /// Login failed, or the session was rejected after the one refresh.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Malformed query text or statement.
    #[error("Query error: {0}")]
    Query(String),

    /// Error envelope returned by Salesforce.
    #[error("{error_code}: {message}")]
    Salesforce {
        status: u16,
        error_code: String,
        message: String,
        fields: Vec<String>,
    },

    /// Error status whose body is not a Salesforce error envelope.
    #[error("HTTP error code {status}: {message}")]
    Http { status: u16, message: String },

    /// Misuse of the cursor interface.
    #[error("Interface error: {0}")]
    Interface(String),

    /// A response combination that should not occur.
    #[error("Internal error: {0}")]
    Internal(String),

    /// The statement is not supported by Salesforce.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// A response did not have the expected shape.
    #[error("Data error: {0}")]
    Data(String),
}

impl From<busbar_sf_client::Error> for Error {
    fn from(err: busbar_sf_client::Error) -> Self {
        use busbar_sf_client::ErrorKind as ClientKind;

        let kind = match &err.kind {
            ClientKind::Timeout { url } => ErrorKind::Timeout { url: url.clone() },
            ClientKind::Connection(msg) | ClientKind::Other(msg) => {
                ErrorKind::Connection(msg.clone())
            }
            ClientKind::Authentication { message, .. } => {
                ErrorKind::Authentication(message.clone())
            }
            ClientKind::SalesforceApi {
                status,
                error_code,
                message,
                fields,
            } => ErrorKind::Salesforce {
                status: *status,
                error_code: error_code.clone(),
                message: message.clone(),
                fields: fields.clone(),
            },
            ClientKind::Http { status, message } => ErrorKind::Http {
                status: *status,
                message: message.clone(),
            },
            ClientKind::Json(msg) => ErrorKind::Data(msg.clone()),
            ClientKind::InvalidUrl(msg) | ClientKind::Config(msg) => {
                ErrorKind::Interface(msg.clone())
            }
        };
        Error::with_source(kind, err)
    }
}

impl From<busbar_sf_auth::Error> for Error {
    fn from(err: busbar_sf_auth::Error) -> Self {
        let kind = match &err.kind {
            busbar_sf_auth::ErrorKind::Http(msg) => ErrorKind::Connection(msg.clone()),
            busbar_sf_auth::ErrorKind::UnknownAlias(alias) => {
                ErrorKind::Interface(format!("No connection registered for alias '{alias}'"))
            }
            other => ErrorKind::Authentication(sanitize_error_message(&other.to_string())),
        };
        Error::with_source(kind, err)
    }
}

impl From<busbar_sf_soql::Error> for Error {
    fn from(err: busbar_sf_soql::Error) -> Self {
        let kind = match &err.kind {
            busbar_sf_soql::ErrorKind::Decode(msg) | busbar_sf_soql::ErrorKind::InvalidParam(msg) => {
                ErrorKind::Data(msg.clone())
            }
            other => ErrorKind::Query(other.to_string()),
        };
        Error::with_source(kind, err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::with_source(ErrorKind::Data(err.to_string()), err)
    }
}
