//! HTTP response handling with Salesforce-specific extensions.

use serde::de::DeserializeOwned;
use std::sync::LazyLock;

use crate::error::{Error, ErrorKind, Result};

/// Status codes Salesforce uses for a successful call.
pub const OK_STATUS_CODES: [u16; 5] = [200, 201, 204, 300, 304];

/// What the request layer needs from an HTTP response.
///
/// The transport returns [`Response`]. Test doubles and synthetic responses
/// built from composite subresponses implement the same interface, so they
/// can all go through the same error handling.
pub trait HttpResponse {
    /// HTTP status code.
    fn status(&self) -> u16;

    /// Response body as text.
    fn text(&self) -> &str;

    /// Header value, looked up case-insensitively.
    fn header(&self, name: &str) -> Option<&str>;

    /// Deserialize the body as JSON.
    fn json<T: DeserializeOwned>(&self) -> Result<T>
    where
        Self: Sized,
    {
        serde_json::from_str(self.text()).map_err(Into::into)
    }

    /// True for the status codes in [`OK_STATUS_CODES`].
    fn is_ok(&self) -> bool {
        OK_STATUS_CODES.contains(&self.status())
    }

    /// Get the Content-Type header.
    fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

/// A fully buffered HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl Response {
    /// Create a response from its parts. Header names are normalized to lower case.
    pub fn new<I, K, V>(status: u16, headers: I, body: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            status,
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.into().to_ascii_lowercase(), v.into()))
                .collect(),
            body: body.into(),
        }
    }

    /// A JSON response with the given status.
    pub fn json_body(status: u16, body: &serde_json::Value) -> Self {
        Self::new(
            status,
            [("Content-Type", "application/json;charset=UTF-8")],
            body.to_string(),
        )
    }

    /// Returns true if the response status is successful (2xx).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl HttpResponse for Response {
    fn status(&self) -> u16 {
        self.status
    }

    fn text(&self) -> &str {
        &self.body
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// One element of the Salesforce error envelope.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct SalesforceErrorResponse {
    #[serde(alias = "errorCode")]
    pub error_code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub fields: Option<Vec<String>>,
}

/// Decode the Salesforce error envelope, returning its first element.
///
/// Salesforce normally sends an array of `{errorCode, message, fields}`;
/// a bare object is accepted too.
pub fn parse_error_envelope(body: &str) -> Option<SalesforceErrorResponse> {
    if let Ok(errors) = serde_json::from_str::<Vec<SalesforceErrorResponse>>(body) {
        return errors.into_iter().next();
    }
    serde_json::from_str::<SalesforceErrorResponse>(body).ok()
}

/// Convert a non-success response into an error.
///
/// A body that is not an error envelope yields `ErrorKind::Http` with the
/// raw (sanitized) body text.
pub fn error_from_response<R: HttpResponse>(response: &R) -> Error {
    let status = response.status();
    match parse_error_envelope(response.text()) {
        Some(err) if status == 401 => Error::new(ErrorKind::Authentication {
            error_code: Some(err.error_code),
            message: sanitize_error_message(&err.message),
        }),
        Some(err) => Error::new(ErrorKind::SalesforceApi {
            status,
            error_code: err.error_code,
            message: sanitize_error_message(&err.message),
            fields: err.fields.unwrap_or_default(),
        }),
        None if status == 401 => Error::new(ErrorKind::Authentication {
            error_code: None,
            message: sanitize_error_message(response.text()),
        }),
        None => Error::new(ErrorKind::Http {
            status,
            message: sanitize_error_message(response.text()),
        }),
    }
}

static TOKEN_PATTERN: LazyLock<regex_lite::Regex> = LazyLock::new(|| {
    regex_lite::Regex::new(r"00[A-Za-z0-9]{13,}[!][A-Za-z0-9_.]+").expect("valid token pattern")
});

static SESSION_PATTERN: LazyLock<regex_lite::Regex> = LazyLock::new(|| {
    regex_lite::Regex::new(r"sid=[A-Za-z0-9]{20,}").expect("valid session pattern")
});

/// Sanitize an error message to prevent exposing sensitive data.
///
/// This function:
/// - Truncates messages longer than 500 characters
/// - Removes potential tokens (anything that looks like an access token)
/// - Removes potential session IDs
pub fn sanitize_error_message(message: &str) -> String {
    const MAX_LENGTH: usize = 500;

    // Salesforce tokens start with the 15-character org id and a '!'
    let mut sanitized = TOKEN_PATTERN
        .replace_all(message, "[REDACTED_TOKEN]")
        .to_string();
    sanitized = SESSION_PATTERN
        .replace_all(&sanitized, "sid=[REDACTED]")
        .to_string();

    if sanitized.len() > MAX_LENGTH {
        let mut cut = MAX_LENGTH;
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str("...[truncated]");
    }

    sanitized
}
