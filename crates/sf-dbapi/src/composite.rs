//! Composite API wire types.

use serde::{Deserialize, Serialize};

/// Maximum number of subrequests in one composite request.
pub const MAX_COMPOSITE_SUBREQUESTS: usize = 25;

/// A composite request containing multiple subrequests.
#[derive(Debug, Clone, Serialize)]
pub struct CompositeRequest {
    #[serde(rename = "allOrNone")]
    pub all_or_none: bool,
    #[serde(rename = "compositeRequest")]
    pub subrequests: Vec<CompositeSubrequest>,
}

/// A single subrequest within a composite request.
///
/// `url` is relative to the instance, e.g.
/// `/services/data/v62.0/sobjects/Contact/003000000000001AAA`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeSubrequest {
    pub method: String,
    pub url: String,
    #[serde(rename = "referenceId")]
    pub reference_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

/// Response from a composite request.
#[derive(Debug, Clone, Deserialize)]
pub struct CompositeResponse {
    #[serde(rename = "compositeResponse")]
    pub responses: Vec<CompositeSubresponse>,
}

/// Response from a single subrequest.
#[derive(Debug, Clone, Deserialize)]
pub struct CompositeSubresponse {
    #[serde(default)]
    pub body: serde_json::Value,
    #[serde(rename = "httpHeaders", default)]
    pub http_headers: serde_json::Value,
    #[serde(rename = "httpStatusCode")]
    pub http_status_code: u16,
    #[serde(rename = "referenceId")]
    pub reference_id: String,
}

impl CompositeSubresponse {
    pub fn is_success(&self) -> bool {
        self.http_status_code < 400
    }

    /// Error code of the first element of an error body.
    pub fn error_code(&self) -> Option<&str> {
        self.body
            .get(0)
            .and_then(|e| e.get("errorCode"))
            .and_then(serde_json::Value::as_str)
    }

    /// Header pairs for rebuilding the subresponse as a standalone response.
    pub fn headers(&self) -> Vec<(String, String)> {
        self.http_headers
            .as_object()
            .map(|headers| {
                headers
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }
}
