//! SObject Collections wire types for batch writes.

use serde::{Deserialize, Serialize};

/// Maximum number of records in one collections request.
pub const MAX_COLLECTION_RECORDS: usize = 200;

/// Error codes reported for records that only failed because another record
/// of the same `allOrNone` batch failed.
pub const ROLLBACK_PLACEHOLDER_CODES: [&str; 2] =
    ["PROCESSING_HALTED", "ALL_OR_NONE_OPERATION_ROLLED_BACK"];

/// Request body for `composite/sobjects` (POST and PATCH).
#[derive(Debug, Clone, Serialize)]
pub struct CollectionRequest {
    #[serde(rename = "allOrNone")]
    pub all_or_none: bool,
    pub records: Vec<serde_json::Value>,
}

/// Per-record result of a collection operation, in request order.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionResult {
    pub id: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<CollectionError>,
    pub created: Option<bool>,
}

/// One error attached to a failed record.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionError {
    #[serde(rename = "statusCode")]
    pub status_code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

impl CollectionResult {
    /// The first error, if the record failed.
    pub fn first_error(&self) -> Option<&CollectionError> {
        self.errors.first()
    }

    /// True when the record failed only because its batch was rolled back.
    pub fn is_rollback_placeholder(&self) -> bool {
        !self.success
            && self
                .first_error()
                .is_some_and(|e| ROLLBACK_PLACEHOLDER_CODES.contains(&e.status_code.as_str()))
    }
}
