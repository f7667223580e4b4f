//! Wire envelopes shared by the query and write paths.

use serde::{Deserialize, Serialize};

/// One chunk of a SOQL query result.
///
/// `next_records_url` is the single-use locator for the following chunk; it
/// is absent once `done` is true.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryResult<T> {
    /// Total number of records matching the query.
    #[serde(rename = "totalSize")]
    pub total_size: u64,

    /// Whether all records are returned (no more pages).
    pub done: bool,

    /// URL to fetch next batch of results.
    #[serde(rename = "nextRecordsUrl", default, skip_serializing_if = "Option::is_none")]
    pub next_records_url: Option<String>,

    /// The records.
    #[serde(default)]
    pub records: Vec<T>,
}

impl<T> QueryResult<T> {
    /// The locator to continue with, if the server has more rows.
    pub fn continuation(&self) -> Option<&str> {
        if self.done {
            None
        } else {
            self.next_records_url.as_deref()
        }
    }
}
