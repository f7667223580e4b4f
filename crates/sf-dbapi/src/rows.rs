//! Lazy row iteration across result chunks.

use std::collections::VecDeque;
use std::sync::Arc;

use busbar_sf_client::QueryResult;
use busbar_sf_soql::{Chunk, QueryDescriptor, Row, RowType, Value};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::connection::SalesforceConnection;
use crate::error::Result;

/// Column name of the row produced by a `SELECT COUNT()` query.
pub const COUNT_COLUMN: &str = "count";

/// Rows of one SELECT, decoded one chunk at a time.
///
/// The next chunk is requested only when the buffered rows run out, and
/// each locator is exchanged exactly once.
#[derive(Debug)]
pub struct RowStream {
    connection: Arc<SalesforceConnection>,
    descriptor: QueryDescriptor,
    row_type: RowType,
    buffer: VecDeque<Row>,
    locator: Option<String>,
}

impl RowStream {
    /// Start iterating from the first chunk of a query.
    pub(crate) fn new(
        connection: Arc<SalesforceConnection>,
        descriptor: QueryDescriptor,
        row_type: RowType,
        first: QueryResult<JsonValue>,
    ) -> Result<Self> {
        let mut stream = Self {
            connection,
            descriptor,
            row_type,
            buffer: VecDeque::new(),
            locator: None,
        };
        stream.load(first)?;
        Ok(stream)
    }

    pub fn descriptor(&self) -> &QueryDescriptor {
        &self.descriptor
    }

    /// True when more rows may follow, buffered or on the server.
    pub fn has_more(&self) -> bool {
        !self.buffer.is_empty() || self.locator.is_some()
    }

    /// The next row, fetching the next chunk when needed.
    pub async fn next_row(&mut self) -> Result<Option<Row>> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                return Ok(Some(row));
            }
            let Some(locator) = self.locator.take() else {
                return Ok(None);
            };
            debug!(%locator, "Fetching next chunk");
            let chunk = self.connection.query_more(&locator).await?;
            self.load(chunk)?;
        }
    }

    fn load(&mut self, chunk: QueryResult<JsonValue>) -> Result<()> {
        self.locator = chunk.continuation().map(str::to_string);
        match self
            .descriptor
            .decode_chunk(chunk.total_size, &chunk.records, self.row_type)?
        {
            Chunk::Count(count) => self.buffer.push_back(count_row(count, self.row_type)),
            Chunk::Rows(rows) => self.buffer.extend(rows),
        }
        Ok(())
    }
}


/// The single row of a `SELECT COUNT()` query.
pub(crate) fn count_row(count: u64, row_type: RowType) -> Row {
    let value = Value::Int(i64::try_from(count).unwrap_or(i64::MAX));
    match row_type {
        RowType::List => Row::Tuple(vec![value]),
        RowType::Dict => Row::Map(vec![(COUNT_COLUMN.to_string(), value)]),
    }
}
