//! Cursor: runs one statement at a time and hands out its rows.
//!
//! ```text
//! Unexecuted --execute(select)--> Rows --exhausted--> Complete
//!     |                                                  ^
//!     +----------execute(insert/update/delete)-----------+
//! any state --close()--> Closed
//! ```
//!
//! `execute` resets everything, so a cursor can run statements one after
//! another. Fetching before the first `execute` is an interface error.

use std::collections::VecDeque;
use std::sync::Arc;

use busbar_sf_client::security::url::sobject_path;
use busbar_sf_client::RequestMethod;
use busbar_sf_soql::{format_soql, Param, QueryDescriptor, Row, RowType, Value};
use futures::Stream;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info, instrument, warn};

use crate::config::BatchMode;
use crate::connection::{check_sobject, QueryService, RecordOutcome, SalesforceConnection};
use crate::error::{Error, ErrorKind, Result};
use crate::rows::{count_row, RowStream, COUNT_COLUMN};
use crate::statement::{
    classify_raw, record_body, DeleteStatement, IdSource, InsertStatement, Plan, RawKind,
    SelectQuery, StatementKind, UpdateStatement, WhereNode,
};

/// ID of the records created by the last INSERT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LastRowId {
    Single(String),
    /// One ID per created record, in creation order.
    Many(Vec<String>),
}

/// Column metadata in the usual seven-field layout. Salesforce does not
/// report types through the query endpoint, so only `name` is filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescription {
    pub name: String,
    pub type_code: Option<String>,
    pub display_size: Option<usize>,
    pub internal_size: Option<usize>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub null_ok: Option<bool>,
}

impl ColumnDescription {
    fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_code: None,
            display_size: None,
            internal_size: None,
            precision: None,
            scale: None,
            null_ok: None,
        }
    }
}

/// A record-level problem that did not fail the statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorMessage {
    /// Record ID or composite reference ID, when known.
    pub reference: Option<String>,
    pub error_code: String,
    pub message: String,
}

#[derive(Debug)]
enum State {
    Unexecuted,
    Rows(RowStream),
    /// Rows known without a request.
    Buffered(VecDeque<Row>),
    Complete,
    Closed,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

/// Per-statement execution context over a shared connection.
#[derive(Debug)]
pub struct Cursor {
    connection: Arc<SalesforceConnection>,
    state: State,
    rowcount: i64,
    lastrowid: Option<LastRowId>,
    description: Option<Vec<ColumnDescription>>,
    messages: Vec<CursorMessage>,
    rownumber: Option<usize>,
    arraysize: usize,
    row_type: RowType,
}

impl Cursor {
    pub fn new(connection: Arc<SalesforceConnection>) -> Self {
        let row_type = connection.config().row_type;
        Self {
            connection,
            state: State::Unexecuted,
            rowcount: -1,
            lastrowid: None,
            description: None,
            messages: Vec::new(),
            rownumber: None,
            arraysize: 1,
            row_type,
        }
    }

    pub fn connection(&self) -> &Arc<SalesforceConnection> {
        &self.connection
    }

    /// Rows matched by a SELECT or written by the last write; `-1` until known.
    pub fn rowcount(&self) -> i64 {
        self.rowcount
    }

    pub fn lastrowid(&self) -> Option<&LastRowId> {
        self.lastrowid.as_ref()
    }

    /// Columns of the current SELECT.
    pub fn description(&self) -> Option<&[ColumnDescription]> {
        self.description.as_deref()
    }

    /// Record-level failures and ignored deletes of the last write.
    pub fn messages(&self) -> &[CursorMessage] {
        &self.messages
    }

    /// Index of the next row to be fetched.
    pub fn rownumber(&self) -> Option<usize> {
        self.rownumber
    }

    pub fn arraysize(&self) -> usize {
        self.arraysize
    }

    /// Default number of rows returned by [`fetch_many`](Self::fetch_many).
    pub fn set_arraysize(&mut self, size: usize) {
        self.arraysize = size.max(1);
    }

    pub fn row_type(&self) -> RowType {
        self.row_type
    }

    pub fn set_row_type(&mut self, row_type: RowType) {
        self.row_type = row_type;
    }

    /// Run a statement, discarding the state of the previous one.
    #[instrument(skip(self, statement), fields(alias = %self.connection.alias()))]
    pub async fn execute(&mut self, statement: impl Into<StatementKind>) -> Result<()> {
        if matches!(self.state, State::Closed) {
            return Err(Error::interface("Cursor is closed"));
        }
        self.reset();

        match statement.into() {
            StatementKind::Select(query) => self.execute_select(&query).await,
            StatementKind::Raw { soql, params } => self.execute_raw(&soql, &params).await,
            StatementKind::Insert(insert) => self.execute_insert(insert).await,
            StatementKind::Update(update) => self.execute_update(update).await,
            StatementKind::Delete(delete) => self.execute_delete(delete).await,
        }
    }

    /// Run SOQL text with `%s` placeholders.
    pub async fn execute_soql(&mut self, soql: &str, params: Vec<Param>) -> Result<()> {
        self.execute(StatementKind::raw(soql, params)).await
    }

    fn reset(&mut self) {
        self.state = State::Unexecuted;
        self.rowcount = -1;
        self.lastrowid = None;
        self.description = None;
        self.messages.clear();
        self.rownumber = None;
    }

    async fn execute_select(&mut self, query: &SelectQuery) -> Result<()> {
        match query.compile()? {
            Plan::EmptyResult => {
                debug!(table = %query.table, "Filter matches nothing, not querying");
                self.description = Some(if query.count_only {
                    vec![ColumnDescription::named(COUNT_COLUMN)]
                } else if query.fields.is_empty() {
                    vec![ColumnDescription::named("Id")]
                } else {
                    query.fields.iter().map(ColumnDescription::named).collect()
                });
                self.rowcount = 0;
                self.rownumber = Some(0);
                self.state = if query.count_only {
                    State::Buffered(VecDeque::from([count_row(0, self.row_type)]))
                } else {
                    State::Complete
                };
                Ok(())
            }
            Plan::Soql(soql) => self.run_select(&soql, query.service()).await,
        }
    }

    async fn execute_raw(&mut self, soql: &str, params: &[Param]) -> Result<()> {
        match classify_raw(soql) {
            RawKind::Select => {
                let soql = format_soql(soql, params)?;
                self.run_select(&soql, QueryService::Query).await
            }
            RawKind::Ignored => {
                info!(statement = soql, "Ignoring statement, Salesforce has no transactions");
                self.state = State::Complete;
                Ok(())
            }
            RawKind::Unsupported => Err(Error::new(ErrorKind::NotSupported(format!(
                "Only SELECT can be run as raw SOQL: {soql:?}"
            )))),
        }
    }

    async fn run_select(&mut self, soql: &str, service: QueryService) -> Result<()> {
        let descriptor = QueryDescriptor::parse(soql)?;
        let first = self.connection.query(soql, service).await?;
        self.rowcount = i64::try_from(first.total_size).unwrap_or(i64::MAX);
        self.description = Some(describe(&descriptor));
        let rows = RowStream::new(self.connection.clone(), descriptor, self.row_type, first)?;
        self.rownumber = Some(0);
        self.state = State::Rows(rows);
        Ok(())
    }

    async fn execute_insert(&mut self, insert: InsertStatement) -> Result<()> {
        check_sobject(&insert.table)?;
        let mut bodies = insert
            .rows
            .iter()
            .map(record_body)
            .collect::<Result<Vec<_>>>()?;
        let all_or_none = insert
            .all_or_none
            .unwrap_or(self.connection.config().all_or_none);
        let path = format!("sobjects/{}", insert.table);

        match bodies.len() {
            0 => self.rowcount = 0,
            1 => {
                let body = JsonValue::Object(bodies.remove(0));
                let created: Created = self
                    .connection
                    .request_json(RequestMethod::Post, &path, Some(&body))
                    .await?;
                self.lastrowid = Some(LastRowId::Single(created.id));
                self.rowcount = 1;
            }
            _ => {
                let outcomes = match self.connection.config().batch_mode {
                    BatchMode::Collections => {
                        self.connection
                            .insert_collection(&insert.table, &bodies, all_or_none)
                            .await?
                    }
                    BatchMode::Composite => {
                        let subrequests: Vec<_> = bodies
                            .into_iter()
                            .enumerate()
                            .map(|(i, body)| {
                                self.connection.subrequest(
                                    RequestMethod::Post,
                                    &path,
                                    format!("ref{i}"),
                                    Some(JsonValue::Object(body)),
                                )
                            })
                            .collect();
                        self.connection.composite(&subrequests, all_or_none).await?
                    }
                };
                let ids = self.apply_outcomes(outcomes);
                self.lastrowid = Some(LastRowId::Many(ids));
            }
        }
        self.state = State::Complete;
        Ok(())
    }

    async fn execute_update(&mut self, update: UpdateStatement) -> Result<()> {
        check_sobject(&update.table)?;
        let values = record_body(&update.values)?;
        let all_or_none = update
            .all_or_none
            .unwrap_or(self.connection.config().all_or_none);
        let ids = self.resolve_ids(&update.table, &update.filter).await?;

        match ids.as_slice() {
            [] => {
                debug!(table = %update.table, "No records to update");
                self.rowcount = 0;
            }
            [id] => {
                let path = record_path(&update.table, id)?;
                self.connection
                    .request(RequestMethod::Patch, &path, Some(&JsonValue::Object(values)))
                    .await?;
                self.rowcount = 1;
            }
            _ => {
                let outcomes = match self.connection.config().batch_mode {
                    BatchMode::Collections => {
                        let records: Vec<(String, Map<String, JsonValue>)> = ids
                            .iter()
                            .map(|id| (id.clone(), values.clone()))
                            .collect();
                        self.connection
                            .update_collection(&update.table, &records, all_or_none)
                            .await?
                    }
                    BatchMode::Composite => {
                        let mut subrequests = Vec::with_capacity(ids.len());
                        for id in &ids {
                            subrequests.push(self.connection.subrequest(
                                RequestMethod::Patch,
                                &record_path(&update.table, id)?,
                                id.clone(),
                                Some(JsonValue::Object(values.clone())),
                            ));
                        }
                        self.connection.composite(&subrequests, all_or_none).await?
                    }
                };
                self.apply_outcomes(outcomes);
            }
        }
        self.state = State::Complete;
        Ok(())
    }

    async fn execute_delete(&mut self, delete: DeleteStatement) -> Result<()> {
        check_sobject(&delete.table)?;
        let ids = self.resolve_ids(&delete.table, &delete.filter).await?;

        match ids.as_slice() {
            [] => {
                debug!(table = %delete.table, "No records to delete");
                self.rowcount = 0;
            }
            [id] => {
                let path = record_path(&delete.table, id)?;
                let outcome = self.connection.delete_record(&path, id).await?;
                self.apply_outcomes(vec![outcome]);
            }
            _ => {
                // Deletes never use allOrNone so that records deleted
                // concurrently do not block the rest.
                let outcomes = match self.connection.config().batch_mode {
                    BatchMode::Collections => self.connection.delete_collection(&ids).await?,
                    BatchMode::Composite => {
                        let mut subrequests = Vec::with_capacity(ids.len());
                        for id in &ids {
                            subrequests.push(self.connection.subrequest(
                                RequestMethod::Delete,
                                &record_path(&delete.table, id)?,
                                id.clone(),
                                None,
                            ));
                        }
                        self.connection.composite(&subrequests, false).await?
                    }
                };
                self.apply_outcomes(outcomes);
            }
        }
        self.state = State::Complete;
        Ok(())
    }

    /// IDs of the records a filter selects.
    ///
    /// A lone `Id = x` or `Id IN (...)` condition is read directly; an
    /// `Id IN (SELECT ...)` runs that SELECT. Anything else runs
    /// `SELECT Id FROM table WHERE filter`, since Salesforce does not allow
    /// a semi-join against the object being written.
    async fn resolve_ids(&self, table: &str, filter: &WhereNode) -> Result<Vec<String>> {
        match filter.id_source(table) {
            Some(IdSource::Literal(ids)) => Ok(ids),
            Some(IdSource::Select(query)) => self.collect_ids(query).await,
            None => {
                let query = SelectQuery::new(table).fields(["Id"]).filter(filter.clone());
                self.collect_ids(&query).await
            }
        }
    }

    async fn collect_ids(&self, query: &SelectQuery) -> Result<Vec<String>> {
        let soql = match query.compile()? {
            Plan::EmptyResult => return Ok(Vec::new()),
            Plan::Soql(soql) => soql,
        };
        let descriptor = QueryDescriptor::parse(&soql)?;
        let first = self.connection.query(&soql, query.service()).await?;
        let mut rows = RowStream::new(self.connection.clone(), descriptor, RowType::List, first)?;

        let mut ids = Vec::new();
        while let Some(row) = rows.next_row().await? {
            match row.get(0).and_then(Value::as_str) {
                Some(id) => ids.push(id.to_string()),
                None => return Err(Error::data("ID query returned a row without an ID")),
            }
        }
        Ok(ids)
    }

    /// Count written records and keep the rest as messages. Returns the
    /// IDs of the written records, in order.
    fn apply_outcomes(&mut self, outcomes: Vec<RecordOutcome>) -> Vec<String> {
        let mut written = Vec::new();
        let mut count = 0;
        for outcome in outcomes {
            match outcome {
                RecordOutcome::Written { id } => {
                    count += 1;
                    written.extend(id);
                }
                RecordOutcome::AlreadyAbsent { id, error_code } => {
                    self.messages.push(CursorMessage {
                        reference: Some(id),
                        error_code,
                        message: "Record was already deleted".to_string(),
                    });
                }
                RecordOutcome::Failed {
                    reference,
                    error_code,
                    message,
                    ..
                } => {
                    self.messages.push(CursorMessage {
                        reference,
                        error_code,
                        message,
                    });
                }
            }
        }
        if !self.messages.is_empty() {
            warn!(
                written = count,
                not_written = self.messages.len(),
                "Some records were not written"
            );
        }
        self.rowcount = count;
        written
    }

    /// The next row, or `None` when the result is exhausted.
    pub async fn fetch_one(&mut self) -> Result<Option<Row>> {
        match &mut self.state {
            State::Unexecuted => Err(Error::interface("No statement has been executed")),
            State::Closed => Err(Error::interface("Cursor is closed")),
            State::Complete => Ok(None),
            State::Rows(rows) => match rows.next_row().await? {
                Some(row) => {
                    self.rownumber = Some(self.rownumber.unwrap_or(0) + 1);
                    Ok(Some(row))
                }
                None => {
                    self.state = State::Complete;
                    Ok(None)
                }
            },
            State::Buffered(rows) => match rows.pop_front() {
                Some(row) => {
                    self.rownumber = Some(self.rownumber.unwrap_or(0) + 1);
                    Ok(Some(row))
                }
                None => {
                    self.state = State::Complete;
                    Ok(None)
                }
            },
        }
    }

    /// Up to `size` rows; [`arraysize`](Self::arraysize) when `size` is `None`.
    pub async fn fetch_many(&mut self, size: Option<usize>) -> Result<Vec<Row>> {
        let size = size.unwrap_or(self.arraysize);
        let mut rows = Vec::with_capacity(size);
        while rows.len() < size {
            match self.fetch_one().await? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        Ok(rows)
    }

    /// All remaining rows.
    pub async fn fetch_all(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.fetch_one().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Remaining rows as a stream.
    pub fn rows(&mut self) -> impl Stream<Item = Result<Row>> + '_ {
        futures::stream::try_unfold(self, |cursor| async move {
            Ok::<_, Error>(cursor.fetch_one().await?.map(|row| (row, cursor)))
        })
    }

    /// Release the row buffer. Later calls other than `close` fail.
    pub fn close(&mut self) {
        self.state = State::Closed;
    }

    /// Salesforce has no transactions; every write is already committed.
    pub fn commit(&self) -> Result<()> {
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        warn!(alias = %self.connection.alias(), "Rollback is not supported by Salesforce");
        Ok(())
    }
}

fn describe(descriptor: &QueryDescriptor) -> Vec<ColumnDescription> {
    if descriptor.is_plain_count() {
        return vec![ColumnDescription::named(COUNT_COLUMN)];
    }
    descriptor
        .aliases()
        .iter()
        .map(ColumnDescription::named)
        .collect()
}

fn record_path(table: &str, id: &str) -> Result<String> {
    sobject_path(table, id).ok_or_else(|| {
        Error::new(ErrorKind::Query(format!(
            "Invalid record reference {table}/{id}"
        )))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::test_support::{connection, mount_json};
    use futures::TryStreamExt;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn contact(id: &str, last_name: &str) -> JsonValue {
        json!({"attributes": {"type": "Contact"}, "Id": id, "LastName": last_name})
    }

    #[tokio::test]
    async fn test_fetch_before_execute() {
        let server = MockServer::start().await;
        let (conn, _) = connection(&server, Default::default());
        let mut cursor = Cursor::new(conn);
        let err = cursor.fetch_one().await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Interface(_)));
        assert_eq!(cursor.rowcount(), -1);
    }

    #[tokio::test]
    async fn test_select_across_chunks() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/data/v62.0/query"))
            .and(query_param("q", "SELECT Id, LastName FROM Contact ORDER BY LastName ASC"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "totalSize": 3, "done": false,
                "nextRecordsUrl": "/services/data/v62.0/query/01gxx-2",
                "records": [contact("003000000000001AAA", "Abe"), contact("003000000000002AAA", "Bo")]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/services/data/v62.0/query/01gxx-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "totalSize": 3, "done": true,
                "records": [contact("003000000000003AAA", "Cy")]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (conn, _) = connection(&server, Default::default());
        let mut cursor = Cursor::new(conn);
        cursor
            .execute(
                SelectQuery::new("Contact")
                    .fields(["Id", "LastName"])
                    .order_by("LastName", false),
            )
            .await
            .unwrap();
        assert_eq!(cursor.rowcount(), 3);
        let names: Vec<&str> = cursor
            .description()
            .unwrap()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, ["Id", "LastName"]);

        let first = cursor.fetch_one().await.unwrap().unwrap();
        assert_eq!(first.get(1), Some(&Value::Text("Abe".into())));
        cursor.set_arraysize(5);
        let rest = cursor.fetch_many(None).await.unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[1].get(1), Some(&Value::Text("Cy".into())));
        assert_eq!(cursor.rownumber(), Some(3));
        assert!(cursor.fetch_one().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_raw_select_with_params_as_stream() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/data/v62.0/query"))
            .and(query_param("q", "SELECT Id, LastName FROM Contact WHERE LastName = 'Doe'"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "totalSize": 1, "done": true,
                "records": [contact("003000000000001AAA", "Doe")]
            })))
            .mount(&server)
            .await;

        let (conn, _) = connection(&server, DatabaseConfig::builder("t").row_type(RowType::Dict).build());
        let mut cursor = Cursor::new(conn);
        cursor
            .execute_soql(
                "SELECT Id, LastName FROM Contact WHERE LastName = %s",
                vec!["Doe".into()],
            )
            .await
            .unwrap();
        let rows: Vec<Row> = cursor.rows().try_collect().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].field("lastname"), Some(&Value::Text("Doe".into())));
    }

    #[tokio::test]
    async fn test_empty_result_sends_nothing() {
        let server = MockServer::start().await;
        let (conn, auth) = connection(&server, Default::default());
        let mut cursor = Cursor::new(conn);
        cursor
            .execute(
                SelectQuery::new("Contact").filter(WhereNode::in_list("Id", Vec::<String>::new())),
            )
            .await
            .unwrap();
        assert_eq!(cursor.rowcount(), 0);
        assert!(cursor.fetch_all().await.unwrap().is_empty());
        assert_eq!(auth.calls(), 0);
    }

    #[tokio::test]
    async fn test_count_of_empty_filter_is_one_zero_row() {
        let server = MockServer::start().await;
        let (conn, auth) = connection(&server, Default::default());
        let mut cursor = Cursor::new(conn);
        let query = SelectQuery::new("Contact")
            .count()
            .filter(WhereNode::in_list("Id", Vec::<String>::new()));
        cursor.execute(query.clone()).await.unwrap();
        assert_eq!(cursor.description().unwrap()[0].name, "count");
        assert_eq!(cursor.fetch_one().await.unwrap(), Some(Row::Tuple(vec![Value::Int(0)])));
        assert_eq!(cursor.rownumber(), Some(1));
        assert!(cursor.fetch_one().await.unwrap().is_none());

        cursor.set_row_type(RowType::Dict);
        cursor.execute(query).await.unwrap();
        let rows = cursor.fetch_all().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].field("count"), Some(&Value::Int(0)));
        assert_eq!(auth.calls(), 0);
    }

    #[tokio::test]
    async fn test_savepoints_are_ignored_and_ddl_is_not_supported() {
        let server = MockServer::start().await;
        let (conn, _) = connection(&server, Default::default());
        let mut cursor = Cursor::new(conn);
        cursor.execute_soql("SAVEPOINT s1", vec![]).await.unwrap();
        assert!(cursor.fetch_one().await.unwrap().is_none());
        let err = cursor.execute_soql("DROP TABLE Contact", vec![]).await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::NotSupported(_)));
    }

    #[tokio::test]
    async fn test_single_insert_sets_lastrowid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/data/v62.0/sobjects/Contact"))
            .and(body_json(json!({"LastName": "Doe", "Email": null})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "003000000000001AAA", "success": true, "errors": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (conn, _) = connection(&server, Default::default());
        let mut cursor = Cursor::new(conn);
        cursor
            .execute(InsertStatement::new("Contact").row([
                ("LastName", Param::from("Doe")),
                ("Email", Param::Null),
            ]))
            .await
            .unwrap();
        assert_eq!(cursor.rowcount(), 1);
        assert_eq!(
            cursor.lastrowid(),
            Some(&LastRowId::Single("003000000000001AAA".into()))
        );
    }

    #[tokio::test]
    async fn test_batch_insert_keeps_order_and_failures() {
        let server = MockServer::start().await;
        mount_json(
            &server,
            "POST",
            "/services/data/v62.0/composite/sobjects",
            200,
            json!([
                {"id": "003000000000001AAA", "success": true, "errors": []},
                {"id": null, "success": false, "errors": [{"statusCode": "DUPLICATES_DETECTED", "message": "Use one of these records?"}]},
                {"id": "003000000000003AAA", "success": true, "errors": []}
            ]),
        )
        .await;

        let (conn, _) = connection(&server, Default::default());
        let mut cursor = Cursor::new(conn);
        cursor
            .execute(
                InsertStatement::new("Contact")
                    .row([("LastName", "A")])
                    .row([("LastName", "B")])
                    .row([("LastName", "C")]),
            )
            .await
            .unwrap();
        assert_eq!(cursor.rowcount(), 2);
        assert_eq!(
            cursor.lastrowid(),
            Some(&LastRowId::Many(vec![
                "003000000000001AAA".into(),
                "003000000000003AAA".into()
            ]))
        );
        assert_eq!(cursor.messages().len(), 1);
        assert_eq!(cursor.messages()[0].error_code, "DUPLICATES_DETECTED");
    }

    #[tokio::test]
    async fn test_update_by_id_skips_lookup() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/services/data/v62.0/sobjects/Contact/003000000000001AAA"))
            .and(body_json(json!({"LastName": "Doe"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let (conn, _) = connection(&server, Default::default());
        let mut cursor = Cursor::new(conn);
        cursor
            .execute(UpdateStatement::new(
                "Contact",
                [("LastName", "Doe")],
                WhereNode::eq("Id", "003000000000001AAA"),
            ))
            .await
            .unwrap();
        assert_eq!(cursor.rowcount(), 1);
    }

    #[tokio::test]
    async fn test_update_by_filter_runs_id_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/data/v62.0/query"))
            .and(query_param("q", "SELECT Id FROM Contact WHERE LastName = 'Doe'"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "totalSize": 2, "done": true,
                "records": [
                    {"attributes": {"type": "Contact"}, "Id": "003000000000001AAA"},
                    {"attributes": {"type": "Contact"}, "Id": "003000000000002AAA"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/services/data/v62.0/composite"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "compositeResponse": [
                    {"body": null, "httpHeaders": {}, "httpStatusCode": 204, "referenceId": "003000000000001AAA"},
                    {"body": null, "httpHeaders": {}, "httpStatusCode": 204, "referenceId": "003000000000002AAA"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = DatabaseConfig::builder("t").batch_mode(BatchMode::Composite).build();
        let (conn, _) = connection(&server, config);
        let mut cursor = Cursor::new(conn);
        cursor
            .execute(UpdateStatement::new(
                "Contact",
                [("Title", "CEO")],
                WhereNode::eq("LastName", "Doe"),
            ))
            .await
            .unwrap();
        assert_eq!(cursor.rowcount(), 2);
    }

    #[tokio::test]
    async fn test_write_with_no_matches_sends_no_write() {
        let server = MockServer::start().await;
        mount_json(
            &server,
            "GET",
            "/services/data/v62.0/query",
            200,
            json!({"totalSize": 0, "done": true, "records": []}),
        )
        .await;

        let (conn, _) = connection(&server, Default::default());
        let mut cursor = Cursor::new(conn);
        cursor
            .execute(DeleteStatement::new(
                "Contact",
                WhereNode::eq("LastName", "Nobody"),
            ))
            .await
            .unwrap();
        assert_eq!(cursor.rowcount(), 0);
        let requests = server.received_requests().await.unwrap();
        assert!(requests.iter().all(|r| r.method.as_str() == "GET"));
    }

    #[tokio::test]
    async fn test_delete_of_missing_record() {
        let server = MockServer::start().await;
        mount_json(
            &server,
            "DELETE",
            "/services/data/v62.0/sobjects/Contact/003000000000001AAA",
            404,
            json!([{"errorCode": "INVALID_CROSS_REFERENCE_KEY", "message": "invalid cross reference id"}]),
        )
        .await;

        let (conn, _) = connection(&server, Default::default());
        let mut cursor = Cursor::new(conn);
        cursor
            .execute(DeleteStatement::new(
                "Contact",
                WhereNode::eq("Id", "003000000000001AAA"),
            ))
            .await
            .unwrap();
        assert_eq!(cursor.rowcount(), 0);
        assert_eq!(cursor.messages().len(), 1);
        let message = &cursor.messages()[0];
        assert_eq!(message.reference.as_deref(), Some("003000000000001AAA"));
        assert_eq!(message.error_code, "INVALID_CROSS_REFERENCE_KEY");
    }

    #[tokio::test]
    async fn test_closed_cursor_rejects_use() {
        let server = MockServer::start().await;
        let (conn, _) = connection(&server, Default::default());
        let mut cursor = Cursor::new(conn);
        cursor.close();
        assert!(cursor.fetch_all().await.is_err());
        let err = cursor.execute_soql("SELECT Id FROM Contact", vec![]).await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Interface(_)));
        assert!(cursor.commit().is_ok());
        assert!(cursor.rollback().is_ok());
    }
}
