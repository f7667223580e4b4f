//! Statement descriptors handed to a [`Cursor`](crate::Cursor).
//!
//! A SELECT is described by a [`SelectQuery`] whose filter is a
//! [`WhereNode`] tree. Compiling it yields a [`Plan`]: either SOQL text or
//! [`Plan::EmptyResult`] when the filter can never match (for example an
//! `IN` with an empty list), in which case no request is sent.

use busbar_sf_client::security::soql;
use busbar_sf_soql::Param;
use serde_json::{Map, Value as JsonValue};

use crate::connection::QueryService;
use crate::error::{Error, ErrorKind, Result};

/// Field values of one record, in column order.
pub type Record = Vec<(String, Param)>;

/// A statement to execute, dispatched by [`Cursor::execute`](crate::Cursor::execute).
#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    Select(SelectQuery),
    Insert(InsertStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
    /// SOQL text with `%s` placeholders, bypassing the statement builders.
    Raw { soql: String, params: Vec<Param> },
}

impl StatementKind {
    /// A raw statement.
    pub fn raw(soql: impl Into<String>, params: Vec<Param>) -> Self {
        StatementKind::Raw {
            soql: soql.into(),
            params,
        }
    }
}

impl From<SelectQuery> for StatementKind {
    fn from(query: SelectQuery) -> Self {
        StatementKind::Select(query)
    }
}

impl From<InsertStatement> for StatementKind {
    fn from(statement: InsertStatement) -> Self {
        StatementKind::Insert(statement)
    }
}

impl From<UpdateStatement> for StatementKind {
    fn from(statement: UpdateStatement) -> Self {
        StatementKind::Update(statement)
    }
}

impl From<DeleteStatement> for StatementKind {
    fn from(statement: DeleteStatement) -> Self {
        StatementKind::Delete(statement)
    }
}

/// What a raw statement is, judged by its leading keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RawKind {
    Select,
    /// Savepoint handling; Salesforce has no transactions to apply it to.
    Ignored,
    Unsupported,
}

pub(crate) fn classify_raw(soql: &str) -> RawKind {
    let keyword = soql
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    match keyword.as_str() {
        "SELECT" => RawKind::Select,
        "SAVEPOINT" | "RELEASE" | "ROLLBACK" => RawKind::Ignored,
        _ => RawKind::Unsupported,
    }
}

/// A filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereNode {
    Condition { field: String, lookup: Lookup },
    /// All children match. An empty list matches everything.
    And(Vec<WhereNode>),
    /// Any child matches. An empty list matches nothing.
    Or(Vec<WhereNode>),
    Not(Box<WhereNode>),
}

/// Comparison applied to one field, with its operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Exact(Param),
    In(Vec<Param>),
    /// `IN (SELECT ...)` against another object.
    InSelect(Box<SelectQuery>),
    IsNull(bool),
    Range(Param, Param),
    Gt(Param),
    Gte(Param),
    Lt(Param),
    Lte(Param),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
}

impl WhereNode {
    pub fn condition(field: impl Into<String>, lookup: Lookup) -> Self {
        WhereNode::Condition {
            field: field.into(),
            lookup,
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Param>) -> Self {
        Self::condition(field, Lookup::Exact(value.into()))
    }

    pub fn in_list<I, P>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Param>,
    {
        Self::condition(field, Lookup::In(values.into_iter().map(Into::into).collect()))
    }

    pub fn in_select(field: impl Into<String>, query: SelectQuery) -> Self {
        Self::condition(field, Lookup::InSelect(Box::new(query)))
    }

    pub fn is_null(field: impl Into<String>, is_null: bool) -> Self {
        Self::condition(field, Lookup::IsNull(is_null))
    }

    pub fn not(node: WhereNode) -> Self {
        WhereNode::Not(Box::new(node))
    }

    /// Compile to a SOQL condition.
    pub fn compile(&self) -> Result<Compiled> {
        match self {
            WhereNode::Condition { field, lookup } => compile_lookup(field, lookup),
            WhereNode::And(children) => {
                let mut parts = Vec::with_capacity(children.len());
                for child in children {
                    match child.compile()? {
                        Compiled::Nothing => return Ok(Compiled::Nothing),
                        Compiled::Everything => {}
                        Compiled::Soql(soql) => parts.push(soql),
                    }
                }
                Ok(join(parts, " AND ", Compiled::Everything))
            }
            WhereNode::Or(children) => {
                let mut parts = Vec::with_capacity(children.len());
                for child in children {
                    match child.compile()? {
                        Compiled::Everything => return Ok(Compiled::Everything),
                        Compiled::Nothing => {}
                        Compiled::Soql(soql) => parts.push(soql),
                    }
                }
                Ok(join(parts, " OR ", Compiled::Nothing))
            }
            WhereNode::Not(inner) => Ok(match inner.compile()? {
                Compiled::Nothing => Compiled::Everything,
                Compiled::Everything => Compiled::Nothing,
                Compiled::Soql(soql) => Compiled::Soql(format!("(NOT {soql})")),
            }),
        }
    }

    /// Where to take record IDs from without a helper query: a lone,
    /// non-negated `Id = x` or `Id IN ...` condition.
    pub(crate) fn id_source(&self, table: &str) -> Option<IdSource<'_>> {
        let (field, lookup) = match self {
            WhereNode::Condition { field, lookup } => (field, lookup),
            WhereNode::And(children) if children.len() == 1 => {
                return children[0].id_source(table);
            }
            _ => return None,
        };
        if !is_primary_key(field, table) {
            return None;
        }
        match lookup {
            Lookup::Exact(Param::Text(id)) => Some(IdSource::Literal(vec![id.clone()])),
            Lookup::In(values) => values
                .iter()
                .map(|v| match v {
                    Param::Text(id) => Some(id.clone()),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
                .map(IdSource::Literal),
            Lookup::InSelect(query) => Some(IdSource::Select(query)),
            _ => None,
        }
    }
}

/// Compiled filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compiled {
    Soql(String),
    /// Matches every record; no WHERE clause is needed.
    Everything,
    /// Provably matches no record.
    Nothing,
}

pub(crate) enum IdSource<'a> {
    Literal(Vec<String>),
    Select(&'a SelectQuery),
}

fn join(parts: Vec<String>, connector: &str, empty: Compiled) -> Compiled {
    match parts.len() {
        0 => empty,
        1 => Compiled::Soql(parts.into_iter().next().unwrap_or_default()),
        _ => Compiled::Soql(format!("({})", parts.join(connector))),
    }
}

fn is_primary_key(field: &str, table: &str) -> bool {
    let field = match field.split_once('.') {
        Some((prefix, rest)) if prefix.eq_ignore_ascii_case(table) => rest,
        _ => field,
    };
    field.eq_ignore_ascii_case("Id")
}

fn compile_lookup(field: &str, lookup: &Lookup) -> Result<Compiled> {
    check_field(field)?;
    let soql = match lookup {
        Lookup::Exact(value) => format!("{field} = {}", literal(value)?),
        Lookup::In(values) if values.is_empty() => return Ok(Compiled::Nothing),
        Lookup::In(values) => {
            let values = values.iter().map(literal).collect::<Result<Vec<_>>>()?;
            format!("{field} IN ({})", values.join(", "))
        }
        Lookup::InSelect(query) => match query.compile()? {
            Plan::EmptyResult => return Ok(Compiled::Nothing),
            Plan::Soql(sub) => format!("{field} IN ({sub})"),
        },
        Lookup::IsNull(true) => format!("{field} = NULL"),
        Lookup::IsNull(false) => format!("{field} != NULL"),
        Lookup::Range(low, high) => format!(
            "({field} >= {} AND {field} <= {})",
            literal(low)?,
            literal(high)?
        ),
        Lookup::Gt(value) => format!("{field} > {}", literal(value)?),
        Lookup::Gte(value) => format!("{field} >= {}", literal(value)?),
        Lookup::Lt(value) => format!("{field} < {}", literal(value)?),
        Lookup::Lte(value) => format!("{field} <= {}", literal(value)?),
        Lookup::Contains(text) => like(field, &format!("%{text}%")),
        Lookup::StartsWith(text) => like(field, &format!("{text}%")),
        Lookup::EndsWith(text) => like(field, &format!("%{text}")),
    };
    Ok(Compiled::Soql(soql))
}

fn literal(value: &Param) -> Result<String> {
    value.check()?;
    Ok(value.to_soql())
}

fn like(field: &str, pattern: &str) -> String {
    format!("{field} LIKE {}", Param::Text(pattern.to_string()).to_soql())
}

/// Accepts `Name` and relationship paths such as `Account.Owner.Name`.
pub(crate) fn check_field(field: &str) -> Result<()> {
    if field.split('.').all(soql::is_safe_field_name) {
        Ok(())
    } else {
        Err(Error::new(ErrorKind::Query(format!(
            "Invalid field name: {field:?}"
        ))))
    }
}

fn check_table(table: &str) -> Result<()> {
    if soql::is_safe_sobject_name(table) {
        Ok(())
    } else {
        Err(Error::new(ErrorKind::Query(format!(
            "Invalid SObject name: {table:?}"
        ))))
    }
}

/// Sort key of a SELECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

/// Result of compiling a [`SelectQuery`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Soql(String),
    /// The query returns no rows; nothing is sent.
    EmptyResult,
}

/// A SELECT built from parts.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectQuery {
    pub table: String,
    /// Selected columns. Empty selects `Id`.
    pub fields: Vec<String>,
    pub filter: Option<WhereNode>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// `SELECT COUNT() ...`: the result is the number of matching records.
    pub count_only: bool,
    /// Include deleted and merged records.
    pub query_all: bool,
    /// Query Tooling API objects.
    pub tooling: bool,
}

impl SelectQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(mut self, filter: WhereNode) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.order_by.push(OrderBy {
            field: field.into(),
            descending,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn count(mut self) -> Self {
        self.count_only = true;
        self
    }

    pub fn query_all(mut self) -> Self {
        self.query_all = true;
        self
    }

    pub fn tooling(mut self) -> Self {
        self.tooling = true;
        self
    }

    /// The REST service this query is sent to.
    pub fn service(&self) -> QueryService {
        if self.tooling {
            QueryService::Tooling
        } else if self.query_all {
            QueryService::QueryAll
        } else {
            QueryService::Query
        }
    }

    /// Compile to SOQL, or to [`Plan::EmptyResult`] when no row can match.
    pub fn compile(&self) -> Result<Plan> {
        check_table(&self.table)?;

        let columns = if self.count_only {
            "COUNT()".to_string()
        } else if self.fields.is_empty() {
            "Id".to_string()
        } else {
            for field in &self.fields {
                check_field(field)?;
            }
            self.fields.join(", ")
        };
        let mut soql = format!("SELECT {columns} FROM {}", self.table);

        let condition = match &self.filter {
            Some(filter) => filter.compile()?,
            None => Compiled::Everything,
        };
        match condition {
            Compiled::Nothing => return Ok(Plan::EmptyResult),
            Compiled::Everything => {}
            Compiled::Soql(condition) => {
                soql.push_str(" WHERE ");
                soql.push_str(&condition);
            }
        }
        if self.limit == Some(0) {
            return Ok(Plan::EmptyResult);
        }

        if !self.order_by.is_empty() && !self.count_only {
            let mut keys = Vec::with_capacity(self.order_by.len());
            for key in &self.order_by {
                check_field(&key.field)?;
                keys.push(if key.descending {
                    format!("{} DESC", key.field)
                } else {
                    format!("{} ASC", key.field)
                });
            }
            soql.push_str(" ORDER BY ");
            soql.push_str(&keys.join(", "));
        }
        if let Some(limit) = self.limit {
            soql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            soql.push_str(&format!(" OFFSET {offset}"));
        }
        Ok(Plan::Soql(soql))
    }
}

/// INSERT of one or more records.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub table: String,
    pub rows: Vec<Record>,
    /// Overrides the connection's `all_or_none` default.
    pub all_or_none: Option<bool>,
}

impl InsertStatement {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            rows: Vec::new(),
            all_or_none: None,
        }
    }

    pub fn row<I, K, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Param>,
    {
        self.rows.push(
            values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    pub fn all_or_none(mut self, enabled: bool) -> Self {
        self.all_or_none = Some(enabled);
        self
    }
}

/// UPDATE of the records matching a filter.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub table: String,
    pub values: Record,
    pub filter: WhereNode,
    /// Overrides the connection's `all_or_none` default.
    pub all_or_none: Option<bool>,
}

impl UpdateStatement {
    pub fn new<I, K, V>(table: impl Into<String>, values: I, filter: WhereNode) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Param>,
    {
        Self {
            table: table.into(),
            values: values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            filter,
            all_or_none: None,
        }
    }

    pub fn all_or_none(mut self, enabled: bool) -> Self {
        self.all_or_none = Some(enabled);
        self
    }
}

/// DELETE of the records matching a filter.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub table: String,
    pub filter: WhereNode,
}

impl DeleteStatement {
    pub fn new(table: impl Into<String>, filter: WhereNode) -> Self {
        Self {
            table: table.into(),
            filter,
        }
    }
}

/// JSON body of a record, with validated field names.
pub(crate) fn record_body(record: &Record) -> Result<Map<String, JsonValue>> {
    let mut body = Map::with_capacity(record.len());
    for (field, value) in record {
        if !soql::is_safe_field_name(field) {
            return Err(Error::new(ErrorKind::Query(format!(
                "Invalid field name: {field:?}"
            ))));
        }
        body.insert(field.clone(), value.to_json()?);
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn soql(query: &SelectQuery) -> String {
        match query.compile().unwrap() {
            Plan::Soql(soql) => soql,
            Plan::EmptyResult => panic!("unexpected empty result"),
        }
    }

    #[test]
    fn test_plain_select() {
        let query = SelectQuery::new("Contact")
            .fields(["Id", "LastName", "Account.Name"])
            .order_by("LastName", false)
            .order_by("CreatedDate", true)
            .limit(10)
            .offset(20);
        assert_eq!(
            soql(&query),
            "SELECT Id, LastName, Account.Name FROM Contact \
             ORDER BY LastName ASC, CreatedDate DESC LIMIT 10 OFFSET 20"
        );
        assert_eq!(soql(&SelectQuery::new("Contact")), "SELECT Id FROM Contact");
    }

    #[test]
    fn test_filter_lookups() {
        let filter = WhereNode::And(vec![
            WhereNode::eq("LastName", "O'Hara"),
            WhereNode::condition("NumberOfEmployees", Lookup::Gte(Param::Int(10))),
            WhereNode::Or(vec![
                WhereNode::condition("Email", Lookup::EndsWith(".org".into())),
                WhereNode::is_null("Phone", true),
            ]),
            WhereNode::not(WhereNode::condition("Name", Lookup::Contains("test".into()))),
        ]);
        let query = SelectQuery::new("Contact").filter(filter);
        assert_eq!(
            soql(&query),
            "SELECT Id FROM Contact WHERE (LastName = 'O\\'Hara' AND NumberOfEmployees >= 10 \
             AND (Email LIKE '%.org' OR Phone = NULL) AND (NOT Name LIKE '%test%'))"
        );
    }

    #[test]
    fn test_range_and_in() {
        let filter = WhereNode::And(vec![
            WhereNode::condition("Amount", Lookup::Range(Param::Int(1), Param::Int(5))),
            WhereNode::in_list("StageName", ["Won", "Lost"]),
            WhereNode::condition("Name", Lookup::StartsWith("Ac".into())),
        ]);
        assert_eq!(
            soql(&SelectQuery::new("Opportunity").filter(filter)),
            "SELECT Id FROM Opportunity WHERE ((Amount >= 1 AND Amount <= 5) \
             AND StageName IN ('Won', 'Lost') AND Name LIKE 'Ac%')"
        );
    }

    #[test]
    fn test_in_select() {
        let accounts = SelectQuery::new("Account")
            .fields(["Id"])
            .filter(WhereNode::eq("Industry", "Energy"));
        let query = SelectQuery::new("Contact").filter(WhereNode::in_select("AccountId", accounts));
        assert_eq!(
            soql(&query),
            "SELECT Id FROM Contact WHERE AccountId IN \
             (SELECT Id FROM Account WHERE Industry = 'Energy')"
        );
    }

    #[test]
    fn test_empty_in_is_empty_result() {
        let query = SelectQuery::new("Contact").filter(WhereNode::in_list("Id", Vec::<String>::new()));
        assert_eq!(query.compile().unwrap(), Plan::EmptyResult);

        // An empty IN inside OR only drops that branch.
        let query = SelectQuery::new("Contact").filter(WhereNode::Or(vec![
            WhereNode::in_list("Id", Vec::<String>::new()),
            WhereNode::eq("LastName", "Doe"),
        ]));
        assert_eq!(soql(&query), "SELECT Id FROM Contact WHERE LastName = 'Doe'");

        // NOT of an impossible condition matches everything.
        let query = SelectQuery::new("Contact")
            .filter(WhereNode::not(WhereNode::in_list("Id", Vec::<String>::new())));
        assert_eq!(soql(&query), "SELECT Id FROM Contact");

        let query = SelectQuery::new("Contact").filter(WhereNode::Or(vec![]));
        assert_eq!(query.compile().unwrap(), Plan::EmptyResult);

        assert_eq!(
            SelectQuery::new("Contact").limit(0).compile().unwrap(),
            Plan::EmptyResult
        );
    }

    #[test]
    fn test_empty_sub_select_is_empty_result() {
        let sub = SelectQuery::new("Account").filter(WhereNode::in_list("Id", Vec::<String>::new()));
        let query = SelectQuery::new("Contact").filter(WhereNode::in_select("AccountId", sub));
        assert_eq!(query.compile().unwrap(), Plan::EmptyResult);
    }

    #[test]
    fn test_count_and_services() {
        let query = SelectQuery::new("Contact")
            .count()
            .order_by("LastName", false)
            .filter(WhereNode::eq("IsDeleted", true))
            .query_all();
        assert_eq!(
            soql(&query),
            "SELECT COUNT() FROM Contact WHERE IsDeleted = true"
        );
        assert_eq!(query.service(), QueryService::QueryAll);
        assert_eq!(SelectQuery::new("ApexClass").tooling().service(), QueryService::Tooling);
        assert_eq!(SelectQuery::new("Contact").service(), QueryService::Query);
    }

    #[test]
    fn test_rejects_unsafe_names() {
        assert!(SelectQuery::new("Contact; DELETE").compile().is_err());
        assert!(SelectQuery::new("Contact")
            .fields(["Id, (SELECT Id FROM Cases)"])
            .compile()
            .is_err());
        let err = SelectQuery::new("Contact")
            .filter(WhereNode::eq("Name = 'x' OR Name", "y"))
            .compile()
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Query(_)));
    }

    #[test]
    fn test_id_source() {
        let single = WhereNode::eq("Id", "003000000000001AAA");
        assert!(matches!(
            single.id_source("Contact"),
            Some(IdSource::Literal(ids)) if ids == ["003000000000001AAA"]
        ));

        let listed = WhereNode::And(vec![WhereNode::in_list(
            "Contact.Id",
            ["003000000000001AAA", "003000000000002AAA"],
        )]);
        assert!(matches!(
            listed.id_source("Contact"),
            Some(IdSource::Literal(ids)) if ids.len() == 2
        ));

        let sub = WhereNode::in_select("Id", SelectQuery::new("Contact"));
        assert!(matches!(sub.id_source("Contact"), Some(IdSource::Select(_))));

        assert!(WhereNode::not(single.clone()).id_source("Contact").is_none());
        assert!(WhereNode::eq("AccountId", "001000000000001AAA")
            .id_source("Contact")
            .is_none());
        assert!(WhereNode::Or(vec![single.clone()]).id_source("Contact").is_none());
        assert!(WhereNode::And(vec![single.clone(), single]).id_source("Contact").is_none());
    }

    #[test]
    fn test_classify_raw() {
        assert_eq!(classify_raw("select Id from Contact"), RawKind::Select);
        assert_eq!(classify_raw("SAVEPOINT s1"), RawKind::Ignored);
        assert_eq!(classify_raw("ROLLBACK TO SAVEPOINT s1"), RawKind::Ignored);
        assert_eq!(classify_raw("RELEASE SAVEPOINT s1"), RawKind::Ignored);
        assert_eq!(classify_raw("DROP TABLE Contact"), RawKind::Unsupported);
    }

    #[test]
    fn test_record_body() {
        let record: Record = vec![
            ("LastName".into(), "Doe".into()),
            ("Email".into(), Param::Null),
        ];
        let body = record_body(&record).unwrap();
        assert_eq!(body["LastName"], "Doe");
        assert!(body["Email"].is_null());

        let bad: Record = vec![("Last Name".into(), "Doe".into())];
        assert!(record_body(&bad).is_err());

        let nan: Record = vec![("Amount".into(), Param::Float(f64::NAN))];
        let err = record_body(&nan).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Data(_)));
    }

    #[test]
    fn test_non_finite_filter_value() {
        let query = SelectQuery::new("Opportunity")
            .filter(WhereNode::condition("Amount", Lookup::Gt(Param::Float(f64::INFINITY))));
        let err = query.compile().unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Data(_)));
        let query = SelectQuery::new("Opportunity")
            .filter(WhereNode::in_list("Amount", [1.0, f64::NAN]));
        assert!(query.compile().is_err());
    }
}
