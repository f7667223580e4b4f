//! Decoding REST query responses into flat rows.
//!
//! Each record of a response is a tree: related objects are nested JSON
//! objects with an `attributes` key, child relationships are nested query
//! envelopes. Flattening walks the tree with the descriptor's subroots and
//! yields one value per alias, with nulls for every field under a related
//! object that is absent in this record.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex_lite::Regex;
use rust_decimal::Decimal;
use serde_json::{Map, Value as JsonValue};
use tracing::trace;

use crate::error::{Error, Result};
use crate::parser::{Field, QueryDescriptor, Subroots};

static DATETIME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[1-3]\d{3}-[01]\d-[0-3]\dT[0-2]\d:[0-5]\d:[0-6]\d.\d{3}\+0000$")
        .expect("valid datetime pattern")
});

const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

const AGGREGATE_RESULT: &str = "AggregateResult";

/// A decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    /// Any non-integer number, decoded without going through `f64`.
    Decimal(Decimal),
    Text(String),
    DateTime(DateTime<Utc>),
    /// Rows of a child relationship subquery.
    Records(Vec<Row>),
    /// Compound values (addresses, locations) and numbers out of range.
    Json(JsonValue),
}

impl Value {
    /// Convert a scalar JSON value.
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    return Value::Int(i);
                }
                let text = n.to_string();
                Decimal::from_str(&text)
                    .or_else(|_| Decimal::from_scientific(&text))
                    .map(Value::Decimal)
                    .unwrap_or(Value::Json(JsonValue::Number(n)))
            }
            JsonValue::String(s) => {
                if DATETIME_PATTERN.is_match(&s) {
                    if let Ok(dt) = DateTime::parse_from_str(&s, DATETIME_FORMAT) {
                        return Value::DateTime(dt.with_timezone(&Utc));
                    }
                }
                Value::Text(s)
            }
            other => Value::Json(other),
        }
    }

    /// Render as JSON, e.g. for printing.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::from(*i),
            Value::Decimal(d) => serde_json::Number::from_str(&d.to_string())
                .map(JsonValue::Number)
                .unwrap_or_else(|_| JsonValue::String(d.to_string())),
            Value::Text(s) => JsonValue::String(s.clone()),
            Value::DateTime(dt) => JsonValue::String(dt.format("%Y-%m-%dT%H:%M:%S%.3f+0000").to_string()),
            Value::Records(rows) => JsonValue::Array(rows.iter().map(Row::to_json).collect()),
            Value::Json(v) => v.clone(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The text, if this is a text value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Shape of the rows produced by a cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RowType {
    /// Positional values in alias order.
    #[default]
    List,
    /// Alias and value pairs in alias order.
    Dict,
}

/// One result row.
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    Tuple(Vec<Value>),
    Map(Vec<(String, Value)>),
}

impl Row {
    /// Values in column order.
    pub fn values(&self) -> Vec<&Value> {
        match self {
            Row::Tuple(values) => values.iter().collect(),
            Row::Map(pairs) => pairs.iter().map(|(_, v)| v).collect(),
        }
    }

    /// Value at a column position.
    pub fn get(&self, index: usize) -> Option<&Value> {
        match self {
            Row::Tuple(values) => values.get(index),
            Row::Map(pairs) => pairs.get(index).map(|(_, v)| v),
        }
    }

    /// Value by alias, compared case-insensitively. Only for [`Row::Map`].
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Row::Tuple(_) => None,
            Row::Map(pairs) => pairs
                .iter()
                .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
                .map(|(_, v)| v),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Row::Tuple(values) => values.len(),
            Row::Map(pairs) => pairs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Row::Tuple(values) => JsonValue::Array(values.iter().map(Value::to_json).collect()),
            Row::Map(pairs) => JsonValue::Object(
                pairs
                    .iter()
                    .map(|(alias, value)| (alias.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

/// One decoded response chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    /// Result of `SELECT COUNT() ...`.
    Count(u64),
    Rows(Vec<Row>),
}

impl QueryDescriptor {
    /// Decode one response chunk.
    ///
    /// `total_size` and `records` are the `totalSize` and `records` members
    /// of the query envelope.
    pub fn decode_chunk(
        &self,
        total_size: u64,
        records: &[JsonValue],
        row_type: RowType,
    ) -> Result<Chunk> {
        if self.is_plain_count() {
            if !records.is_empty() {
                return Err(Error::decode("COUNT() query returned records"));
            }
            return Ok(Chunk::Count(total_size));
        }
        trace!(records = records.len(), "Decoding chunk");
        self.decode_records(records, row_type).map(Chunk::Rows)
    }

    /// Decode records in order.
    pub fn decode_records(&self, records: &[JsonValue], row_type: RowType) -> Result<Vec<Row>> {
        records
            .iter()
            .map(|record| self.decode_record(record, row_type))
            .collect()
    }

    /// Decode one record into a row with one value per alias.
    pub fn decode_record(&self, record: &JsonValue, row_type: RowType) -> Result<Row> {
        let object = record
            .as_object()
            .ok_or_else(|| Error::decode("record is not a JSON object"))?;

        let record_type = object
            .get("attributes")
            .and_then(|a| a.get("type"))
            .and_then(JsonValue::as_str);
        if let Some(record_type) = record_type {
            if self.is_aggregation() != (record_type == AGGREGATE_RESULT) {
                return Err(Error::decode(format!(
                    "record of type {record_type} does not match an {} query",
                    if self.is_aggregation() { "aggregate" } else { "ordinary" }
                )));
            }
        }

        let mut flat = HashMap::new();
        self.flatten_into(object, "", self.subroots(), &mut flat);

        let mut values = Vec::with_capacity(self.aliases().len());
        for (alias, field) in self.aliases().iter().zip(self.fields()) {
            let key = alias.to_lowercase();
            let raw = match flat.remove(&key) {
                Some(raw) => raw,
                None if self.is_null_path(&key) => JsonValue::Null,
                None => {
                    return Err(Error::decode(format!("field {alias} missing from record")));
                }
            };
            let value = match field {
                Field::ChildQuery(child) => child.decode_child_envelope(raw, row_type)?,
                _ => Value::from_json(raw),
            };
            values.push(value);
        }

        Ok(match row_type {
            RowType::List => Row::Tuple(values),
            RowType::Dict => Row::Map(self.aliases().iter().cloned().zip(values).collect()),
        })
    }

    fn decode_child_envelope(&self, raw: JsonValue, row_type: RowType) -> Result<Value> {
        let envelope = match raw {
            JsonValue::Null => return Ok(Value::Null),
            JsonValue::Object(envelope) if is_child_envelope(&envelope) => envelope,
            _ => {
                return Err(Error::decode(format!(
                    "child relationship {} is not a query result",
                    self.root_table()
                )))
            }
        };
        if envelope.get("done").and_then(JsonValue::as_bool) != Some(true) {
            return Err(Error::decode(format!(
                "child relationship {} was not returned completely",
                self.root_table()
            )));
        }
        let records = envelope
            .get("records")
            .and_then(JsonValue::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        self.decode_records(records, row_type).map(Value::Records)
    }

    /// Replace nested related objects by dotted lower-case keys.
    fn flatten_into(
        &self,
        object: &Map<String, JsonValue>,
        prefix: &str,
        subroots: &Subroots,
        out: &mut HashMap<String, JsonValue>,
    ) {
        for (key, value) in object {
            let key_lc = key.to_lowercase();
            let path = format!("{prefix}{key_lc}");
            match value {
                JsonValue::Object(inner)
                    if inner.contains_key("attributes") && !is_child_envelope(inner) =>
                {
                    let empty = Subroots::default();
                    let nested = subroots.get(&key_lc).unwrap_or(&empty);
                    self.flatten_into(inner, &format!("{path}."), nested, out);
                }
                _ if subroots.contains(&key_lc) => {
                    let absent = format!("{path}.");
                    for alias in self.aliases() {
                        let alias_lc = alias.to_lowercase();
                        if alias_lc.starts_with(&absent) {
                            out.insert(alias_lc, JsonValue::Null);
                        }
                    }
                }
                _ => {
                    out.insert(path, value.clone());
                }
            }
        }
    }

    /// Whether a lower-cased alias lies under a related object path.
    fn is_null_path(&self, alias_lc: &str) -> bool {
        let mut node = self.subroots();
        let mut segments = alias_lc.split('.').peekable();
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                break;
            }
            match node.get(segment) {
                Some(next) => node = next,
                None => return false,
            }
        }
        alias_lc.contains('.')
    }
}

/// A nested query result for a child relationship.
fn is_child_envelope(object: &Map<String, JsonValue>) -> bool {
    object.contains_key("done") && object.contains_key("records") && object.contains_key("totalSize")
}
