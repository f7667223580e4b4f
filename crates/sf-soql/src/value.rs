//! Bind parameters and their SOQL and JSON renderings.

use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use crate::error::{Error, ErrorKind, Result};
use crate::split::{quote_literal, PARAM_PLACEHOLDER};

/// A value bound to a `%s` placeholder or written to a record field.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Date(NaiveDate),
    DateTime(DateTime<FixedOffset>),
    Time(NaiveTime),
    /// Rendered as a parenthesized list, for `IN %s`.
    List(Vec<Param>),
}

impl Param {
    /// SOQL literal for this value.
    pub fn to_soql(&self) -> String {
        match self {
            Param::Null => "NULL".to_string(),
            Param::Bool(b) => b.to_string(),
            Param::Int(i) => i.to_string(),
            Param::Float(f) => f.to_string(),
            Param::Decimal(d) => d.to_string(),
            Param::Text(s) => quote_literal(s),
            Param::Date(d) => d.format("%Y-%m-%d").to_string(),
            Param::DateTime(dt) => dt.format("%Y-%m-%dT%H:%M:%S.000%z").to_string(),
            Param::Time(t) => t.format("%H:%M:%S%.6f").to_string(),
            Param::List(items) => {
                let items: Vec<String> = items.iter().map(Param::to_soql).collect();
                format!("({})", items.join(","))
            }
        }
    }

    /// JSON value for an insert or update body.
    ///
    /// NaN and infinite floats have no JSON form and are rejected.
    pub fn to_json(&self) -> Result<JsonValue> {
        Ok(match self {
            Param::Null => JsonValue::Null,
            Param::Bool(b) => JsonValue::Bool(*b),
            Param::Int(i) => JsonValue::from(*i),
            Param::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .ok_or_else(|| non_finite(*f))?,
            Param::Decimal(d) => serde_json::Number::from_str(&d.to_string())
                .map(JsonValue::Number)
                .unwrap_or_else(|_| JsonValue::String(d.to_string())),
            Param::Text(s) => JsonValue::String(s.clone()),
            Param::List(items) => JsonValue::Array(
                items
                    .iter()
                    .map(Param::to_json)
                    .collect::<Result<Vec<_>>>()?,
            ),
            Param::Date(_) | Param::DateTime(_) | Param::Time(_) => {
                JsonValue::String(self.to_soql())
            }
        })
    }

    /// Fails for values [`to_soql`](Self::to_soql) cannot render as a
    /// literal: NaN and infinite floats, also inside lists.
    pub fn check(&self) -> Result<()> {
        match self {
            Param::Float(f) if !f.is_finite() => Err(non_finite(*f)),
            Param::List(items) => items.iter().try_for_each(Param::check),
            _ => Ok(()),
        }
    }
}

fn non_finite(value: f64) -> Error {
    Error::new(ErrorKind::InvalidParam(format!(
        "{value} is not a finite number"
    )))
}

impl From<bool> for Param {
    fn from(value: bool) -> Self {
        Param::Bool(value)
    }
}

impl From<i32> for Param {
    fn from(value: i32) -> Self {
        Param::Int(value.into())
    }
}

impl From<i64> for Param {
    fn from(value: i64) -> Self {
        Param::Int(value)
    }
}

impl From<f64> for Param {
    fn from(value: f64) -> Self {
        Param::Float(value)
    }
}

impl From<Decimal> for Param {
    fn from(value: Decimal) -> Self {
        Param::Decimal(value)
    }
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Param::Text(value.to_string())
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Param::Text(value)
    }
}

impl From<NaiveDate> for Param {
    fn from(value: NaiveDate) -> Self {
        Param::Date(value)
    }
}

impl From<DateTime<FixedOffset>> for Param {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Param::DateTime(value)
    }
}

impl From<DateTime<Utc>> for Param {
    fn from(value: DateTime<Utc>) -> Self {
        Param::DateTime(value.fixed_offset())
    }
}

impl From<NaiveTime> for Param {
    fn from(value: NaiveTime) -> Self {
        Param::Time(value)
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(value: Option<T>) -> Self {
        value.map_or(Param::Null, Into::into)
    }
}

impl<T: Into<Param>> From<Vec<T>> for Param {
    fn from(value: Vec<T>) -> Self {
        Param::List(value.into_iter().map(Into::into).collect())
    }
}

/// Byte offsets of `%s` placeholders outside quoted literals.
fn placeholder_offsets(soql: &str) -> Vec<usize> {
    let bytes = soql.as_bytes();
    let mut offsets = Vec::new();
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if in_literal => i += 1,
            b'\'' => in_literal = !in_literal,
            b'%' if !in_literal && bytes.get(i + 1) == Some(&b's') => {
                offsets.push(i);
                i += 1;
            }
            _ => {}
        }
        i += 1;
    }
    offsets
}

/// Substitute positional parameters into `%s` placeholders.
pub fn format_soql(soql: &str, params: &[Param]) -> Result<String> {
    let offsets = placeholder_offsets(soql);
    if offsets.len() != params.len() {
        return Err(Error::new(ErrorKind::ParamCount {
            placeholders: offsets.len(),
            params: params.len(),
        }));
    }

    let mut out = String::with_capacity(soql.len() + params.len() * 8);
    let mut start = 0;
    for (offset, param) in offsets.into_iter().zip(params) {
        param.check()?;
        out.push_str(&soql[start..offset]);
        out.push_str(&param.to_soql());
        start = offset + PARAM_PLACEHOLDER.len();
    }
    out.push_str(&soql[start..]);
    Ok(out)
}
