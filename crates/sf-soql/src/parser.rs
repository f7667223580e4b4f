//! SOQL query descriptors.
//!
//! A [`QueryDescriptor`] records what a SELECT returns: the root object, one
//! alias per output column, child relationship subqueries and the related
//! object paths that may be absent in a response. It is built once per
//! statement text and used to decode every chunk of the response.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex_lite::Regex;

use crate::error::{Error, Result};
use crate::split::{
    interleave, is_word_char, mark_quoted_strings, simplify_expression, split_marked,
    subst_quoted_strings, SplitQuery, PARAM_PLACEHOLDER, RESERVED_WORDS, SUBQUERY_MARKER,
};

static SELECT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^SELECT (.*) FROM (\w+)\b(.*)$").expect("valid SELECT pattern")
});

static GROUP_BY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bGROUP BY\b").expect("valid GROUP BY pattern"));

static AGGREGATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:AVG|COUNT|COUNT_DISTINCT|MIN|MAX|SUM)\(").expect("valid aggregate pattern")
});

const CHILD_PLACEHOLDER: &str = "(&)";

/// One selected column.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    /// A field path as written, e.g. `Contact.Account.Name`.
    Column(String),
    /// An expression in an aggregate query, with its explicit alias if any.
    Aggregate { expr: String, alias: Option<String> },
    /// A child relationship subquery.
    ChildQuery(Box<QueryDescriptor>),
}

/// Nested map of lower-cased related object names.
///
/// `SELECT Account.Owner.Name FROM Contact` has the path `account -> owner`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subroots(BTreeMap<String, Subroots>);

impl Subroots {
    /// The nested map for one lower-cased segment.
    pub fn get(&self, segment: &str) -> Option<&Subroots> {
        self.0.get(segment)
    }

    /// Whether a lower-cased segment is a related object path.
    pub fn contains(&self, segment: &str) -> bool {
        self.0.contains_key(segment)
    }

    /// Whether there are no paths.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn insert_path<'a>(&mut self, segments: impl IntoIterator<Item = &'a str>) {
        let mut node = self;
        for segment in segments {
            node = node.0.entry(segment.to_lowercase()).or_default();
        }
    }
}

/// Parsed form of one SELECT statement or child subquery.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    root_table: String,
    fields: Vec<Field>,
    aliases: Vec<String>,
    subroots: Subroots,
    extra_soql: String,
    literals: Vec<String>,
    param_count: usize,
    is_aggregation: bool,
    is_plain_count: bool,
    has_child_rel_field: bool,
}

impl QueryDescriptor {
    /// Parse SOQL text. `%s` placeholders may remain in the text.
    pub fn parse(soql: &str) -> Result<Self> {
        let (marked, literals) = mark_quoted_strings(soql)?;
        let slots = vec![(); marked.matches(PARAM_PLACEHOLDER).count()];
        let split = split_marked(&simplify_expression(&marked), slots, literals)?;
        Self::from_split(&split)
    }

    /// Build a descriptor from the output of [`split_subquery`](crate::split_subquery).
    pub fn from_split<P: Clone>(split: &SplitQuery<P>) -> Result<Self> {
        let captures = SELECT_PATTERN
            .captures(&split.soql)
            .ok_or_else(|| Error::parse("Invalid SOQL", display_text(split)))?;
        let fields_soql = captures.get(1).map_or("", |m| m.as_str());
        let root_table = captures.get(2).map_or("", |m| m.as_str()).to_string();
        let extra_soql = captures.get(3).map_or("", |m| m.as_str()).to_string();

        let raw_fields: Vec<&str> = fields_soql.split(',').map(str::trim).collect();
        let first = raw_fields.first().copied().unwrap_or_default();
        let is_aggregation =
            GROUP_BY_PATTERN.is_match(&extra_soql) || AGGREGATE_PATTERN.is_match(first);
        let is_plain_count = raw_fields.len() == 1 && first.eq_ignore_ascii_case("COUNT()");

        let mut descriptor = Self {
            root_table,
            fields: Vec::with_capacity(raw_fields.len()),
            aliases: Vec::with_capacity(raw_fields.len()),
            subroots: Subroots::default(),
            extra_soql,
            literals: split.literals.clone(),
            param_count: split.params.len(),
            is_aggregation,
            is_plain_count,
            has_child_rel_field: false,
        };
        if is_plain_count {
            return Ok(descriptor);
        }

        let mut subqueries = split.subqueries.iter();
        let mut expr_counter = 0usize;
        for raw in raw_fields {
            let (field, alias) = if descriptor.is_aggregation {
                if raw.contains(SUBQUERY_MARKER) {
                    return Err(Error::parse(
                        "Subquery not expected as a field in an aggregate query",
                        display_text(split),
                    ));
                }
                aggregate_field(raw, &mut expr_counter, split)?
            } else if raw.contains(SUBQUERY_MARKER) {
                if raw != CHILD_PLACEHOLDER {
                    return Err(Error::parse("Unexpected subquery expression", display_text(split)));
                }
                let child_split = subqueries.next().ok_or_else(|| {
                    Error::parse("More subquery placeholders than subqueries", display_text(split))
                })?;
                let child = Self::from_split(child_split)?;
                descriptor.has_child_rel_field = true;
                let alias = child.root_table.clone();
                (Field::ChildQuery(Box::new(child)), alias)
            } else {
                let alias = descriptor.column_alias(raw);
                (Field::Column(raw.to_string()), alias)
            };
            descriptor.fields.push(field);
            descriptor.aliases.push(alias);
        }
        Ok(descriptor)
    }

    /// Strip the root table prefix and record related object paths.
    fn column_alias(&mut self, field: &str) -> String {
        let alias = match field.split_once('.') {
            Some((head, rest)) if head.eq_ignore_ascii_case(&self.root_table) => rest,
            _ => field,
        };
        if let Some((path, _)) = alias.rsplit_once('.') {
            self.subroots.insert_path(path.split('.'));
        }
        alias.to_string()
    }

    /// The queried object, e.g. `Contact`.
    pub fn root_table(&self) -> &str {
        &self.root_table
    }

    /// Selected fields in output order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Output column names, parallel to [`fields`](Self::fields).
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Related object paths that can be null in a response.
    pub fn subroots(&self) -> &Subroots {
        &self.subroots
    }

    /// Everything after the root table, e.g. ` WHERE Name=@ LIMIT 1`.
    pub fn extra_soql(&self) -> &str {
        &self.extra_soql
    }

    /// Whether the query groups or aggregates.
    pub fn is_aggregation(&self) -> bool {
        self.is_aggregation
    }

    /// Whether the query is `SELECT COUNT() FROM ...`.
    pub fn is_plain_count(&self) -> bool {
        self.is_plain_count
    }

    /// Whether any field is a child relationship subquery.
    pub fn has_child_rel_field(&self) -> bool {
        self.has_child_rel_field
    }

    /// Number of `%s` placeholders at this level.
    pub fn param_count(&self) -> usize {
        self.param_count
    }

    /// Child descriptors in field order.
    pub fn subqueries(&self) -> impl Iterator<Item = &QueryDescriptor> {
        self.fields.iter().filter_map(|field| match field {
            Field::ChildQuery(child) => Some(child.as_ref()),
            _ => None,
        })
    }

    /// Render the descriptor back to SOQL.
    pub fn to_soql(&self) -> Result<String> {
        let (marked, literals) = self.marked();
        subst_quoted_strings(&marked, &literals)
    }

    fn marked(&self) -> (String, Vec<String>) {
        let columns: Vec<String> = if self.is_plain_count {
            vec!["COUNT()".to_string()]
        } else {
            self.fields
                .iter()
                .map(|field| match field {
                    Field::Column(text) => text.clone(),
                    Field::Aggregate { expr, alias: Some(alias) } => format!("{expr} {alias}"),
                    Field::Aggregate { expr, alias: None } => expr.clone(),
                    Field::ChildQuery(_) => CHILD_PLACEHOLDER.to_string(),
                })
                .collect()
        };
        let template = format!(
            "SELECT {} FROM {}{}",
            columns.join(", "),
            self.root_table,
            self.extra_soql
        );
        let children: Vec<(String, Vec<String>)> =
            self.subqueries().map(QueryDescriptor::marked).collect();
        interleave(&template, &self.literals, &children)
    }
}

fn aggregate_field<P: Clone>(
    raw: &str,
    expr_counter: &mut usize,
    split: &SplitQuery<P>,
) -> Result<(Field, String)> {
    let word_start = raw
        .char_indices()
        .rev()
        .take_while(|&(_, c)| is_word_char(c))
        .last()
        .map(|(i, _)| i);

    let Some(start) = word_start else {
        let alias = format!("expr{expr_counter}");
        *expr_counter += 1;
        let field = Field::Aggregate {
            expr: raw.to_string(),
            alias: None,
        };
        return Ok((field, alias));
    };

    let alias = &raw[start..];
    if RESERVED_WORDS.contains(&alias.to_ascii_uppercase().as_str()) {
        return Err(Error::parse(
            format!("Reserved word {alias:?} used as an alias"),
            display_text(split),
        ));
    }
    let field = match raw[..start].strip_suffix(' ') {
        Some(expr) => Field::Aggregate {
            expr: expr.to_string(),
            alias: Some(alias.to_string()),
        },
        None => Field::Aggregate {
            expr: raw.to_string(),
            alias: None,
        },
    };
    Ok((field, alias.to_string()))
}

fn display_text<P: Clone>(split: &SplitQuery<P>) -> String {
    split.reassemble().unwrap_or_else(|_| split.soql.clone())
}
