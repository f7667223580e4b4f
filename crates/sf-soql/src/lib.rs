//! # sf-soql
//!
//! SOQL text handling for the busbar Salesforce database adapter.
//!
//! - [`split_subquery`] cuts nested `(SELECT ...)` spans out of a query
//! - [`QueryDescriptor`] describes the columns a SELECT returns
//! - [`QueryDescriptor::decode_chunk`] turns REST response records into rows
//! - [`Param`] and [`format_soql`] bind positional parameters
//!
//! ## Example
//!
//! ```rust,ignore
//! use busbar_sf_soql::{QueryDescriptor, RowType};
//!
//! let query = QueryDescriptor::parse("SELECT Id, Account.Name FROM Contact")?;
//! assert_eq!(query.aliases(), ["Id", "Account.Name"]);
//! let rows = query.decode_records(&response["records"].as_array().unwrap(), RowType::List)?;
//! ```

mod error;
mod flatten;
mod parser;
mod split;
mod value;

pub use error::{Error, ErrorKind, Result};
pub use flatten::{Chunk, Row, RowType, Value};
pub use parser::{Field, QueryDescriptor, Subroots};
pub use split::{
    find_closing_parenthesis, mark_quoted_strings, quote_literal, simplify_expression,
    split_subquery, subst_quoted_strings, transform_except_subquery, SplitQuery,
    LITERAL_MARKER, PARAM_PLACEHOLDER, RESERVED_WORDS, SUBQUERY_MARKER,
};
pub use value::{format_soql, Param};
