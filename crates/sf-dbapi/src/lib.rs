//! # sf-dbapi
//!
//! Presents a Salesforce org as a relational database: a connection per
//! alias, cursors that run statements and hand out rows, and a request
//! executor that speaks the REST, SObject Collections and Composite APIs.
//!
//! - [`SalesforceConnection`] sends every request, re-authenticates once on
//!   an expired session and turns error responses into typed [`Error`]s
//! - [`Cursor`] runs SELECT, INSERT, UPDATE and DELETE statements and pages
//!   through query results on demand
//! - [`Connections`] keeps one connection (and one token) per alias
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use busbar_sf_auth::{ConnectionSettings, PasswordAuth};
//! use busbar_sf_dbapi::{Connections, DatabaseConfig, SelectQuery, WhereNode};
//!
//! let connections = Connections::new();
//! let config = DatabaseConfig::builder("default").build();
//! let settings = ConnectionSettings::from_env()?;
//! let auth = Arc::new(PasswordAuth::with_client_config(settings, &config.client)?);
//! connections.connect(config, auth).await?;
//!
//! let mut cursor = connections.cursor("default")?;
//! cursor
//!     .execute(
//!         SelectQuery::new("Contact")
//!             .fields(["Id", "LastName", "Account.Name"])
//!             .filter(WhereNode::eq("LastName", "Doe")),
//!     )
//!     .await?;
//! while let Some(row) = cursor.fetch_one().await? {
//!     println!("{row:?}");
//! }
//! ```

pub mod collections;
pub mod composite;
mod config;
mod connection;
mod cursor;
mod error;
mod registry;
mod rows;
mod statement;

#[cfg(test)]
mod test_support;

pub use config::{
    BatchMode, DatabaseConfig, DatabaseConfigBuilder, DEFAULT_ALIAS,
    DEFAULT_NOOP_DELETE_ERROR_CODES,
};
pub use connection::{rest_api_url, QueryService, RecordOutcome, SalesforceConnection, INVALID_SESSION_ID};
pub use cursor::{ColumnDescription, Cursor, CursorMessage, LastRowId};
pub use error::{Error, ErrorKind, Result};
pub use registry::Connections;
pub use rows::{RowStream, COUNT_COLUMN};
pub use statement::{
    Compiled, DeleteStatement, InsertStatement, Lookup, OrderBy, Plan, Record, SelectQuery,
    StatementKind, UpdateStatement, WhereNode,
};

pub use busbar_sf_soql::{Param, Row, RowType, Value};
