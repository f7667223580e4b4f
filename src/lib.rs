//! # busbar-sf-db
//!
//! Use a Salesforce org like a relational database from Rust.
//!
//! Salesforce is reached through its REST API: SELECT statements become
//! SOQL queries, writes become SObject, SObject Collections or Composite
//! requests, and results are flattened into rows.
//!
//! ## Security
//!
//! - Access tokens, passwords and consumer secrets are redacted in Debug output
//! - Tracing spans skip credential parameters
//! - Error messages are scrubbed of anything that looks like a token
//! - Object and field names are validated before they reach SOQL text
//!
//! ## Crates
//!
//! - **busbar-sf-client** - HTTP transport, error envelopes, SOQL escaping
//! - **busbar-sf-auth** - Password grant, static tokens, per-alias token slots
//! - **busbar-sf-soql** - SOQL splitting, column descriptors, row flattening
//! - **busbar-sf-dbapi** - Connections, cursors and the request executor
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use busbar_sf_db::{Connections, ConnectionSettings, DatabaseConfig, PasswordAuth};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DatabaseConfig::builder("default").build();
//!     let settings = ConnectionSettings::from_env()?;
//!     let auth = Arc::new(PasswordAuth::with_client_config(settings, &config.client)?);
//!     let connections = Connections::new();
//!     connections.connect(config, auth).await?;
//!
//!     let mut cursor = connections.cursor("default")?;
//!     cursor
//!         .execute_soql("SELECT Id, Name FROM Account LIMIT 10", vec![])
//!         .await?;
//!     for row in cursor.fetch_all().await? {
//!         println!("{row:?}");
//!     }
//!     Ok(())
//! }
//! ```

#[cfg(feature = "auth")]
pub use busbar_sf_auth as auth;
#[cfg(feature = "client")]
pub use busbar_sf_client as client;
#[cfg(feature = "dbapi")]
pub use busbar_sf_dbapi as dbapi;
#[cfg(feature = "soql")]
pub use busbar_sf_soql as soql;

#[cfg(feature = "auth")]
pub use busbar_sf_auth::{AuthenticationProvider, ConnectionSettings, PasswordAuth, StaticTokenAuth};
#[cfg(feature = "client")]
pub use busbar_sf_client::{ClientConfig, SfHttpClient};
#[cfg(feature = "dbapi")]
pub use busbar_sf_dbapi::{
    Connections, Cursor, DatabaseConfig, DeleteStatement, InsertStatement, SelectQuery,
    UpdateStatement, WhereNode,
};
#[cfg(feature = "soql")]
pub use busbar_sf_soql::{Param, Row, RowType, Value};
