//! # sf-client
//!
//! HTTP transport for the busbar Salesforce database adapter.
//!
//! This crate provides:
//! - [`SfHttpClient`], a pooled `reqwest` client that sends one request per
//!   call with bounded connect and request timeouts (no retry loop)
//! - the [`HttpTransport`] seam used by the request executor, so tests can
//!   swap the network for a double
//! - the [`HttpResponse`] capability shared by real, synthetic and test
//!   responses, plus decoding of the Salesforce error envelope
//! - SOQL literal escaping and REST path validation in [`security`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use busbar_sf_client::{ClientConfig, HttpResponse, SfHttpClient};
//!
//! let client = SfHttpClient::new(ClientConfig::default())?;
//! let response = client
//!     .execute(client.get(url).query("q", "SELECT Id FROM Account").bearer_auth(token))
//!     .await?;
//! if !response.is_ok() {
//!     return Err(busbar_sf_client::error_from_response(&response));
//! }
//! ```

mod client;
mod config;
mod error;
mod request;
mod response;
pub mod security;
mod types;

pub use client::{HttpTransport, SfHttpClient};
pub use config::{ClientConfig, ClientConfigBuilder, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};
pub use error::{Error, ErrorKind, Result};
pub use request::{RequestBuilder, RequestMethod};
pub use response::{
    error_from_response, parse_error_envelope, sanitize_error_message, HttpResponse, Response,
    SalesforceErrorResponse, OK_STATUS_CODES,
};
pub use types::QueryResult;

/// Default Salesforce API version
pub const DEFAULT_API_VERSION: &str = "62.0";

/// User-Agent string for the client
pub const USER_AGENT: &str = concat!("busbar-sf-db/", env!("CARGO_PKG_VERSION"));
