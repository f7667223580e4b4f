//! # sf-auth
//!
//! Authentication for the busbar Salesforce database adapter.
//!
//! ## Security
//!
//! - Sensitive data (tokens, secrets, passwords) are redacted in Debug output
//! - Tracing spans skip credential parameters
//! - A rejected password is not retried with the same credentials for five
//!   minutes, so a bad configuration cannot lock the account
//!
//! ## Model
//!
//! An [`AuthenticationProvider`] maps connection aliases to token slots.
//! Each slot has an [`Authenticator`] ([`PasswordAuth`] or
//! [`StaticTokenAuth`]) and the cached [`AuthToken`]. Cursors get an
//! [`AuthHandle`] and call `token()`; on an invalid-session response they
//! call `reauthenticate()` once.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use busbar_sf_auth::{AuthenticationProvider, ConnectionSettings, PasswordAuth};
//!
//! let provider = AuthenticationProvider::new();
//! let auth = PasswordAuth::new(ConnectionSettings::from_env()?)?;
//! let handle = provider.register("default", Arc::new(auth));
//! let token = handle.token().await?;
//! println!("{}", token.instance_url());
//! ```

mod error;
mod password;
mod provider;
mod settings;
mod static_token;
mod token;

pub use error::{Error, ErrorKind, Result};
pub use password::{PasswordAuth, TokenResponse, FAILED_LOGIN_COOLDOWN};
pub use provider::{AuthHandle, AuthenticationProvider, Authenticator};
pub use settings::ConnectionSettings;
pub use static_token::StaticTokenAuth;
pub use token::AuthToken;

/// Default Salesforce login URL for production.
pub const PRODUCTION_LOGIN_URL: &str = "https://login.salesforce.com";

/// Default Salesforce login URL for sandbox.
pub const SANDBOX_LOGIN_URL: &str = "https://test.salesforce.com";
