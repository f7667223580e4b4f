//! Connection configuration.

use std::collections::BTreeSet;

use busbar_sf_client::{ClientConfig, DEFAULT_API_VERSION};
use busbar_sf_soql::RowType;

/// Error codes of a 404 on DELETE that mean the record is already gone.
pub const DEFAULT_NOOP_DELETE_ERROR_CODES: [&str; 2] =
    ["ENTITY_IS_DELETED", "INVALID_CROSS_REFERENCE_KEY"];

/// Alias used when none is configured.
pub const DEFAULT_ALIAS: &str = "default";

/// How writes of more than one record are sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchMode {
    /// SObject Collections: up to 200 records per request.
    #[default]
    Collections,
    /// Composite API: up to 25 subrequests per request.
    Composite,
}

/// Configuration for one connection alias.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Logical connection name.
    pub alias: String,
    /// REST API version without the `v`, e.g. `62.0`.
    pub api_version: String,
    /// HTTP client settings (timeouts, pool, user agent).
    pub client: ClientConfig,
    /// Protocol for multi-record writes.
    pub batch_mode: BatchMode,
    /// Default `allOrNone` flag for inserts and updates.
    pub all_or_none: bool,
    /// Defer login until the first request.
    pub lazy_connect: bool,
    /// 404 error codes treated as an already deleted record.
    pub noop_delete_error_codes: BTreeSet<String>,
    /// Row shape produced by cursors.
    pub row_type: RowType,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            alias: DEFAULT_ALIAS.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            client: ClientConfig::default(),
            batch_mode: BatchMode::default(),
            all_or_none: false,
            lazy_connect: true,
            noop_delete_error_codes: DEFAULT_NOOP_DELETE_ERROR_CODES
                .iter()
                .map(|code| code.to_string())
                .collect(),
            row_type: RowType::default(),
        }
    }
}

impl DatabaseConfig {
    /// Create a builder for the given alias.
    pub fn builder(alias: impl Into<String>) -> DatabaseConfigBuilder {
        DatabaseConfigBuilder {
            config: DatabaseConfig {
                alias: alias.into(),
                ..Default::default()
            },
        }
    }

    /// Whether a 404 error code on DELETE means the record is already gone.
    pub fn is_noop_delete_code(&self, error_code: &str) -> bool {
        self.noop_delete_error_codes.contains(error_code)
    }
}

/// Builder for [`DatabaseConfig`].
#[derive(Debug)]
pub struct DatabaseConfigBuilder {
    config: DatabaseConfig,
}

impl DatabaseConfigBuilder {
    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.config.api_version = version.into();
        self
    }

    pub fn client(mut self, client: ClientConfig) -> Self {
        self.config.client = client;
        self
    }

    pub fn batch_mode(mut self, mode: BatchMode) -> Self {
        self.config.batch_mode = mode;
        self
    }

    pub fn all_or_none(mut self, enabled: bool) -> Self {
        self.config.all_or_none = enabled;
        self
    }

    pub fn lazy_connect(mut self, lazy: bool) -> Self {
        self.config.lazy_connect = lazy;
        self
    }

    /// Add an error code to the set treated as an already deleted record.
    pub fn noop_delete_error_code(mut self, code: impl Into<String>) -> Self {
        self.config.noop_delete_error_codes.insert(code.into());
        self
    }

    /// Replace the whole set of no-op delete error codes.
    pub fn noop_delete_error_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.noop_delete_error_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    pub fn row_type(mut self, row_type: RowType) -> Self {
        self.config.row_type = row_type;
        self
    }

    pub fn build(self) -> DatabaseConfig {
        self.config
    }
}
