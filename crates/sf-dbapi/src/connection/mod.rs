//! Request executor: the only part of the adapter that touches the network.
//!
//! A [`SalesforceConnection`] owns the transport and the token slot of one
//! connection alias. Every call goes through [`SalesforceConnection::execute`],
//! which builds the URL, attaches the bearer token, retries once after an
//! invalid-session 401 and turns error responses into typed errors.

use std::sync::Arc;

use busbar_sf_auth::{AuthHandle, Authenticator};
use busbar_sf_client::{
    error_from_response, parse_error_envelope, HttpResponse, HttpTransport, RequestBuilder,
    RequestMethod, Response, SfHttpClient,
};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument, warn};

use crate::config::DatabaseConfig;
use crate::cursor::Cursor;
use crate::error::{Error, ErrorKind, Result};

mod collections;
mod composite;
mod query;

pub(crate) use collections::check_sobject;
pub use query::QueryService;

/// Error code of a 401 that can be fixed by logging in again.
pub const INVALID_SESSION_ID: &str = "INVALID_SESSION_ID";

/// Error codes that get the request method and URL appended to the message.
const REQUEST_CONTEXT_CODES: [&str; 2] = ["NOT_FOUND", "METHOD_NOT_ALLOWED"];

/// Outcome of one record of a multi-record write, in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The record was written. `id` is set for inserts.
    Written { id: Option<String> },
    /// A delete target that did not exist anymore.
    AlreadyAbsent { id: String, error_code: String },
    /// The record failed without failing the batch (`allOrNone = false`).
    Failed {
        reference: Option<String>,
        error_code: String,
        message: String,
        fields: Vec<String>,
    },
}

impl RecordOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, RecordOutcome::Written { .. })
    }
}

enum Answer {
    Response(Response),
    AlreadyDeleted { error_code: String },
}

/// Build an absolute REST URL.
///
/// An absolute `https://` path is used as-is. A path starting with `/` is
/// appended to the instance URL. Anything else is placed under
/// `/services/data/v{api_version}`; an empty version omits that segment.
pub fn rest_api_url(instance_url: &str, api_version: &str, path: &str) -> String {
    if path.starts_with("https://") {
        return path.to_string();
    }
    let instance_url = instance_url.trim_end_matches('/');
    if path.starts_with('/') {
        return format!("{instance_url}{path}");
    }

    let mut url = format!("{instance_url}/services/data");
    if !api_version.is_empty() {
        url.push_str("/v");
        url.push_str(api_version);
    }
    if !path.is_empty() {
        url.push('/');
        url.push_str(path);
    }
    url
}

/// One logical connection: a transport, a token slot and the configuration
/// of its alias. Shared by all cursors of that alias.
#[derive(Debug)]
pub struct SalesforceConnection {
    config: DatabaseConfig,
    transport: Arc<dyn HttpTransport>,
    auth: AuthHandle,
}

impl SalesforceConnection {
    /// Create a connection from its parts.
    pub fn new(config: DatabaseConfig, transport: Arc<dyn HttpTransport>, auth: AuthHandle) -> Self {
        Self {
            config,
            transport,
            auth,
        }
    }

    /// Create a connection with its own HTTP client and token slot.
    ///
    /// Unless `lazy_connect` is set, this logs in before returning.
    pub async fn connect(config: DatabaseConfig, authenticator: Arc<dyn Authenticator>) -> Result<Self> {
        let transport = Arc::new(SfHttpClient::new(config.client.clone())?);
        let auth = AuthHandle::standalone(config.alias.clone(), authenticator);
        let connection = Self::new(config, transport, auth);
        connection.open().await?;
        Ok(connection)
    }

    /// Log in now unless the connection is configured to do it lazily.
    pub(crate) async fn open(&self) -> Result<()> {
        if !self.config.lazy_connect {
            let token = self.auth.token().await?;
            info!(alias = %self.config.alias, instance_url = %token.instance_url(), "Connected");
        }
        Ok(())
    }

    pub fn alias(&self) -> &str {
        &self.config.alias
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn auth(&self) -> &AuthHandle {
        &self.auth
    }

    /// A new cursor over this connection.
    pub fn cursor(self: &Arc<Self>) -> Cursor {
        Cursor::new(Arc::clone(self))
    }

    /// Instance-relative path of a REST resource, as used by composite
    /// subrequests: `/services/data/v62.0/{path}`.
    pub fn relative_url(&self, path: &str) -> String {
        format!("/services/data/v{}/{}", self.config.api_version, path)
    }

    /// Send one request and check its response.
    ///
    /// Returns `None` only for a DELETE of a record that is already gone.
    pub async fn execute(
        &self,
        method: RequestMethod,
        path: &str,
        body: Option<&JsonValue>,
    ) -> Result<Option<Response>> {
        Ok(match self.dispatch(method, path, body).await? {
            Answer::Response(response) => Some(response),
            Answer::AlreadyDeleted { .. } => None,
        })
    }

    /// DELETE one record. A record that is already gone is
    /// [`RecordOutcome::AlreadyAbsent`] with the code the server sent.
    pub async fn delete_record(&self, path: &str, id: &str) -> Result<RecordOutcome> {
        Ok(match self.dispatch(RequestMethod::Delete, path, None).await? {
            Answer::Response(_) => RecordOutcome::Written { id: None },
            Answer::AlreadyDeleted { error_code } => RecordOutcome::AlreadyAbsent {
                id: id.to_string(),
                error_code,
            },
        })
    }

    #[instrument(skip(self, body), fields(alias = %self.config.alias))]
    async fn dispatch(
        &self,
        method: RequestMethod,
        path: &str,
        body: Option<&JsonValue>,
    ) -> Result<Answer> {
        let token = self.auth.token().await?;
        let url = rest_api_url(token.instance_url(), &self.config.api_version, path);

        let mut response = self.send(method, &url, body, token.access_token()).await?;
        if response.status() == 401 && is_invalid_session(&response) {
            info!("Session is no longer valid, authenticating again");
            let fresh = self.auth.reauthenticate(token.access_token()).await?;
            response = self.send(method, &url, body, fresh.access_token()).await?;
        }

        if response.is_ok() {
            return Ok(Answer::Response(response));
        }
        let error_code = self.raise_errors(method, &url, &response)?;
        Ok(Answer::AlreadyDeleted { error_code })
    }

    /// Like [`execute`](Self::execute), for requests that always have a response.
    pub async fn request(
        &self,
        method: RequestMethod,
        path: &str,
        body: Option<&JsonValue>,
    ) -> Result<Response> {
        self.execute(method, path, body)
            .await?
            .ok_or_else(|| Error::internal(format!("{method} {path} returned no response")))
    }

    /// `request` followed by JSON decoding of the body.
    pub(crate) async fn request_json<T: DeserializeOwned>(
        &self,
        method: RequestMethod,
        path: &str,
        body: Option<&JsonValue>,
    ) -> Result<T> {
        let response = self.request(method, path, body).await?;
        Ok(serde_json::from_str(response.text())?)
    }

    async fn send(
        &self,
        method: RequestMethod,
        url: &str,
        body: Option<&JsonValue>,
        access_token: &str,
    ) -> Result<Response> {
        let mut request = RequestBuilder::new(method, url).bearer_auth(access_token);
        if let Some(body) = body {
            request = request.json_value(body.clone());
        }
        debug!(%method, url, "Sending request");
        let response = self.transport.send(request).await?;
        debug!(status = response.status(), "Received response");
        Ok(response)
    }

    /// Turn a non-success response into an error.
    ///
    /// A DELETE answered with 404 and one of the configured no-op error
    /// codes is not an error: the record is already gone, and the code is
    /// returned.
    pub(crate) fn raise_errors<R: HttpResponse>(
        &self,
        method: RequestMethod,
        url: &str,
        response: &R,
    ) -> Result<String> {
        let status = response.status();
        let envelope = parse_error_envelope(response.text());

        if let Some(envelope) = envelope {
            if status == 404
                && method == RequestMethod::Delete
                && self.config.is_noop_delete_code(&envelope.error_code)
            {
                warn!(
                    error_code = %envelope.error_code,
                    url,
                    "Record to delete does not exist, ignoring"
                );
                return Ok(envelope.error_code);
            }
        }

        let mut err = Error::from(error_from_response(response));
        if let ErrorKind::Salesforce {
            ref error_code,
            ref mut message,
            ..
        } = err.kind
        {
            if REQUEST_CONTEXT_CODES.contains(&error_code.as_str()) {
                message.push_str(&format!(" ({method} {url})"));
            }
        }
        Err(err)
    }
}

fn is_invalid_session(response: &Response) -> bool {
    parse_error_envelope(response.text()).is_some_and(|e| e.error_code == INVALID_SESSION_ID)
}
