//! Core HTTP client: one attempt per call, buffered responses.

use futures::future::BoxFuture;
use tracing::{debug, info, instrument};

use crate::config::ClientConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::request::{RequestBuilder, RequestMethod};
use crate::response::{HttpResponse, Response};

/// Something that can carry a request to Salesforce and bring back the
/// buffered response.
///
/// Non-success statuses are returned as responses, not errors; deciding
/// what a 401 or 404 means is up to the caller. Transport failures
/// (timeouts, refused connections) are errors.
pub trait HttpTransport: Send + Sync + std::fmt::Debug {
    /// Send one request.
    fn send(&self, request: RequestBuilder) -> BoxFuture<'_, Result<Response>>;
}

/// HTTP client for Salesforce APIs backed by a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct SfHttpClient {
    inner: reqwest::Client,
    config: ClientConfig,
}

impl SfHttpClient {
    /// Create a new HTTP client.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .user_agent(&config.user_agent)
            .gzip(config.accept_compressed)
            .deflate(config.accept_compressed)
            .build()
            .map_err(|e| Error::with_source(ErrorKind::Config(e.to_string()), e))?;

        Ok(Self { inner, config })
    }

    /// Create a new HTTP client with default configuration.
    pub fn default_client() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Create a GET request builder.
    pub fn get(&self, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(RequestMethod::Get, url)
    }

    /// Create a POST request builder.
    pub fn post(&self, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(RequestMethod::Post, url)
    }

    /// Create a PATCH request builder.
    pub fn patch(&self, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(RequestMethod::Patch, url)
    }

    /// Create a DELETE request builder.
    pub fn delete(&self, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(RequestMethod::Delete, url)
    }

    /// Execute a single request. There is no retry at this layer.
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn execute(&self, request: RequestBuilder) -> Result<Response> {
        let mut req = self
            .inner
            .request(request.method.to_reqwest(), &request.url);

        if let Some(ref token) = request.bearer_token {
            req = req.bearer_auth(token);
        }

        for (name, value) in &request.headers {
            req = req.header(name.as_str(), value.as_str());
        }

        if !request.query_params.is_empty() {
            req = req.query(&request.query_params);
        }

        if let Some(ref body) = request.body {
            req = req.body(body.to_string());
        }

        if self.config.enable_tracing {
            debug!(
                method = %request.method,
                url = %request.url,
                body = request.body.is_some(),
                "Sending request"
            );
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::with_source(
                    ErrorKind::Timeout {
                        url: request.url.clone(),
                    },
                    e,
                )
            } else {
                Error::from(e)
            }
        })?;

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                Error::with_source(
                    ErrorKind::Timeout {
                        url: request.url.clone(),
                    },
                    e,
                )
            } else {
                Error::from(e)
            }
        })?;
        let response = Response::new(status, headers, body);

        if self.config.enable_tracing {
            if response.is_ok() {
                debug!(status, content_length = response.text().len(), "Response received");
            } else {
                info!(status, content_length = response.text().len(), "Non-success response");
            }
        }

        Ok(response)
    }
}

impl HttpTransport for SfHttpClient {
    fn send(&self, request: RequestBuilder) -> BoxFuture<'_, Result<Response>> {
        Box::pin(self.execute(request))
    }
}
