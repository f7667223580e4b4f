//! Helpers shared by the unit tests of this crate.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use busbar_sf_auth::{AuthHandle, AuthToken, Authenticator};
use busbar_sf_client::SfHttpClient;
use futures::future::BoxFuture;
use serde_json::Value as JsonValue;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::config::DatabaseConfig;
use crate::connection::SalesforceConnection;

/// Issues `token-1`, `token-2`, ... for a fixed instance URL.
#[derive(Debug)]
pub(crate) struct CountingAuth {
    instance_url: String,
    calls: AtomicU32,
    delay: Duration,
}

impl CountingAuth {
    pub(crate) fn new(instance_url: impl Into<String>) -> Self {
        Self {
            instance_url: instance_url.into(),
            calls: AtomicU32::new(0),
            delay: Duration::ZERO,
        }
    }

    /// Wait `delay` before answering each login.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Authenticator for CountingAuth {
    fn authenticate(&self) -> BoxFuture<'_, busbar_sf_auth::Result<AuthToken>> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(AuthToken::new(format!("token-{n}"), self.instance_url.clone()))
        })
    }
}

/// A connection whose instance URL is the mock server.
pub(crate) fn connection(
    server: &MockServer,
    config: DatabaseConfig,
) -> (Arc<SalesforceConnection>, Arc<CountingAuth>) {
    let auth = Arc::new(CountingAuth::new(server.uri()));
    let transport = Arc::new(SfHttpClient::default_client().unwrap());
    let handle = AuthHandle::standalone(config.alias.clone(), auth.clone());
    (
        Arc::new(SalesforceConnection::new(config, transport, handle)),
        auth,
    )
}

/// Answer `verb path` with a JSON body.
pub(crate) async fn mount_json(
    server: &MockServer,
    verb: &str,
    at: &str,
    status: u16,
    body: JsonValue,
) {
    Mock::given(method(verb))
        .and(path(at))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(server)
        .await;
}
