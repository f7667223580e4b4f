//! Process-wide table of open connections, keyed by alias.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use busbar_sf_auth::{AuthenticationProvider, Authenticator};
use busbar_sf_client::{HttpTransport, SfHttpClient};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::DatabaseConfig;
use crate::connection::SalesforceConnection;
use crate::cursor::Cursor;
use crate::error::{Error, Result};

type Slot = Arc<OnceCell<Arc<SalesforceConnection>>>;

/// Open connections and the token slots behind them.
///
/// Connecting an alias twice returns the connection opened first, so every
/// cursor of an alias shares one token. Concurrent connects of one alias
/// wait on the same slot and log in once.
#[derive(Debug, Default)]
pub struct Connections {
    provider: Arc<AuthenticationProvider>,
    connections: Mutex<HashMap<String, Slot>>,
}

impl Connections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share token slots with an existing provider.
    pub fn with_provider(provider: Arc<AuthenticationProvider>) -> Self {
        Self {
            provider,
            connections: Mutex::default(),
        }
    }

    pub fn provider(&self) -> &Arc<AuthenticationProvider> {
        &self.provider
    }

    /// Open the connection for `config.alias`, or return the open one.
    pub async fn connect(
        &self,
        config: DatabaseConfig,
        authenticator: Arc<dyn Authenticator>,
    ) -> Result<Arc<SalesforceConnection>> {
        if let Some(existing) = self.lookup(&config.alias) {
            return Ok(existing);
        }
        let transport = Arc::new(SfHttpClient::new(config.client.clone())?);
        self.connect_with_transport(config, transport, authenticator)
            .await
    }

    /// Like [`connect`](Self::connect), over a caller-supplied transport.
    ///
    /// A failed open leaves the alias unconnected; the next call retries.
    pub async fn connect_with_transport(
        &self,
        config: DatabaseConfig,
        transport: Arc<dyn HttpTransport>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Result<Arc<SalesforceConnection>> {
        let slot = self.slot(&config.alias);
        let connection = slot
            .get_or_try_init(|| async {
                let alias = config.alias.clone();
                let auth = self.provider.register(alias.clone(), authenticator);
                let connection = Arc::new(SalesforceConnection::new(config, transport, auth));
                connection.open().await?;
                debug!(alias = %alias, "Connection registered");
                Ok::<_, Error>(connection)
            })
            .await?;
        Ok(Arc::clone(connection))
    }

    /// The open connection for `alias`.
    pub fn get(&self, alias: &str) -> Result<Arc<SalesforceConnection>> {
        self.lookup(alias)
            .ok_or_else(|| Error::interface(format!("No connection for alias {alias:?}")))
    }

    /// A new cursor on the connection for `alias`.
    pub fn cursor(&self, alias: &str) -> Result<Cursor> {
        Ok(self.get(alias)?.cursor())
    }

    /// Open aliases, sorted.
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(alias, _)| alias.clone())
            .collect();
        aliases.sort();
        aliases
    }

    fn lookup(&self, alias: &str) -> Option<Arc<SalesforceConnection>> {
        self.lock().get(alias).and_then(|slot| slot.get().cloned())
    }

    fn slot(&self, alias: &str) -> Slot {
        Arc::clone(self.lock().entry(alias.to_string()).or_default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_support::CountingAuth;
    use busbar_sf_auth::AuthToken;
    use futures::future::BoxFuture;
    use std::time::Duration;
    use wiremock::MockServer;

    #[derive(Debug)]
    struct FailingAuth;

    impl Authenticator for FailingAuth {
        fn authenticate(&self) -> BoxFuture<'_, busbar_sf_auth::Result<AuthToken>> {
            Box::pin(async {
                Err(busbar_sf_auth::Error::new(
                    busbar_sf_auth::ErrorKind::InvalidCredentials("rejected".to_string()),
                ))
            })
        }
    }

    #[tokio::test]
    async fn test_connect_once_per_alias() {
        let server = MockServer::start().await;
        let connections = Connections::new();
        let auth = Arc::new(CountingAuth::new(server.uri()));

        let first = connections
            .connect(DatabaseConfig::builder("prod").lazy_connect(false).build(), auth.clone())
            .await
            .unwrap();
        let second = connections
            .connect(DatabaseConfig::builder("prod").lazy_connect(false).build(), auth.clone())
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(auth.calls(), 1);
        assert_eq!(connections.aliases(), ["prod"]);
        assert_eq!(connections.provider().aliases(), ["prod"]);
    }

    #[tokio::test]
    async fn test_concurrent_connects_share_one_login() {
        let server = MockServer::start().await;
        let connections = Connections::new();
        let auth = Arc::new(CountingAuth::new(server.uri()).with_delay(Duration::from_millis(50)));
        let config = || DatabaseConfig::builder("prod").lazy_connect(false).build();

        let (first, second) = tokio::join!(
            connections.connect(config(), auth.clone()),
            connections.connect(config(), auth.clone()),
        );
        let (first, second) = (first.unwrap(), second.unwrap());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(auth.calls(), 1);

        // The provider slot is the one the live connection reads.
        let handle = connections.provider().handle("prod").unwrap();
        assert_eq!(handle.cached().await.unwrap().access_token(), "token-1");
        handle.forget().await;
        assert_eq!(first.auth().token().await.unwrap().access_token(), "token-2");
        assert_eq!(auth.calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_open_can_be_retried() {
        let connections = Connections::new();
        let config = || DatabaseConfig::builder("prod").lazy_connect(false).build();
        let err = connections
            .connect(config(), Arc::new(FailingAuth))
            .await
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Authentication(_)));
        assert!(connections.aliases().is_empty());

        let server = MockServer::start().await;
        let auth = Arc::new(CountingAuth::new(server.uri()));
        connections.connect(config(), auth.clone()).await.unwrap();
        assert_eq!(auth.calls(), 1);
        assert_eq!(connections.aliases(), ["prod"]);
    }

    #[tokio::test]
    async fn test_unknown_alias() {
        let connections = Connections::new();
        let err = connections.cursor("missing").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Interface(_)));
    }

    #[tokio::test]
    async fn test_cursor_uses_connection_row_type() {
        let server = MockServer::start().await;
        let connections = Connections::new();
        let config = DatabaseConfig::builder("sandbox")
            .row_type(busbar_sf_soql::RowType::Dict)
            .build();
        connections
            .connect(config, Arc::new(CountingAuth::new(server.uri())))
            .await
            .unwrap();
        let cursor = connections.cursor("sandbox").unwrap();
        assert_eq!(cursor.row_type(), busbar_sf_soql::RowType::Dict);
        assert_eq!(cursor.connection().alias(), "sandbox");
    }
}
