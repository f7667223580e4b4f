//! Per-alias token cache shared by all cursors of a connection.
//!
//! Each alias owns one slot holding an async mutex around the cached
//! [`AuthToken`]. The first caller that finds the slot empty performs the
//! login while holding the lock; every other caller waiting on the same
//! lock then sees the published token instead of logging in again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use tracing::{debug, info, instrument};

use crate::error::{Error, ErrorKind, Result};
use crate::token::AuthToken;

/// A way of obtaining an [`AuthToken`].
pub trait Authenticator: Send + Sync + std::fmt::Debug {
    /// Perform one authentication round-trip.
    fn authenticate(&self) -> BoxFuture<'_, Result<AuthToken>>;

    /// Whether [`authenticate`](Self::authenticate) can yield a different
    /// token than before. Fixed tokens cannot be refreshed.
    fn can_reauthenticate(&self) -> bool {
        true
    }
}

struct AuthSlot {
    authenticator: Arc<dyn Authenticator>,
    token: tokio::sync::Mutex<Option<AuthToken>>,
}

impl std::fmt::Debug for AuthSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSlot")
            .field("authenticator", &self.authenticator)
            .finish_non_exhaustive()
    }
}

/// Registry of token slots keyed by connection alias.
///
/// Construct one per process (or per test) and hand out [`AuthHandle`]s.
#[derive(Debug, Default)]
pub struct AuthenticationProvider {
    slots: Mutex<HashMap<String, Arc<AuthSlot>>>,
}

impl AuthenticationProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the authenticator for `alias` and return its handle.
    ///
    /// Registering an alias again replaces the authenticator and drops the
    /// cached token; handles obtained earlier keep the old slot.
    pub fn register(
        &self,
        alias: impl Into<String>,
        authenticator: Arc<dyn Authenticator>,
    ) -> AuthHandle {
        let alias = alias.into();
        let slot = Arc::new(AuthSlot {
            authenticator,
            token: tokio::sync::Mutex::new(None),
        });
        self.lock_slots().insert(alias.clone(), Arc::clone(&slot));
        AuthHandle {
            alias: alias.into(),
            slot,
        }
    }

    /// The handle for a registered alias.
    pub fn handle(&self, alias: &str) -> Result<AuthHandle> {
        self.lock_slots()
            .get(alias)
            .map(|slot| AuthHandle {
                alias: alias.into(),
                slot: Arc::clone(slot),
            })
            .ok_or_else(|| Error::new(ErrorKind::UnknownAlias(alias.to_string())))
    }

    /// Registered aliases, sorted.
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.lock_slots().keys().cloned().collect();
        aliases.sort();
        aliases
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<AuthSlot>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cheap, clonable access to one alias's token slot.
#[derive(Debug, Clone)]
pub struct AuthHandle {
    alias: Arc<str>,
    slot: Arc<AuthSlot>,
}

impl AuthHandle {
    /// Create a handle that is not part of any provider.
    pub fn standalone(alias: impl Into<String>, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            alias: alias.into().into(),
            slot: Arc::new(AuthSlot {
                authenticator,
                token: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// The connection alias.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// The cached token, authenticating first if there is none.
    #[instrument(skip(self), fields(alias = %self.alias))]
    pub async fn token(&self) -> Result<AuthToken> {
        let mut cached = self.slot.token.lock().await;
        if let Some(ref token) = *cached {
            return Ok(token.clone());
        }
        debug!("No cached token, authenticating");
        let token = self.slot.authenticator.authenticate().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// The cached token, without authenticating.
    pub async fn cached(&self) -> Option<AuthToken> {
        self.slot.token.lock().await.clone()
    }

    /// Drop the cached token; the next [`token`](Self::token) call logs in again.
    pub async fn forget(&self) {
        *self.slot.token.lock().await = None;
    }

    /// Replace a token the server reported as invalid.
    ///
    /// When another caller already replaced `stale_access_token`, the newer
    /// cached token is returned without another round-trip.
    #[instrument(skip(self, stale_access_token), fields(alias = %self.alias))]
    pub async fn reauthenticate(&self, stale_access_token: &str) -> Result<AuthToken> {
        if !self.slot.authenticator.can_reauthenticate() {
            return Err(Error::new(ErrorKind::CannotReauthenticate(
                self.alias.to_string(),
            )));
        }

        let mut cached = self.slot.token.lock().await;
        if let Some(ref token) = *cached {
            if token.access_token() != stale_access_token {
                debug!("Token already refreshed by another caller");
                return Ok(token.clone());
            }
        }

        info!("Re-authenticating after invalid session");
        *cached = None;
        let token = self.slot.authenticator.authenticate().await?;
        *cached = Some(token.clone());
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::static_token::StaticTokenAuth;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct CountingAuth {
        calls: AtomicU32,
    }

    impl Authenticator for CountingAuth {
        fn authenticate(&self) -> BoxFuture<'_, Result<AuthToken>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(AuthToken::new(format!("token-{n}"), "https://na1.salesforce.com"))
            })
        }
    }

    #[tokio::test]
    async fn test_token_is_cached() {
        let auth = Arc::new(CountingAuth::default());
        let handle = AuthHandle::standalone("default", auth.clone());

        assert!(handle.cached().await.is_none());
        assert_eq!(handle.token().await.unwrap().access_token(), "token-1");
        assert_eq!(handle.token().await.unwrap().access_token(), "token-1");
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_authenticate_once() {
        let auth = Arc::new(CountingAuth::default());
        let provider = AuthenticationProvider::new();
        provider.register("default", auth.clone());

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let handle = provider.handle("default").unwrap();
            tasks.push(tokio::spawn(async move { handle.token().await }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().access_token(), "token-1");
        }
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_forget_forces_new_login() {
        let auth = Arc::new(CountingAuth::default());
        let handle = AuthHandle::standalone("default", auth.clone());

        handle.token().await.unwrap();
        handle.forget().await;
        assert_eq!(handle.token().await.unwrap().access_token(), "token-2");
    }

    #[tokio::test]
    async fn test_reauthenticate_is_coalesced() {
        let auth = Arc::new(CountingAuth::default());
        let handle = AuthHandle::standalone("default", auth.clone());
        let stale = handle.token().await.unwrap();

        let (a, b) = tokio::join!(
            handle.reauthenticate(stale.access_token()),
            handle.reauthenticate(stale.access_token())
        );
        assert_eq!(a.unwrap().access_token(), "token-2");
        assert_eq!(b.unwrap().access_token(), "token-2");
        assert_eq!(auth.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_static_token_cannot_reauthenticate() {
        let handle = AuthHandle::standalone(
            "external",
            Arc::new(StaticTokenAuth::new("tok", "https://na1.salesforce.com")),
        );
        assert_eq!(handle.token().await.unwrap().access_token(), "tok");
        let err = handle.reauthenticate("tok").await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::CannotReauthenticate(ref a) if a == "external"));
    }

    #[test]
    fn test_unknown_alias() {
        let provider = AuthenticationProvider::new();
        provider.register("b", Arc::new(CountingAuth::default()));
        provider.register("a", Arc::new(CountingAuth::default()));
        assert_eq!(provider.aliases(), vec!["a", "b"]);
        let err = provider.handle("missing").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnknownAlias(_)));
    }

    #[tokio::test]
    async fn test_providers_are_isolated() {
        let first = AuthenticationProvider::new();
        let second = AuthenticationProvider::new();
        first.register("default", Arc::new(CountingAuth::default()));
        assert!(second.handle("default").is_err());
    }
}
