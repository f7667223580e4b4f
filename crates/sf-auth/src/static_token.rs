//! Externally supplied tokens.

use futures::future::BoxFuture;

use crate::error::{Error, ErrorKind, Result};
use crate::provider::Authenticator;
use crate::token::AuthToken;

/// An access token obtained elsewhere, e.g. by a web login or the `sf` CLI.
///
/// It is used as-is and cannot be refreshed; when the server reports the
/// session as invalid the error reaches the caller.
#[derive(Clone)]
pub struct StaticTokenAuth {
    token: AuthToken,
}

impl std::fmt::Debug for StaticTokenAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenAuth")
            .field("token", &self.token)
            .finish()
    }
}

impl StaticTokenAuth {
    /// Wrap a token and its instance URL.
    pub fn new(access_token: impl Into<String>, instance_url: impl Into<String>) -> Self {
        Self {
            token: AuthToken::new(access_token, instance_url),
        }
    }

    /// Load from `SF_ACCESS_TOKEN` and `SF_INSTANCE_URL`.
    pub fn from_env() -> Result<Self> {
        let access_token = std::env::var("SF_ACCESS_TOKEN")
            .map_err(|_| Error::new(ErrorKind::EnvVar("SF_ACCESS_TOKEN".to_string())))?;
        let instance_url = std::env::var("SF_INSTANCE_URL")
            .map_err(|_| Error::new(ErrorKind::EnvVar("SF_INSTANCE_URL".to_string())))?;
        Ok(Self::new(access_token, instance_url))
    }
}

impl Authenticator for StaticTokenAuth {
    fn authenticate(&self) -> BoxFuture<'_, Result<AuthToken>> {
        let token = self.token.clone();
        Box::pin(async move {
            if !token.is_valid() {
                return Err(Error::new(ErrorKind::InvalidCredentials(
                    "access token and instance URL are required".to_string(),
                )));
            }
            Ok(token)
        })
    }

    fn can_reauthenticate(&self) -> bool {
        false
    }
}
