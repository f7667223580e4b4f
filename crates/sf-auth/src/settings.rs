//! Login settings for the password grant.
//!
//! Secrets are redacted in Debug output.

use crate::error::{Error, ErrorKind, Result};
use crate::PRODUCTION_LOGIN_URL;

/// Everything needed to log in with the OAuth username-password flow.
#[derive(Clone)]
pub struct ConnectionSettings {
    host: String,
    consumer_key: String,
    consumer_secret: String,
    username: String,
    password: String,
}

impl std::fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("host", &self.host)
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &"[REDACTED]")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl ConnectionSettings {
    /// Create settings for the production login host.
    pub fn new(
        consumer_key: impl Into<String>,
        consumer_secret: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: PRODUCTION_LOGIN_URL.to_string(),
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// Use a different login host (sandbox, My Domain, or a test server).
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into().trim_end_matches('/').to_string();
        self
    }

    /// Load settings from environment variables.
    ///
    /// Reads `SF_HOST` (optional, defaults to the production login URL),
    /// `SF_CONSUMER_KEY`, `SF_CONSUMER_SECRET`, `SF_USERNAME` and `SF_PASSWORD`.
    pub fn from_env() -> Result<Self> {
        fn required(name: &str) -> Result<String> {
            std::env::var(name).map_err(|_| Error::new(ErrorKind::EnvVar(name.to_string())))
        }

        let mut settings = Self::new(
            required("SF_CONSUMER_KEY")?,
            required("SF_CONSUMER_SECRET")?,
            required("SF_USERNAME")?,
            required("SF_PASSWORD")?,
        );
        if let Ok(host) = std::env::var("SF_HOST") {
            settings = settings.with_host(host);
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Check that the settings can be used for a login attempt.
    pub fn validate(&self) -> Result<()> {
        let parsed = url::Url::parse(&self.host)?;
        if parsed.scheme() != "https" && parsed.scheme() != "http" {
            return Err(Error::new(ErrorKind::Config(format!(
                "login host must be an http(s) URL, got '{}'",
                self.host
            ))));
        }
        if self.consumer_key.is_empty() || self.username.is_empty() {
            return Err(Error::new(ErrorKind::InvalidCredentials(
                "consumer key and username are required".to_string(),
            )));
        }
        Ok(())
    }

    /// Login host, without a trailing slash.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The token endpoint on the login host.
    pub fn token_url(&self) -> String {
        format!("{}/services/oauth2/token", self.host)
    }

    /// Connected app consumer key.
    pub fn consumer_key(&self) -> &str {
        &self.consumer_key
    }

    pub(crate) fn consumer_secret(&self) -> &str {
        &self.consumer_secret
    }

    /// Login username.
    pub fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }
}
