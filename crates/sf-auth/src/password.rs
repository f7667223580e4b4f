//! OAuth 2.0 username-password flow.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use base64::Engine;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use busbar_sf_client::{sanitize_error_message, ClientConfig};

use crate::error::{Error, ErrorKind, Result};
use crate::provider::Authenticator;
use crate::settings::ConnectionSettings;
use crate::token::AuthToken;

/// How long a rejected credential set is not tried again.
pub const FAILED_LOGIN_COOLDOWN: Duration = Duration::from_secs(300);

/// Logs in with `grant_type=password` against the connected app.
///
/// A credential set that was rejected is remembered (as a SHA-256
/// fingerprint, not in clear text) and refused locally for
/// [`FAILED_LOGIN_COOLDOWN`], so a misconfigured password cannot lock the
/// account through repeated attempts. Changing any credential clears this.
pub struct PasswordAuth {
    settings: ConnectionSettings,
    http_client: reqwest::Client,
    last_failure: Mutex<Option<FailedLogin>>,
}

#[derive(Debug, Clone, Copy)]
struct FailedLogin {
    fingerprint: [u8; 32],
    at: Instant,
}

impl std::fmt::Debug for PasswordAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordAuth")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl PasswordAuth {
    /// Create an authenticator with default transport timeouts.
    pub fn new(settings: ConnectionSettings) -> Result<Self> {
        Self::with_client_config(settings, &ClientConfig::default())
    }

    /// Create an authenticator using the timeouts and user agent of `config`,
    /// normally the `client` settings of the alias it logs in for.
    pub fn with_client_config(settings: ConnectionSettings, config: &ClientConfig) -> Result<Self> {
        settings.validate()?;
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| Error::with_source(ErrorKind::Config(e.to_string()), e))?;

        Ok(Self {
            settings,
            http_client,
            last_failure: Mutex::new(None),
        })
    }

    /// The settings this authenticator logs in with.
    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Perform the token request.
    ///
    /// Credentials are not logged.
    #[instrument(skip(self), fields(username = %self.settings.username(), host = %self.settings.host()))]
    pub async fn login(&self) -> Result<AuthToken> {
        let fingerprint = self.fingerprint();
        if let Some(failure) = *self.failure_slot() {
            if failure.fingerprint == fingerprint && failure.at.elapsed() < FAILED_LOGIN_COOLDOWN {
                return Err(Error::new(ErrorKind::RepeatedFailure {
                    username: self.settings.username().to_string(),
                    cooldown_secs: FAILED_LOGIN_COOLDOWN.as_secs(),
                }));
            }
        }

        let params = [
            ("grant_type", "password"),
            ("client_id", self.settings.consumer_key()),
            ("client_secret", self.settings.consumer_secret()),
            ("username", self.settings.username()),
            ("password", self.settings.password()),
        ];
        let body = serde_urlencoded::to_string(params)?;

        let response = self
            .http_client
            .post(self.settings.token_url())
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(match serde_json::from_str::<OAuthErrorResponse>(&text) {
                Ok(error) => {
                    warn!(error = %error.error, "Login rejected");
                    *self.failure_slot() = Some(FailedLogin {
                        fingerprint,
                        at: Instant::now(),
                    });
                    Error::new(ErrorKind::OAuth {
                        error: error.error,
                        description: sanitize_error_message(&error.error_description),
                    })
                }
                Err(_) => Error::new(ErrorKind::Http(format!(
                    "token endpoint returned {}: {}",
                    status.as_u16(),
                    sanitize_error_message(&text)
                ))),
            });
        }

        let token: TokenResponse = serde_json::from_str(&text)?;
        if let Some(ref signature) = token.signature {
            verify_signature(
                self.settings.consumer_secret(),
                token.id.as_deref().unwrap_or_default(),
                token.issued_at.as_deref().unwrap_or_default(),
                signature,
            )?;
        }

        *self.failure_slot() = None;
        info!(instance_url = %token.instance_url, "Logged in");
        Ok(token.into_auth_token())
    }

    fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for part in [
            self.settings.host(),
            self.settings.consumer_key(),
            self.settings.consumer_secret(),
            self.settings.username(),
            self.settings.password(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        let mut fingerprint = [0u8; 32];
        fingerprint.copy_from_slice(&hasher.finalize());
        fingerprint
    }

    fn failure_slot(&self) -> std::sync::MutexGuard<'_, Option<FailedLogin>> {
        self.last_failure
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Authenticator for PasswordAuth {
    fn authenticate(&self) -> BoxFuture<'_, Result<AuthToken>> {
        Box::pin(self.login())
    }
}

/// Check `signature == base64(HMAC-SHA256(consumer_secret, id + issued_at))`.
pub(crate) fn verify_signature(
    consumer_secret: &str,
    id: &str,
    issued_at: &str,
    signature: &str,
) -> Result<()> {
    let expected = base64::engine::general_purpose::STANDARD
        .decode(signature)
        .map_err(|_| Error::new(ErrorKind::InvalidSignature))?;
    let mut mac = Hmac::<Sha256>::new_from_slice(consumer_secret.as_bytes())
        .map_err(|_| Error::new(ErrorKind::InvalidSignature))?;
    mac.update(id.as_bytes());
    mac.update(issued_at.as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| Error::new(ErrorKind::InvalidSignature))
}

/// Token response from the OAuth token endpoint.
///
/// The access token and signature are redacted in Debug output.
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    /// Access token.
    pub access_token: String,
    /// Instance URL.
    pub instance_url: String,
    /// User ID URL.
    #[serde(default)]
    pub id: Option<String>,
    /// Token type (usually "Bearer").
    #[serde(default)]
    pub token_type: Option<String>,
    /// Signature for verification.
    #[serde(default)]
    pub signature: Option<String>,
    /// Issue time in milliseconds since the epoch, as a string.
    #[serde(default)]
    pub issued_at: Option<String>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("instance_url", &self.instance_url)
            .field("id", &self.id)
            .field("token_type", &self.token_type)
            .field("signature", &self.signature.as_ref().map(|_| "[REDACTED]"))
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

impl TokenResponse {
    /// Convert into the token cached per alias.
    pub fn into_auth_token(self) -> AuthToken {
        let issued_at: Option<DateTime<Utc>> = self
            .issued_at
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis);
        let token = AuthToken::new(self.access_token, self.instance_url);
        match issued_at {
            Some(at) => token.with_issued_at(at),
            None => token,
        }
    }
}

/// OAuth error response.
#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    #[serde(default)]
    error_description: String,
}
