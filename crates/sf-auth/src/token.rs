//! The cached credential for one connection alias.

use chrono::{DateTime, Utc};

/// An access token together with the instance it is valid for.
///
/// The access token is redacted in Debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    access_token: String,
    instance_url: String,
    issued_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("access_token", &"[REDACTED]")
            .field("instance_url", &self.instance_url)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

impl AuthToken {
    /// Create a token. A trailing slash on the instance URL is dropped.
    pub fn new(access_token: impl Into<String>, instance_url: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            instance_url: instance_url.into().trim_end_matches('/').to_string(),
            issued_at: None,
        }
    }

    /// Set the issue time.
    pub fn with_issued_at(mut self, issued_at: DateTime<Utc>) -> Self {
        self.issued_at = Some(issued_at);
        self
    }

    /// The bearer token.
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Base URL of the organization, e.g. `https://na1.salesforce.com`.
    pub fn instance_url(&self) -> &str {
        &self.instance_url
    }

    /// When the server issued the token, if known.
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.issued_at
    }

    /// Returns true if the token and instance URL are both present.
    pub fn is_valid(&self) -> bool {
        !self.access_token.is_empty() && !self.instance_url.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_is_dropped() {
        let token = AuthToken::new("tok", "https://na1.salesforce.com/");
        assert_eq!(token.instance_url(), "https://na1.salesforce.com");
        assert!(token.is_valid());
        assert!(!AuthToken::new("", "https://na1.salesforce.com").is_valid());
    }

    #[test]
    fn test_debug_redacts_token() {
        let token = AuthToken::new("00D000000000001!secret", "https://na1.salesforce.com");
        let debug = format!("{:?}", token);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("secret"));
    }
}
