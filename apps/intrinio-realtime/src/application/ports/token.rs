//! Auth token port.

use async_trait::async_trait;

/// Errors that can occur while fetching an auth token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The auth endpoint rejected the credentials (HTTP 401).
    #[error("unauthorized: invalid username or password")]
    Unauthorized,

    /// The auth endpoint answered with a non-success status.
    #[error("auth server error: HTTP {0}")]
    ServerError(u16),

    /// The request never produced a response.
    #[error("auth request failed: {0}")]
    Request(String),
}

/// Opaque bearer token used to open the feed socket.
///
/// The `Debug` implementation redacts the value for safe logging.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    /// Wrap a raw token value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw token value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Token").field(&"[REDACTED]").finish()
    }
}

/// Source of bearer tokens.
///
/// Implementations perform a single request per call and never retry; the
/// connection manager's self-heal logic owns retries.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenProvider: Send + Sync + 'static {
    /// Fetch a fresh token.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] when the endpoint rejects the request or is
    /// unreachable.
    async fn fetch_token(&self) -> Result<Token, AuthError>;
}
