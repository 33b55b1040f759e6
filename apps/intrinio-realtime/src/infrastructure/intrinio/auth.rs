//! Feed Authentication
//!
//! Fetches bearer tokens from the feed's HTTP auth endpoint.
//!
//! # Authentication Flow
//!
//! 1. `GET <scheme>://<host>:<port>/auth` with HTTP Basic credentials and
//!    `Accept: application/json`
//! 2. A 2xx response body is the token, verbatim
//! 3. The token is passed as the `token` query parameter of the socket URL
//!
//! # Error Codes
//!
//! - 401: invalid credentials, surfaced as [`AuthError::Unauthorized`]
//! - any other non-2xx: [`AuthError::ServerError`]

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};

use crate::application::ports::{AuthError, Token, TokenProvider};
use crate::infrastructure::config::{ClientConfig, Credentials};

/// Token provider backed by the feed's HTTP auth endpoint.
#[derive(Debug)]
pub struct HttpTokenProvider {
    client: Client,
    auth_url: String,
    credentials: Credentials,
    current: RwLock<Option<Token>>,
}

impl HttpTokenProvider {
    /// Create a provider for `auth_url`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Request`] if the HTTP client cannot be built.
    pub fn new(
        auth_url: impl Into<String>,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Request(e.to_string()))?;

        Ok(Self {
            client,
            auth_url: auth_url.into(),
            credentials,
            current: RwLock::new(None),
        })
    }

    /// Create a provider from client configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Request`] if the HTTP client cannot be built.
    pub fn from_config(config: &ClientConfig) -> Result<Self, AuthError> {
        Self::new(
            config.endpoint.auth_url(),
            config.credentials.clone(),
            config.http_timeout,
        )
    }

    /// The last token successfully fetched, if any.
    #[must_use]
    pub fn current_token(&self) -> Option<Token> {
        self.current.read().clone()
    }
}

#[async_trait]
impl TokenProvider for HttpTokenProvider {
    async fn fetch_token(&self) -> Result<Token, AuthError> {
        tracing::debug!(url = %self.auth_url, "Requesting auth token");

        let response = self
            .client
            .get(&self.auth_url)
            .basic_auth(self.credentials.username(), Some(self.credentials.password()))
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            tracing::error!("Auth endpoint rejected credentials");
            return Err(AuthError::Unauthorized);
        }
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Auth endpoint returned an error");
            return Err(AuthError::ServerError(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;

        let token = Token::new(body);
        *self.current.write() = Some(token.clone());

        tracing::info!("Auth token acquired");
        Ok(token)
    }
}
