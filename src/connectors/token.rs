//! Credential retrieval for the stream handshake.
//!
//! The token is opaque: it is fetched from a JSON endpoint and passed through
//! to the connect frame. Every failure degrades to "no token".

use reqwest::Client;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// JSON pointer of the token inside the credential response.
pub const TOKEN_POINTER: &str = "/data/main/centrifugeToken";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("HTTP client setup failed: {0}")]
    Client(reqwest::Error),

    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Credential endpoint returned status {0}")]
    Status(u16),

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Token missing at {0}")]
    MissingToken(&'static str),
}

/// Source of the short-lived stream credential.
pub trait TokenSource: Send + Sync {
    /// Returns a token, or `None` when none could be obtained.
    fn fetch_token(&self) -> impl Future<Output = Option<String>> + Send;
}

/// Fetches the token with one HTTP GET.
#[derive(Clone)]
pub struct HttpTokenSource {
    client: Client,
    url: String,
}

impl HttpTokenSource {
    pub fn new(url: impl Into<String>) -> Result<Self, TokenError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(TokenError::Client)?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Performs the request and extracts the token.
    pub async fn fetch(&self) -> Result<String, TokenError> {
        let response = self.client.get(&self.url).send().await?;

        if !response.status().is_success() {
            return Err(TokenError::Status(response.status().as_u16()));
        }

        let body = response.text().await?;
        let json: Value =
            serde_json::from_str(&body).map_err(|e| TokenError::ParseError(e.to_string()))?;

        extract_token(&json).ok_or(TokenError::MissingToken(TOKEN_POINTER))
    }
}

impl TokenSource for HttpTokenSource {
    async fn fetch_token(&self) -> Option<String> {
        match self.fetch().await {
            Ok(token) => {
                debug!("Fetched stream token ({} chars)", token.len());
                Some(token)
            }
            Err(e) => {
                warn!("Token fetch from {} failed: {}", self.url, e);
                None
            }
        }
    }
}

impl std::fmt::Debug for HttpTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTokenSource")
            .field("url", &self.url)
            .finish()
    }
}

/// Fixed token, for tests and offline runs.
#[derive(Clone, Default)]
pub struct StaticToken(pub Option<String>);

impl TokenSource for StaticToken {
    async fn fetch_token(&self) -> Option<String> {
        self.0.clone()
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StaticToken")
            .field(&self.0.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Reads the token string at `TOKEN_POINTER`; empty strings count as absent.
pub fn extract_token(body: &Value) -> Option<String> {
    body.pointer(TOKEN_POINTER)
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}
