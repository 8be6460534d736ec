//! Remote endpoint abstractions.
//!
//! The engine talks to exactly two HTTP surfaces: the favorites store
//! ([`FavoritesApi`]) and the tile image source (see `tiles`). Both are
//! traits so tests can inject mocks, with `reqwest`-backed implementations
//! for production use.
//!
//! Error classification follows HTTP status classes: a 4xx response is a
//! [`RemoteError::Rejected`] and is never retried; everything else
//! (timeouts, connection failures, 5xx) is [`RemoteError::Transient`] and
//! drives retry backoff in the mutation queue.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Boxed future type for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors from remote operations.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// Network-level or server-side failure; safe to retry with backoff.
    #[error("transient network failure: {0}")]
    Transient(String),

    /// The server rejected the request (4xx); retrying cannot succeed.
    #[error("rejected by server (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
}

impl RemoteError {
    /// Whether retrying this operation could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }

    /// Classify an HTTP status code into the error taxonomy.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        if (400..500).contains(&status) {
            RemoteError::Rejected {
                status,
                message: message.into(),
            }
        } else {
            RemoteError::Transient(format!("HTTP {}: {}", status, message.into()))
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => RemoteError::from_status(status.as_u16(), e.to_string()),
            None => RemoteError::Transient(e.to_string()),
        }
    }
}

/// A favorite location as the remote store represents it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFavorite {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
    pub modified_at: DateTime<Utc>,
}

/// Remote favorites store.
///
/// The three operations the ledger needs: push one record, delete one
/// record, fetch the full set for the authenticated owner.
pub trait FavoritesApi: Send + Sync {
    /// Create or replace a favorite on the remote store.
    fn push(&self, favorite: &RemoteFavorite) -> BoxFuture<'_, Result<(), RemoteError>>;

    /// Delete a favorite by id.
    fn delete<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), RemoteError>>;

    /// Fetch every favorite owned by the authenticated user.
    fn fetch_all(&self) -> BoxFuture<'_, Result<Vec<RemoteFavorite>, RemoteError>>;
}

/// `reqwest`-backed favorites client.
pub struct HttpFavoritesApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFavoritesApi {
    /// Creates a client against `base_url` (e.g. `https://api.example.com/v1`).
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Transient(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(RemoteError::from_status(status.as_u16(), message))
    }
}

impl FavoritesApi for HttpFavoritesApi {
    fn push(&self, favorite: &RemoteFavorite) -> BoxFuture<'_, Result<(), RemoteError>> {
        let url = self.url(&format!("favorites/{}", favorite.id));
        let request = self.client.put(&url).json(favorite);
        Box::pin(async move {
            debug!(url = %url, "pushing favorite");
            let response = request.send().await?;
            Self::check(response).await?;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), RemoteError>> {
        let url = self.url(&format!("favorites/{}", id));
        Box::pin(async move {
            debug!(url = %url, "deleting favorite");
            let response = self.client.delete(&url).send().await?;
            Self::check(response).await?;
            Ok(())
        })
    }

    fn fetch_all(&self) -> BoxFuture<'_, Result<Vec<RemoteFavorite>, RemoteError>> {
        let url = self.url("favorites");
        Box::pin(async move {
            debug!(url = %url, "fetching favorites");
            let response = self.client.get(&url).send().await?;
            let response = Self::check(response).await?;
            let records = response.json::<Vec<RemoteFavorite>>().await?;
            Ok(records)
        })
    }
}
