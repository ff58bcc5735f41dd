//! HTTP realization of the remote key-value blob store
//!
//! Talks to any endpoint exposing GET/PUT/DELETE on `{base}/{key}` with JSON
//! bodies. The server stores opaque blobs; all merge semantics stay client
//! side.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::error::{Error, Result};
use crate::util::{compact_text, normalize_text_option};

use super::blob::RemoteKv;

const HTTP_TIMEOUT_SECS: u64 = 10;

/// Remote key-value store over plain HTTP.
#[derive(Clone)]
pub struct HttpKvStore {
    base_url: String,
    client: reqwest::Client,
}

impl HttpKvStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self { base_url, client })
    }

    fn key_url(&self, key: &str) -> String {
        format!("{}/{key}", self.base_url)
    }

    async fn error_for(response: reqwest::Response) -> Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let class = if is_retryable_status(status.as_u16()) {
            "transient"
        } else {
            "permanent"
        };
        Error::Transport(format!(
            "{class} HTTP {} from remote store: {}",
            status.as_u16(),
            compact_text(&body)
        ))
    }
}

#[async_trait]
impl RemoteKv for HttpKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(self.key_url(key))
            .header("Accept", "application/json")
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }
        Ok(Some(response.text().await?))
    }

    async fn put(&self, key: &str, value: String) -> Result<()> {
        let response = self
            .client
            .put(self.key_url(key))
            .header("Content-Type", "application/json")
            .body(value)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let response = self.client.delete(self.key_url(key)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }
        Ok(())
    }
}

/// Whether retrying the same request later can plausibly succeed.
fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 409 | 423 | 425 | 429 | 500..=599)
}

fn normalize_base_url(raw: String) -> Result<String> {
    let url = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::InvalidInput("remote endpoint must not be empty".to_string()))?;
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "remote endpoint must include http:// or https://".to_string(),
        ))
    }
}
