//! Best-effort favicon caching. URLs are fetched once, converted to inline
//! data URLs so they cross origin boundaries safely on the wire, and any
//! failure resolves to a fixed placeholder instead of an error.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use dashmap::DashMap;
use std::time::Duration;

use crate::error::TrackerError;

/// Neutral gray dot, served whenever a fetch fails.
pub const PLACEHOLDER_ICON: &str = "data:image/svg+xml;base64,PHN2ZyB4bWxucz0iaHR0cDovL3d3dy53My5vcmcvMjAwMC9zdmciIHZpZXdCb3g9IjAgMCAxNiAxNiI+PGNpcmNsZSBjeD0iOCIgY3k9IjgiIHI9IjciIGZpbGw9IiM5YWEwYTYiLz48L3N2Zz4=";

const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

pub struct FaviconCache {
    client: reqwest::Client,
    cache: DashMap<String, String>,
}

impl Default for FaviconCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FaviconCache {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            cache: DashMap::new(),
        }
    }

    /// Resolve a favicon URL to a data URL. Never fails: network errors,
    /// CORS-ish rejections and 404s all come back as the placeholder, and
    /// the result (placeholder included) is cached by URL.
    pub async fn data_url(&self, url: &str) -> String {
        if url.starts_with("data:") {
            return url.to_owned();
        }
        if let Some(hit) = self.cache.get(url) {
            return hit.clone();
        }

        let resolved = match self.fetch(url).await {
            Ok(data_url) => data_url,
            Err(e) => {
                tracing::debug!(url, error = %e, "favicon fetch failed, using placeholder");
                PLACEHOLDER_ICON.to_owned()
            }
        };
        self.cache.insert(url.to_owned(), resolved.clone());
        resolved
    }

    async fn fetch(&self, url: &str) -> Result<String, TrackerError> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/png")
            .to_owned();
        let bytes = response.bytes().await?;
        Ok(format!("data:{};base64,{}", content_type, BASE64.encode(&bytes)))
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
