//! HTTP access to the source site
//!
//! One `SiteClient` is built per run from the `[http]` config section and
//! handed to every component that talks to the network.

use std::time::Duration;

use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::archive::{CreatorData, CreatorDirectory, Http};

/// Error types for site requests
#[derive(Error, Debug)]
pub enum SiteError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Result type for site requests
pub type SiteResult<T> = Result<T, SiteError>;

#[derive(Debug, Clone)]
pub struct SiteClient {
    client: Client,
    base_url: Url,
}

impl SiteClient {
    /// Build the HTTP client from the `[http]` config section.
    pub fn new(config: &Http) -> SiteResult<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| SiteError::InvalidUrl(format!("{}: {}", config.base_url, e)))?;

        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .gzip(true)
            .build()?;

        Ok(Self { client, base_url })
    }

    /// The underlying reqwest client, shared with the artifact fetcher.
    pub fn http(&self) -> &Client {
        &self.client
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a site-relative or absolute reference against the base URL.
    pub fn resolve(&self, reference: &str) -> SiteResult<Url> {
        resolve_against(&self.base_url, reference)
    }

    pub fn creators_url(&self) -> SiteResult<Url> {
        self.resolve("/json/creators.json")
    }

    pub fn creator_data_url(&self, creator_id: u64) -> SiteResult<Url> {
        self.resolve(&format!("/{}.json", creator_id))
    }

    pub fn listing_page_url(&self, creator_id: u64, page: u32) -> SiteResult<Url> {
        let mut url = self.resolve(&format!("/patreon/{}", creator_id))?;
        url.query_pairs_mut().append_pair("p", &page.to_string());
        Ok(url)
    }

    /// GET a URL and fail on non-success status codes.
    pub async fn get(&self, url: Url) -> SiteResult<Response> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SiteError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> SiteResult<T> {
        let response = self.get(url.clone()).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|source| SiteError::Decode {
            url: url.to_string(),
            source,
        })
    }

    pub async fn get_text(&self, url: Url) -> SiteResult<String> {
        let response = self.get(url).await?;
        Ok(response.text().await?)
    }

    /// Fetch the full creator directory listing.
    #[instrument(skip(self))]
    pub async fn fetch_creator_directory(&self) -> SiteResult<CreatorDirectory> {
        let url = self.creators_url()?;
        debug!(%url, "Fetching creator directory");
        self.get_json(url).await
    }

    /// Fetch the posts and shared files for one creator.
    #[instrument(skip(self))]
    pub async fn fetch_creator_data(&self, creator_id: u64) -> SiteResult<CreatorData> {
        let url = self.creator_data_url(creator_id)?;
        debug!(%url, "Fetching creator metadata");
        self.get_json(url).await
    }

    /// Fetch one HTML listing page (1-based).
    #[instrument(skip(self))]
    pub async fn fetch_listing_page(&self, creator_id: u64, page: u32) -> SiteResult<String> {
        let url = self.listing_page_url(creator_id, page)?;
        debug!(%url, "Fetching listing page");
        self.get_text(url).await
    }
}

/// Join `reference` onto `base` so that `/a.png` and `a.png` both land directly
/// under the site root, while absolute URLs pass through unchanged.
pub fn resolve_against(base: &Url, reference: &str) -> SiteResult<Url> {
    let reference = reference.trim();
    let root = base
        .join("/")
        .map_err(|e| SiteError::InvalidUrl(format!("{}: {}", base, e)))?;
    let relative = if reference.contains("://") || reference.starts_with("//") || reference.starts_with('/') {
        reference.to_string()
    } else {
        format!("/{}", reference)
    };
    root.join(&relative)
        .map_err(|e| SiteError::InvalidUrl(format!("{}: {}", reference, e)))
}
