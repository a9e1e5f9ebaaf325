use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use shared::{
    domain::AuthToken,
    protocol::{PageQuery, PostPage, POSTS_ROUTE},
};
use url::Url;

pub mod controller;
pub mod error;
pub mod observer;
pub mod state;

pub use controller::{FeedController, FeedTrigger};
pub use error::{FeedError, FetchFailed};
pub use observer::{BroadcastObserver, FeedEvent, FeedObserver, NoopObserver};
pub use state::{
    reduce, CycleKind, ExhaustionRule, FeedFooter, FeedSnapshot, FeedState, FeedTransition,
    PageRequest,
};

pub const MAX_PAGE_SIZE: u32 = 100;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Paged access to the post service. `until` bounds the whole paging session so
/// pages stay stable while new posts arrive.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, page: u32, until: DateTime<Utc>, token: &AuthToken)
        -> Result<PostPage>;
}

pub struct MissingPageFetcher;

#[async_trait]
impl PageFetcher for MissingPageFetcher {
    async fn fetch_page(
        &self,
        page: u32,
        _until: DateTime<Utc>,
        _token: &AuthToken,
    ) -> Result<PostPage> {
        Err(anyhow!("post service unavailable for page {page}"))
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// [`PageFetcher`] over the post service's `GET /posts` endpoint.
pub struct HttpPageFetcher {
    http: Client,
    server_url: String,
    page_size: Option<u32>,
}

impl HttpPageFetcher {
    pub fn new(server_url: &str) -> std::result::Result<Self, FeedError> {
        Self::with_options(server_url, None, DEFAULT_REQUEST_TIMEOUT)
    }

    /// `page_size` is forwarded as `take`; `None` lets the server pick.
    pub fn with_options(
        server_url: &str,
        page_size: Option<u32>,
        timeout: Duration,
    ) -> std::result::Result<Self, FeedError> {
        let parsed = Url::parse(server_url).map_err(|source| FeedError::InvalidServerUrl {
            url: server_url.to_string(),
            source,
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FeedError::UnsupportedScheme(server_url.to_string()));
        }
        if let Some(size) = page_size {
            if size == 0 || size > MAX_PAGE_SIZE {
                return Err(FeedError::InvalidPageSize(size));
            }
        }

        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            server_url: server_url.trim_end_matches('/').to_string(),
            page_size,
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_page(
        &self,
        page: u32,
        until: DateTime<Utc>,
        token: &AuthToken,
    ) -> Result<PostPage> {
        let query = PageQuery::new(page, until, self.page_size);
        let body: PostPage = self
            .http
            .get(format!("{}{POSTS_ROUTE}", self.server_url))
            .bearer_auth(token.as_str())
            .query(&query)
            .send()
            .await
            .with_context(|| format!("failed to request feed page {page}"))?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("failed to decode feed page {page}"))?;
        Ok(body)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
