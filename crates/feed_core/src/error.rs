use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::state::CycleKind;

/// Errors raised while wiring the feed up. Fetch failures never surface here;
/// the controller records them as [`FetchFailed`] instead.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("invalid feed server url '{url}': {source}")]
    InvalidServerUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("feed server url '{0}' must use http or https")]
    UnsupportedScheme(String),
    #[error("page size must be between 1 and 100, got {0}")]
    InvalidPageSize(u32),
    #[error("failed to build http client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// The one failure kind the feed knows about. Network, decode and authorization
/// problems all collapse into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{kind} fetch of page {page} failed: {message}")]
pub struct FetchFailed {
    pub kind: CycleKind,
    pub page: u32,
    pub message: String,
    pub at: DateTime<Utc>,
}
