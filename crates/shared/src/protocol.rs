use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Post;

pub const POSTS_ROUTE: &str = "/posts";

/// One page of the feed. `take` is the page size the server applied and `total`
/// counts every post inside the `date` bound, across all pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostPage {
    pub page: u32,
    pub take: u32,
    pub total: u64,
    pub data: Vec<Post>,
}

/// Query string of `GET /posts`. `date` is the session cursor in milliseconds
/// since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageQuery {
    pub page: u32,
    pub date: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take: Option<u32>,
}

impl PageQuery {
    pub fn new(page: u32, until: DateTime<Utc>, take: Option<u32>) -> Self {
        Self {
            page,
            date: until.timestamp_millis(),
            take,
        }
    }

    pub fn until(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.date).single()
    }
}
