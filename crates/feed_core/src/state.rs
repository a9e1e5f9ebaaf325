//! Pagination state and the pure reducer that drives it.
//!
//! The controller never edits [`FeedState`] field by field. It asks [`FeedState::plan`]
//! whether a cycle may start and feeds every step of that cycle through [`reduce`].

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{domain::Post, protocol::PostPage};

use crate::error::FetchFailed;

/// How a response decides that no further pages exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionRule {
    /// `total < take` and nothing else.
    ReportedTotal,
    /// `total < take`, or the page came back shorter than `take`.
    ///
    /// A server that returns a short page in the middle of a result set ends the
    /// feed early under this rule.
    #[default]
    ShortPage,
}

impl ExhaustionRule {
    pub fn is_last_page(self, page: &PostPage) -> bool {
        let take = u64::from(page.take);
        let reported = page.total < take;
        match self {
            Self::ReportedTotal => reported,
            Self::ShortPage => reported || (page.data.len() as u64) < take,
        }
    }
}

impl FromStr for ExhaustionRule {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "reported_total" => Ok(Self::ReportedTotal),
            "short_page" => Ok(Self::ShortPage),
            other => Err(format!(
                "unknown exhaustion rule '{other}' (expected reported_total or short_page)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleKind {
    /// First page of a session, issued at mount.
    Initial,
    LoadMore,
    /// Pull-to-refresh.
    Refresh,
    /// "Reload feed" from the end-of-feed footer.
    Reset,
}

impl CycleKind {
    /// Reload cycles start a new paging session at page 1.
    pub fn is_reload(self) -> bool {
        !matches!(self, Self::LoadMore)
    }

    fn shows_refresh_indicator(self) -> bool {
        matches!(self, Self::Refresh | Self::Reset)
    }

    /// Ordering used when several reloads pile up behind one in-flight cycle.
    pub(crate) fn reload_rank(self) -> u8 {
        match self {
            Self::LoadMore => 0,
            Self::Refresh => 1,
            Self::Reset => 2,
            Self::Initial => 3,
        }
    }
}

impl fmt::Display for CycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initial => "initial",
            Self::LoadMore => "load_more",
            Self::Refresh => "refresh",
            Self::Reset => "reset",
        };
        f.write_str(name)
    }
}

/// A fetch the state machine has agreed to issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub kind: CycleKind,
    pub page: u32,
    pub until: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum FeedTransition {
    Started { request: PageRequest },
    Loaded { request: PageRequest, page: PostPage },
    Failed { request: PageRequest, failure: FetchFailed },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedState {
    cursor_page: u32,
    cursor_date: Option<DateTime<Utc>>,
    posts: Vec<Post>,
    is_loading: bool,
    is_refreshing: bool,
    is_exhausted: bool,
    last_error: Option<FetchFailed>,
    exhaustion_rule: ExhaustionRule,
    /// The session a reload replaced, kept until the reload's page lands.
    replaced: Option<Session>,
}

#[derive(Debug, Clone, PartialEq)]
struct Session {
    cursor_page: u32,
    cursor_date: DateTime<Utc>,
    posts: Vec<Post>,
    is_exhausted: bool,
}

impl Default for FeedState {
    fn default() -> Self {
        Self::new(ExhaustionRule::default())
    }
}

impl FeedState {
    pub fn new(exhaustion_rule: ExhaustionRule) -> Self {
        Self {
            cursor_page: 1,
            cursor_date: None,
            posts: Vec::new(),
            is_loading: false,
            is_refreshing: false,
            is_exhausted: false,
            last_error: None,
            exhaustion_rule,
            replaced: None,
        }
    }

    pub fn cursor_page(&self) -> u32 {
        self.cursor_page
    }

    /// `None` until the first session starts.
    pub fn cursor_date(&self) -> Option<DateTime<Utc>> {
        self.cursor_date
    }

    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn is_refreshing(&self) -> bool {
        self.is_refreshing
    }

    pub fn is_exhausted(&self) -> bool {
        self.is_exhausted
    }

    pub fn last_error(&self) -> Option<&FetchFailed> {
        self.last_error.as_ref()
    }

    pub fn exhaustion_rule(&self) -> ExhaustionRule {
        self.exhaustion_rule
    }

    pub fn is_busy(&self) -> bool {
        self.is_loading || self.is_refreshing
    }

    /// Decides whether a cycle of `kind` may start right now.
    ///
    /// Returns `None` while another cycle is in flight. A `LoadMore` is also refused
    /// once the feed is exhausted or before any session has started. Reload kinds
    /// always request page 1 bounded by `now`.
    pub fn plan(&self, kind: CycleKind, now: DateTime<Utc>) -> Option<PageRequest> {
        if self.is_busy() {
            return None;
        }

        if kind.is_reload() {
            return Some(PageRequest {
                kind,
                page: 1,
                until: now,
            });
        }

        if self.is_exhausted {
            return None;
        }
        let until = self.cursor_date?;
        Some(PageRequest {
            kind,
            page: self.cursor_page,
            until,
        })
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            posts: self.posts.clone(),
            is_loading: self.is_loading,
            is_refreshing: self.is_refreshing,
            is_exhausted: self.is_exhausted,
            last_error: self.last_error.clone(),
        }
    }
}

pub fn reduce(mut state: FeedState, transition: FeedTransition) -> FeedState {
    match transition {
        FeedTransition::Started { request } => {
            state.is_loading = true;
            if request.kind.is_reload() {
                let posts = std::mem::take(&mut state.posts);
                state.replaced = state.cursor_date.map(|cursor_date| Session {
                    cursor_page: state.cursor_page,
                    cursor_date,
                    posts,
                    is_exhausted: state.is_exhausted,
                });
                state.cursor_page = 1;
                state.cursor_date = Some(request.until);
                state.is_refreshing = request.kind.shows_refresh_indicator();
                // A plain refresh keeps the end-of-feed marker until page 1 says otherwise.
                if request.kind != CycleKind::Refresh {
                    state.is_exhausted = false;
                }
            }
        }
        FeedTransition::Loaded { request, page } => {
            let last_page = state.exhaustion_rule.is_last_page(&page);
            if request.kind.is_reload() {
                state.posts = page.data;
                state.is_exhausted = last_page;
            } else {
                state.posts.extend(page.data);
                state.is_exhausted = state.is_exhausted || last_page;
            }
            state.cursor_page = request.page.saturating_add(1);
            state.is_loading = false;
            state.is_refreshing = false;
            state.last_error = None;
            state.replaced = None;
        }
        FeedTransition::Failed { request, failure } => {
            // A failed reload puts the previous session back. Without one (the first
            // load) the new date stays, so scrolling retries page 1.
            if request.kind.is_reload() {
                if let Some(session) = state.replaced.take() {
                    state.cursor_page = session.cursor_page;
                    state.cursor_date = Some(session.cursor_date);
                    state.posts = session.posts;
                    state.is_exhausted = session.is_exhausted;
                }
            }
            state.is_loading = false;
            state.is_refreshing = false;
            state.last_error = Some(failure);
        }
    }
    state
}

/// What the footer under the list should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFooter {
    Hidden,
    /// A placeholder while a page is loading.
    Loading,
    /// The feed ended without a single post.
    NoPosts,
    /// The reader scrolled through a non-empty feed to its end.
    EndOfFeed,
}

/// Read-only view handed to observers after every transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedSnapshot {
    pub posts: Vec<Post>,
    pub is_loading: bool,
    pub is_refreshing: bool,
    pub is_exhausted: bool,
    pub last_error: Option<FetchFailed>,
}

impl FeedSnapshot {
    pub fn footer(&self) -> FeedFooter {
        if self.is_loading {
            FeedFooter::Loading
        } else if !self.is_exhausted {
            FeedFooter::Hidden
        } else if self.posts.is_empty() {
            FeedFooter::NoPosts
        } else {
            FeedFooter::EndOfFeed
        }
    }
}

#[cfg(test)]
#[path = "tests/state_tests.rs"]
mod tests;
