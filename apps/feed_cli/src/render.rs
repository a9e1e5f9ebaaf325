//! Plain-text rendering of feed snapshots.

use feed_core::{FeedFooter, FeedSnapshot};
use shared::domain::Post;

pub const END_OF_FEED: &str = "Oops! You scrolled so far that you reached the end of the feed.";
pub const NO_POSTS: &str = "Oops! No posts were found.";
pub const RELOAD_HINT: &str = "Type `reload` to update the feed.";

/// Prints each post once and the footer only when it changes.
#[derive(Debug, Default)]
pub struct FeedPrinter {
    shown: usize,
    footer: Option<FeedFooter>,
    refreshing: bool,
}

impl FeedPrinter {
    pub fn scroll_to_top(&mut self) -> Vec<String> {
        vec!["-- top of feed --".to_string()]
    }

    pub fn update(&mut self, snapshot: &FeedSnapshot) -> Vec<String> {
        let mut lines = Vec::new();

        if snapshot.is_refreshing && !self.refreshing {
            lines.push("-- refreshing --".to_string());
        }
        self.refreshing = snapshot.is_refreshing;

        if snapshot.posts.len() < self.shown {
            self.shown = 0;
        }
        for post in &snapshot.posts[self.shown..] {
            lines.push(post_line(post));
        }
        self.shown = snapshot.posts.len();

        let footer = snapshot.footer();
        if self.footer != Some(footer) {
            match footer {
                FeedFooter::Hidden => {}
                FeedFooter::Loading => lines.push("loading...".to_string()),
                FeedFooter::NoPosts => {
                    lines.push(NO_POSTS.to_string());
                    lines.push(RELOAD_HINT.to_string());
                }
                FeedFooter::EndOfFeed => {
                    lines.push(END_OF_FEED.to_string());
                    lines.push(RELOAD_HINT.to_string());
                }
            }
            self.footer = Some(footer);
        }

        if !snapshot.is_loading {
            if let Some(failure) = &snapshot.last_error {
                lines.push(format!("(could not load the feed: {failure})"));
            }
        }

        lines
    }
}

pub fn post_line(post: &Post) -> String {
    let author = if post.author.name.is_empty() {
        "unknown"
    } else {
        post.author.name.as_str()
    };
    let when = post
        .create_at
        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    let mut line = format!("#{:<6} {when}  {author}: {}", post.id.0, post.title);
    if post.liked {
        line.push_str(" [liked]");
    }
    if post.saved {
        line.push_str(" [saved]");
    }
    line
}

#[cfg(test)]
#[path = "tests/render_tests.rs"]
mod tests;
