use std::{collections::HashSet, path::Path, sync::Arc};

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use shared::{
    domain::{Post, PostAuthor},
    error::{ApiError, ErrorCode},
    protocol::{PageQuery, PostPage},
};
use tokio::sync::RwLock;

pub const MAX_TAKE: u32 = 100;

#[derive(Clone)]
pub struct ApiContext {
    pub store: PostStore,
    pub auth_tokens: Arc<HashSet<String>>,
    pub default_take: u32,
}

/// In-memory post list kept newest first. Posts without a creation time sort last
/// and are never hidden by the date bound.
#[derive(Clone, Default)]
pub struct PostStore {
    posts: Arc<RwLock<Vec<Post>>>,
}

impl PostStore {
    pub fn new(mut posts: Vec<Post>) -> Self {
        posts.sort_by(|a, b| b.create_at.cmp(&a.create_at).then(b.id.cmp(&a.id)));
        Self {
            posts: Arc::new(RwLock::new(posts)),
        }
    }

    /// `count` posts, one every `spacing`, the newest created at `newest`. Dates
    /// that would fall before the representable range clamp to its start.
    pub fn generate(count: u32, newest: DateTime<Utc>, spacing: Duration) -> Self {
        let posts = (0..count)
            .map(|offset| {
                let id = i64::from(count - offset);
                let created = i32::try_from(offset)
                    .ok()
                    .and_then(|steps| spacing.checked_mul(steps))
                    .and_then(|back| newest.checked_sub_signed(back))
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                let mut post = Post::new(id);
                post.slug = format!("post-{id}");
                post.title = format!("Post #{id}");
                post.content = format!("Generated post number {id}.");
                post.create_at = Some(created);
                post.update_at = Some(created);
                post.author = PostAuthor {
                    name: format!("author-{}", id % 7),
                    image: String::new(),
                };
                post
            })
            .collect();
        Self::new(posts)
    }

    pub async fn load_json(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read seed file '{}'", path.display()))?;
        let posts: Vec<Post> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse seed file '{}'", path.display()))?;
        Ok(Self::new(posts))
    }

    pub async fn len(&self) -> usize {
        self.posts.read().await.len()
    }

    /// Page `page` (1-based) of the posts created at or before `until`. `total`
    /// counts every post inside that bound.
    pub async fn page(&self, page: u32, take: u32, until: DateTime<Utc>) -> PostPage {
        let posts = self.posts.read().await;
        let visible: Vec<&Post> = posts
            .iter()
            .filter(|post| post.create_at.map_or(true, |created| created <= until))
            .collect();
        let skip = (page.saturating_sub(1) as usize).saturating_mul(take as usize);
        PostPage {
            page,
            take,
            total: visible.len() as u64,
            data: visible
                .into_iter()
                .skip(skip)
                .take(take as usize)
                .cloned()
                .collect(),
        }
    }
}

pub fn authorize(ctx: &ApiContext, bearer: Option<&str>) -> Result<(), ApiError> {
    let Some(token) = bearer.map(str::trim).filter(|token| !token.is_empty()) else {
        return Err(ApiError::new(ErrorCode::Unauthorized, "missing bearer token"));
    };
    if ctx.auth_tokens.is_empty() || ctx.auth_tokens.contains(token) {
        Ok(())
    } else {
        Err(ApiError::new(ErrorCode::Unauthorized, "unknown bearer token"))
    }
}

pub async fn list_posts(
    ctx: &ApiContext,
    bearer: Option<&str>,
    query: &PageQuery,
) -> Result<PostPage, ApiError> {
    authorize(ctx, bearer)?;

    if query.page == 0 {
        return Err(ApiError::new(ErrorCode::Validation, "page starts at 1"));
    }
    let take = query.take.unwrap_or(ctx.default_take);
    if take == 0 || take > MAX_TAKE {
        return Err(ApiError::new(
            ErrorCode::Validation,
            format!("take must be between 1 and {MAX_TAKE}"),
        ));
    }
    let until = query
        .until()
        .ok_or_else(|| ApiError::new(ErrorCode::Validation, "date is out of range"))?;

    Ok(ctx.store.page(query.page, take, until).await)
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
