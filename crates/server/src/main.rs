use std::{collections::HashSet, net::SocketAddr, sync::Arc};

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use chrono::{Duration, Utc};
use shared::{
    error::{ApiError, ErrorCode},
    protocol::{PageQuery, PostPage, POSTS_ROUTE},
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod app_state;
mod config;

use api::{list_posts, ApiContext, PostStore};
use app_state::AppState;
use config::load_settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = load_settings()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&settings.log_filter))
        .init();

    let store = match &settings.seed_file {
        Some(path) => PostStore::load_json(path).await.map_err(|error| {
            error!(path = %path.display(), %error, "failed to load seed posts");
            error
        })?,
        None => PostStore::generate(settings.seed_count, Utc::now(), Duration::minutes(7)),
    };
    info!(posts = store.len().await, "post store ready");

    if settings.auth_tokens.is_empty() {
        warn!("no auth tokens configured; any bearer token is accepted");
    }

    let api = ApiContext {
        store,
        auth_tokens: Arc::new(settings.auth_tokens.iter().cloned().collect::<HashSet<_>>()),
        default_take: settings.default_take,
    };
    let app = build_router(Arc::new(AppState { api }));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "feed server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(POSTS_ROUTE, get(http_list_posts))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn http_list_posts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<PageQuery>,
) -> Result<Json<PostPage>, (StatusCode, Json<ApiError>)> {
    let page = list_posts(&state.api, bearer_token(&headers), &q)
        .await
        .map_err(|e| {
            warn!(page = q.page, code = ?e.code, message = %e.message, "posts request rejected");
            (status_for(e.code), Json(e))
        })?;
    info!(
        page = page.page,
        take = page.take,
        total = page.total,
        returned = page.data.len(),
        "served posts page"
    );
    Ok(Json(page))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
