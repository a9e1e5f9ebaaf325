use std::sync::Arc;

use shared::domain::AuthToken;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    error::FetchFailed,
    observer::FeedObserver,
    state::{reduce, CycleKind, ExhaustionRule, FeedSnapshot, FeedState, FeedTransition, PageRequest},
    Clock, PageFetcher, SystemClock,
};

/// The four things a feed view can ask for.
#[derive(Debug, Clone)]
pub enum FeedTrigger {
    Mount(Option<AuthToken>),
    ScrollNearEnd,
    PullToRefresh,
    ReloadTap,
}

struct ControllerInner {
    state: FeedState,
    token: Option<AuthToken>,
    pending_reload: Option<CycleKind>,
}

impl ControllerInner {
    fn apply(&mut self, transition: FeedTransition) {
        let state = std::mem::take(&mut self.state);
        self.state = reduce(state, transition);
    }

    fn queue_reload(&mut self, kind: CycleKind) {
        let merged = match self.pending_reload {
            Some(current) if current.reload_rank() >= kind.reload_rank() => current,
            _ => kind,
        };
        self.pending_reload = Some(merged);
    }

    /// Starts a cycle if the state machine allows it. Reloads refused because
    /// another cycle is in flight are parked in `pending_reload`.
    fn try_start(&mut self, kind: CycleKind, clock: &dyn Clock) -> Option<Cycle> {
        let Some(token) = self.token.clone() else {
            debug!(%kind, "no feed session yet; trigger ignored");
            return None;
        };

        match self.state.plan(kind, clock.now()) {
            Some(request) => {
                self.apply(FeedTransition::Started { request });
                Some(Cycle { request, token })
            }
            None if kind.is_reload() && self.state.is_busy() => {
                self.queue_reload(kind);
                debug!(%kind, "feed busy; reload queued behind in-flight cycle");
                None
            }
            None => {
                debug!(
                    %kind,
                    busy = self.state.is_busy(),
                    exhausted = self.state.is_exhausted(),
                    "feed trigger dropped"
                );
                None
            }
        }
    }
}

struct Cycle {
    request: PageRequest,
    token: AuthToken,
}

/// Owns the paging state of one feed view and serializes every fetch through
/// the busy guard: at most one page request is in flight at any time.
pub struct FeedController {
    core: Arc<ControllerCore>,
}

struct ControllerCore {
    fetcher: Arc<dyn PageFetcher>,
    observer: Arc<dyn FeedObserver>,
    clock: Arc<dyn Clock>,
    inner: Mutex<ControllerInner>,
}

impl FeedController {
    pub fn new(fetcher: Arc<dyn PageFetcher>, observer: Arc<dyn FeedObserver>) -> Self {
        Self::new_with_dependencies(
            fetcher,
            observer,
            Arc::new(SystemClock),
            ExhaustionRule::default(),
        )
    }

    pub fn new_with_dependencies(
        fetcher: Arc<dyn PageFetcher>,
        observer: Arc<dyn FeedObserver>,
        clock: Arc<dyn Clock>,
        exhaustion_rule: ExhaustionRule,
    ) -> Self {
        Self {
            core: Arc::new(ControllerCore {
                fetcher,
                observer,
                clock,
                inner: Mutex::new(ControllerInner {
                    state: FeedState::new(exhaustion_rule),
                    token: None,
                    pending_reload: None,
                }),
            }),
        }
    }

    pub async fn state(&self) -> FeedState {
        self.core.inner.lock().await.state.clone()
    }

    pub async fn snapshot(&self) -> FeedSnapshot {
        self.core.inner.lock().await.state.snapshot()
    }

    pub async fn handle(&self, trigger: FeedTrigger) {
        match trigger {
            FeedTrigger::Mount(token) => self.initialize(token).await,
            FeedTrigger::ScrollNearEnd => {
                if self.core.inner.lock().await.state.is_exhausted() {
                    debug!("end of feed reached; scroll trigger ignored");
                    return;
                }
                self.load_more().await;
            }
            FeedTrigger::PullToRefresh => self.refresh().await,
            FeedTrigger::ReloadTap => self.reset_and_reload().await,
        }
    }

    /// Starts a session with `token`. Without a token the feed stays idle.
    pub async fn initialize(&self, token: Option<AuthToken>) {
        let Some(token) = token else {
            debug!("feed mounted without auth token; staying idle");
            return;
        };
        self.core.inner.lock().await.token = Some(token);
        self.run(CycleKind::Initial).await;
    }

    /// Appends the next page. Silently does nothing while busy or exhausted.
    pub async fn load_more(&self) {
        self.run(CycleKind::LoadMore).await;
    }

    pub async fn refresh(&self) {
        self.run(CycleKind::Refresh).await;
    }

    pub async fn reset_and_reload(&self) {
        self.core.observer.on_scroll_to_top();
        self.run(CycleKind::Reset).await;
    }

    async fn run(&self, kind: CycleKind) {
        let (cycle, snapshot) = {
            let mut inner = self.core.inner.lock().await;
            let Some(cycle) = inner.try_start(kind, self.core.clock.as_ref()) else {
                return;
            };
            let snapshot = inner.state.snapshot();
            (cycle, snapshot)
        };
        self.core.observer.on_snapshot(&snapshot);

        // The cycle settles on its own task, so dropping this future cannot leave
        // the busy guard set.
        let core = Arc::clone(&self.core);
        if let Err(error) = tokio::spawn(async move { core.drive(cycle).await }).await {
            warn!(%error, "feed cycle task ended abnormally");
        }
    }
}

impl ControllerCore {
    async fn drive(&self, mut cycle: Cycle) {
        loop {
            let outcome = self
                .fetcher
                .fetch_page(cycle.request.page, cycle.request.until, &cycle.token)
                .await;
            match self.complete(cycle, outcome).await {
                Some(next) => cycle = next,
                None => break,
            }
        }
    }

    /// Merges one fetch outcome and, under the same lock, starts the queued
    /// reload if there is one.
    async fn complete(
        &self,
        cycle: Cycle,
        outcome: anyhow::Result<shared::protocol::PostPage>,
    ) -> Option<Cycle> {
        let request = cycle.request;
        let (settled, next) = {
            let mut inner = self.inner.lock().await;
            match outcome {
                Ok(page) => {
                    if page.page != request.page {
                        warn!(
                            requested = request.page,
                            served = page.page,
                            "feed server answered with a different page number"
                        );
                    }
                    let received = page.data.len();
                    inner.apply(FeedTransition::Loaded { request, page });
                    info!(
                        kind = %request.kind,
                        page = request.page,
                        received,
                        total_posts = inner.state.posts().len(),
                        exhausted = inner.state.is_exhausted(),
                        "feed page merged"
                    );
                }
                Err(error) => {
                    warn!(
                        kind = %request.kind,
                        page = request.page,
                        error = %error,
                        "feed page fetch failed; state left retryable"
                    );
                    let failure = FetchFailed {
                        kind: request.kind,
                        page: request.page,
                        message: format!("{error:#}"),
                        at: self.clock.now(),
                    };
                    inner.apply(FeedTransition::Failed { request, failure });
                }
            }
            let settled = inner.state.snapshot();

            let next = match inner.pending_reload.take() {
                Some(kind) => inner
                    .try_start(kind, self.clock.as_ref())
                    .map(|next| (next, inner.state.snapshot())),
                None => None,
            };
            (settled, next)
        };

        self.observer.on_snapshot(&settled);
        let (next, started) = next?;
        debug!(kind = %next.request.kind, "running queued reload");
        self.observer.on_snapshot(&started);
        Some(next)
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
