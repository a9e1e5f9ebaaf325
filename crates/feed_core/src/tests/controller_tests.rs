use super::*;
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicI64, AtomicUsize, Ordering},
        Mutex as StdMutex,
    },
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use shared::{domain::Post, protocol::PostPage};
use tokio::sync::Notify;

use crate::{
    observer::{BroadcastObserver, FeedEvent, NoopObserver},
    state::FeedFooter,
    MissingPageFetcher,
};

#[derive(Debug, Clone, PartialEq)]
struct FetchCall {
    page: u32,
    until: DateTime<Utc>,
    token: String,
}

/// Holds one fetch open until the test releases it.
#[derive(Default)]
struct Gate {
    entered: Notify,
    release: Notify,
}

#[derive(Default)]
struct ScriptedFetcher {
    responses: StdMutex<VecDeque<Result<PostPage, String>>>,
    calls: StdMutex<Vec<FetchCall>>,
    gate: StdMutex<Option<Arc<Gate>>>,
}

impl ScriptedFetcher {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push_page(&self, page: PostPage) {
        self.responses.lock().unwrap().push_back(Ok(page));
    }

    fn push_failure(&self, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
    }

    /// Gates the next fetch only.
    fn arm_gate(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch_page(
        &self,
        page: u32,
        until: DateTime<Utc>,
        token: &AuthToken,
    ) -> anyhow::Result<PostPage> {
        self.calls.lock().unwrap().push(FetchCall {
            page,
            until,
            token: token.as_str().to_string(),
        });

        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(Ok(page)) => Ok(page),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no scripted response for page {page}")),
        }
    }
}

#[derive(Default)]
struct RecordingObserver {
    snapshots: StdMutex<Vec<FeedSnapshot>>,
    scroll_to_top: AtomicUsize,
}

impl RecordingObserver {
    fn snapshots(&self) -> Vec<FeedSnapshot> {
        self.snapshots.lock().unwrap().clone()
    }
}

impl FeedObserver for RecordingObserver {
    fn on_snapshot(&self, snapshot: &FeedSnapshot) {
        self.snapshots.lock().unwrap().push(snapshot.clone());
    }

    fn on_scroll_to_top(&self) {
        self.scroll_to_top.fetch_add(1, Ordering::SeqCst);
    }
}

/// Every call to `now` is one minute later than the previous one.
struct StepClock {
    next_minute: AtomicI64,
}

impl StepClock {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            next_minute: AtomicI64::new(0),
        })
    }
}

impl Clock for StepClock {
    fn now(&self) -> DateTime<Utc> {
        let minute = self.next_minute.fetch_add(1, Ordering::SeqCst);
        Utc.timestamp_opt(1_700_000_000 + minute * 60, 0).unwrap()
    }
}

struct Harness {
    controller: Arc<FeedController>,
    fetcher: Arc<ScriptedFetcher>,
    observer: Arc<RecordingObserver>,
}

fn harness() -> Harness {
    harness_with_rule(ExhaustionRule::default())
}

fn harness_with_rule(rule: ExhaustionRule) -> Harness {
    let fetcher = ScriptedFetcher::new();
    let observer = Arc::new(RecordingObserver::default());
    let controller = Arc::new(FeedController::new_with_dependencies(
        fetcher.clone(),
        observer.clone(),
        StepClock::new(),
        rule,
    ));
    Harness {
        controller,
        fetcher,
        observer,
    }
}

fn page(number: u32, take: u32, total: u64, ids: std::ops::RangeInclusive<i64>) -> PostPage {
    PostPage {
        page: number,
        take,
        total,
        data: ids.map(Post::new).collect(),
    }
}

fn token(raw: &str) -> Option<AuthToken> {
    AuthToken::new(raw)
}

fn post_ids(state: &FeedState) -> Vec<i64> {
    state.posts().iter().map(|post| post.id.0).collect()
}

#[tokio::test]
async fn mount_then_short_page_ends_the_feed() {
    let h = harness();
    h.fetcher.push_page(page(1, 10, 25, 1..=10));
    h.fetcher.push_page(page(2, 10, 25, 11..=15));

    h.controller.handle(FeedTrigger::Mount(token("t1"))).await;
    let state = h.controller.state().await;
    assert_eq!(post_ids(&state), (1..=10).collect::<Vec<_>>());
    assert_eq!(state.cursor_page(), 2);
    assert!(!state.is_exhausted());
    assert!(!state.is_loading());

    h.controller.handle(FeedTrigger::ScrollNearEnd).await;
    let state = h.controller.state().await;
    assert_eq!(state.posts().len(), 15);
    assert_eq!(state.cursor_page(), 3);
    assert!(state.is_exhausted());

    let calls = h.fetcher.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].token, "t1");
    assert_eq!(calls[1].page, 2);
    assert_eq!(calls[0].until, calls[1].until);
}

#[tokio::test]
async fn mount_without_token_stays_idle() {
    let h = harness();
    h.fetcher.push_page(page(1, 10, 25, 1..=10));

    h.controller.initialize(None).await;
    h.controller.initialize(AuthToken::new("   ")).await;
    h.controller.load_more().await;
    h.controller.refresh().await;

    assert!(h.fetcher.calls().is_empty());
    assert!(h.observer.snapshots().is_empty());
    let state = h.controller.state().await;
    assert_eq!(state.cursor_date(), None);
    assert!(!state.is_loading());
}

#[tokio::test]
async fn full_pages_advance_cursor_by_one_with_a_fixed_date() {
    let h = harness();
    h.fetcher.push_page(page(1, 2, 100, 1..=2));
    for (number, first) in [(2, 3), (3, 5), (4, 7)] {
        h.fetcher.push_page(page(number, 2, 100, first..=first + 1));
    }

    h.controller.initialize(token("t1")).await;
    let session_date = h.controller.state().await.cursor_date();
    assert!(session_date.is_some());

    for expected_cursor in 3..=5 {
        h.controller.load_more().await;
        let state = h.controller.state().await;
        assert_eq!(state.cursor_page(), expected_cursor);
        assert_eq!(state.cursor_date(), session_date);
    }

    let requested: Vec<u32> = h.fetcher.calls().iter().map(|call| call.page).collect();
    assert_eq!(requested, vec![1, 2, 3, 4]);
    assert_eq!(post_ids(&h.controller.state().await), (1..=8).collect::<Vec<_>>());
}

#[tokio::test]
async fn exhausted_feed_ignores_further_load_more() {
    let h = harness_with_rule(ExhaustionRule::ReportedTotal);
    h.fetcher.push_page(page(1, 10, 7, 1..=7));

    h.controller.initialize(token("t1")).await;
    assert!(h.controller.state().await.is_exhausted());

    h.controller.load_more().await;
    h.controller.handle(FeedTrigger::ScrollNearEnd).await;

    assert_eq!(h.fetcher.calls().len(), 1);
    let state = h.controller.state().await;
    assert!(state.is_exhausted());
    assert_eq!(state.cursor_page(), 2);
}

#[tokio::test]
async fn overlapping_load_more_issues_a_single_fetch() {
    let h = harness();
    h.fetcher.push_page(page(1, 2, 100, 1..=2));
    h.controller.initialize(token("t1")).await;

    h.fetcher.push_page(page(2, 2, 100, 3..=4));
    let gate = h.fetcher.arm_gate();
    let first = tokio::spawn({
        let controller = Arc::clone(&h.controller);
        async move { controller.load_more().await }
    });
    gate.entered.notified().await;

    h.controller.load_more().await;
    assert_eq!(h.fetcher.calls().len(), 2);
    assert!(h.controller.state().await.is_loading());

    gate.release.notify_one();
    first.await.expect("load task");

    let page_two_calls = h
        .fetcher
        .calls()
        .iter()
        .filter(|call| call.page == 2)
        .count();
    assert_eq!(page_two_calls, 1);
    let state = h.controller.state().await;
    assert_eq!(post_ids(&state), vec![1, 2, 3, 4]);
    assert_eq!(state.cursor_page(), 3);
}

#[tokio::test]
async fn refresh_replaces_while_load_more_appends() {
    let h = harness();
    h.fetcher.push_page(page(1, 2, 100, 1..=2));
    h.fetcher.push_page(page(2, 2, 100, 3..=4));
    h.fetcher.push_page(page(1, 2, 100, 5..=6));

    h.controller.initialize(token("t1")).await;
    let first_session = h.controller.state().await.cursor_date();

    h.controller.load_more().await;
    assert_eq!(post_ids(&h.controller.state().await), vec![1, 2, 3, 4]);

    h.controller.handle(FeedTrigger::PullToRefresh).await;
    let state = h.controller.state().await;
    assert_eq!(post_ids(&state), vec![5, 6]);
    assert_eq!(state.cursor_page(), 2);
    assert!(state.cursor_date() > first_session);
    assert!(!state.is_refreshing());
    assert!(!state.is_loading());

    let calls = h.fetcher.calls();
    assert_eq!(calls[2].page, 1);
    assert_eq!(Some(calls[2].until), state.cursor_date());
}

#[tokio::test]
async fn refresh_shows_indicator_and_empty_list_while_settling() {
    let h = harness();
    h.fetcher.push_page(page(1, 2, 100, 1..=2));
    h.controller.initialize(token("t1")).await;

    h.fetcher.push_page(page(1, 2, 100, 3..=4));
    h.controller.refresh().await;

    let snapshots = h.observer.snapshots();
    let refreshing = &snapshots[snapshots.len() - 2];
    assert!(refreshing.is_refreshing);
    assert!(refreshing.is_loading);
    assert!(refreshing.posts.is_empty());
    assert_eq!(refreshing.footer(), FeedFooter::Loading);

    let settled = snapshots.last().expect("settled snapshot");
    assert!(!settled.is_refreshing);
    assert_eq!(settled.posts.len(), 2);
}

#[tokio::test]
async fn failed_load_more_keeps_cursor_and_posts_retryable() {
    let h = harness();
    h.fetcher.push_page(page(1, 1, 100, 1..=1));
    h.fetcher.push_page(page(2, 1, 100, 2..=2));
    h.fetcher.push_failure("connection reset by peer");
    h.fetcher.push_page(page(3, 1, 100, 3..=3));

    h.controller.initialize(token("t1")).await;
    h.controller.load_more().await;
    let before = h.controller.state().await;
    assert_eq!(before.cursor_page(), 3);
    assert_eq!(post_ids(&before), vec![1, 2]);

    h.controller.load_more().await;
    let after = h.controller.state().await;
    assert_eq!(after.cursor_page(), 3);
    assert_eq!(post_ids(&after), vec![1, 2]);
    assert_eq!(after.cursor_date(), before.cursor_date());
    assert!(!after.is_loading());
    let failure = after.last_error().expect("failure recorded");
    assert_eq!(failure.kind, CycleKind::LoadMore);
    assert_eq!(failure.page, 3);
    assert!(failure.message.contains("connection reset"));

    h.controller.load_more().await;
    let retried = h.controller.state().await;
    assert_eq!(post_ids(&retried), vec![1, 2, 3]);
    assert!(retried.last_error().is_none());

    let calls = h.fetcher.calls();
    assert_eq!(calls[2].page, 3);
    assert_eq!(calls[3].page, 3);
    assert_eq!(calls[2].until, calls[3].until);
}

#[tokio::test]
async fn failed_initial_load_can_be_retried_by_scrolling() {
    let h = harness();
    h.fetcher.push_failure("401 unauthorized");
    h.fetcher.push_page(page(1, 10, 25, 1..=10));

    h.controller.initialize(token("t1")).await;
    let state = h.controller.state().await;
    assert!(!state.is_loading());
    assert!(state.posts().is_empty());
    assert_eq!(state.cursor_page(), 1);

    h.controller.handle(FeedTrigger::ScrollNearEnd).await;
    let state = h.controller.state().await;
    assert_eq!(state.posts().len(), 10);
    assert_eq!(state.cursor_page(), 2);
    let calls = h.fetcher.calls();
    assert_eq!(calls[0].until, calls[1].until);
}

#[tokio::test]
async fn failed_refresh_restores_the_feed_it_replaced() {
    let h = harness();
    h.fetcher.push_page(page(1, 2, 1, 1..=1));
    h.controller.initialize(token("t1")).await;
    let before = h.controller.state().await;
    assert!(before.is_exhausted());

    h.fetcher.push_failure("gateway timeout");
    h.controller.handle(FeedTrigger::PullToRefresh).await;

    let after = h.controller.state().await;
    assert_eq!(post_ids(&after), vec![1]);
    assert_eq!(after.cursor_page(), before.cursor_page());
    assert_eq!(after.cursor_date(), before.cursor_date());
    assert!(after.is_exhausted());
    assert!(!after.is_busy());
    assert_eq!(after.last_error().map(|e| e.kind), Some(CycleKind::Refresh));

    let settled = h.observer.snapshots().last().cloned().expect("settled snapshot");
    assert_eq!(settled.posts.len(), 1);
    assert_eq!(settled.footer(), FeedFooter::EndOfFeed);
}

#[tokio::test]
async fn failed_reload_tap_lets_scrolling_continue_the_old_session() {
    let h = harness();
    h.fetcher.push_page(page(1, 2, 100, 1..=2));
    h.controller.initialize(token("t1")).await;

    h.fetcher.push_failure("connection refused");
    h.controller.handle(FeedTrigger::ReloadTap).await;
    assert_eq!(h.observer.scroll_to_top.load(Ordering::SeqCst), 1);
    let state = h.controller.state().await;
    assert_eq!(post_ids(&state), vec![1, 2]);
    assert_eq!(state.cursor_page(), 2);
    assert_eq!(state.last_error().map(|e| e.kind), Some(CycleKind::Reset));

    h.fetcher.push_page(page(2, 2, 100, 3..=4));
    h.controller.handle(FeedTrigger::ScrollNearEnd).await;

    let calls = h.fetcher.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[2].page, 2);
    assert_eq!(calls[2].until, calls[0].until);
    let state = h.controller.state().await;
    assert_eq!(post_ids(&state), vec![1, 2, 3, 4]);
    assert!(state.last_error().is_none());
}

#[tokio::test]
async fn queued_refresh_runs_after_a_failed_load_more() {
    let h = harness();
    h.fetcher.push_page(page(1, 2, 100, 1..=2));
    h.controller.initialize(token("t1")).await;

    h.fetcher.push_failure("connection reset by peer");
    h.fetcher.push_page(page(1, 2, 100, 9..=10));
    let gate = h.fetcher.arm_gate();
    let load = tokio::spawn({
        let controller = Arc::clone(&h.controller);
        async move { controller.load_more().await }
    });
    gate.entered.notified().await;

    h.controller.refresh().await;
    assert_eq!(h.fetcher.calls().len(), 2);

    gate.release.notify_one();
    load.await.expect("load task");

    let calls = h.fetcher.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[2].page, 1);
    let state = h.controller.state().await;
    assert_eq!(post_ids(&state), vec![9, 10]);
    assert!(state.last_error().is_none());
    assert!(!state.is_busy());
}

#[tokio::test]
async fn dropping_a_pending_load_more_does_not_wedge_the_feed() {
    let h = harness();
    h.fetcher.push_page(page(1, 2, 100, 1..=2));
    h.controller.initialize(token("t1")).await;

    h.fetcher.push_page(page(2, 2, 100, 3..=4));
    h.fetcher.push_page(page(1, 2, 100, 9..=10));
    let gate = h.fetcher.arm_gate();
    let timed_out =
        tokio::time::timeout(Duration::from_millis(50), h.controller.load_more()).await;
    assert!(timed_out.is_err());
    gate.entered.notified().await;

    h.controller.refresh().await;
    gate.release.notify_one();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if h.fetcher.calls().len() == 3 && !h.controller.state().await.is_busy() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("feed settles after the caller gave up");

    let calls = h.fetcher.calls();
    assert_eq!(calls[1].page, 2);
    assert_eq!(calls[2].page, 1);
    let state = h.controller.state().await;
    assert_eq!(post_ids(&state), vec![9, 10]);
    assert_eq!(state.cursor_page(), 2);
}

#[tokio::test]
async fn reload_tap_clears_end_of_feed_and_scrolls_to_top() {
    let h = harness();
    h.fetcher.push_page(page(1, 10, 3, 1..=3));
    h.fetcher.push_page(page(1, 10, 30, 4..=13));

    h.controller.initialize(token("t1")).await;
    assert_eq!(h.controller.snapshot().await.footer(), FeedFooter::EndOfFeed);

    h.controller.handle(FeedTrigger::ReloadTap).await;
    assert_eq!(h.observer.scroll_to_top.load(Ordering::SeqCst), 1);

    let snapshots = h.observer.snapshots();
    let started = &snapshots[snapshots.len() - 2];
    assert!(!started.is_exhausted);
    assert!(started.posts.is_empty());
    assert!(started.is_refreshing);

    let state = h.controller.state().await;
    assert!(!state.is_exhausted());
    assert_eq!(state.posts().len(), 10);
    assert_eq!(state.cursor_page(), 2);
}

#[tokio::test]
async fn refresh_during_load_more_runs_after_it_completes() {
    let h = harness();
    h.fetcher.push_page(page(1, 2, 100, 1..=2));
    h.controller.initialize(token("t1")).await;

    h.fetcher.push_page(page(2, 2, 100, 3..=4));
    h.fetcher.push_page(page(1, 2, 100, 9..=10));
    let gate = h.fetcher.arm_gate();
    let load = tokio::spawn({
        let controller = Arc::clone(&h.controller);
        async move { controller.load_more().await }
    });
    gate.entered.notified().await;

    h.controller.refresh().await;
    assert_eq!(h.fetcher.calls().len(), 2, "refresh must not fetch yet");

    gate.release.notify_one();
    load.await.expect("load task");

    let calls = h.fetcher.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[2].page, 1);
    assert!(calls[2].until > calls[1].until);

    let state = h.controller.state().await;
    assert_eq!(post_ids(&state), vec![9, 10]);
    assert_eq!(state.cursor_page(), 2);
    assert!(!state.is_loading());
    assert!(!state.is_refreshing());
}

#[tokio::test]
async fn reloads_queued_behind_one_cycle_collapse_into_one() {
    let h = harness();
    h.fetcher.push_page(page(1, 2, 100, 1..=2));
    h.controller.initialize(token("t1")).await;

    h.fetcher.push_page(page(2, 2, 100, 3..=4));
    h.fetcher.push_page(page(1, 2, 100, 7..=8));
    let gate = h.fetcher.arm_gate();
    let load = tokio::spawn({
        let controller = Arc::clone(&h.controller);
        async move { controller.load_more().await }
    });
    gate.entered.notified().await;

    h.controller.refresh().await;
    h.controller.reset_and_reload().await;
    h.controller.refresh().await;

    gate.release.notify_one();
    load.await.expect("load task");

    assert_eq!(h.fetcher.calls().len(), 3);
    let state = h.controller.state().await;
    assert_eq!(post_ids(&state), vec![7, 8]);
    assert!(!state.is_loading());
}

#[tokio::test]
async fn observer_sees_loading_then_settled_snapshot() {
    let h = harness();
    h.fetcher.push_page(page(1, 10, 25, 1..=10));

    h.controller.initialize(token("t1")).await;

    let snapshots = h.observer.snapshots();
    assert_eq!(snapshots.len(), 2);
    assert!(snapshots[0].is_loading);
    assert!(!snapshots[0].is_refreshing);
    assert!(snapshots[0].posts.is_empty());
    assert!(!snapshots[1].is_loading);
    assert_eq!(snapshots[1].posts.len(), 10);
    assert_eq!(snapshots[1].footer(), FeedFooter::Hidden);
}

#[tokio::test]
async fn broadcast_observer_forwards_events() {
    let fetcher = ScriptedFetcher::new();
    fetcher.push_page(page(1, 10, 3, 1..=3));
    fetcher.push_page(page(1, 10, 3, 1..=3));
    let observer = Arc::new(BroadcastObserver::new(16));
    let mut events = observer.subscribe();
    let controller = FeedController::new(fetcher, observer);

    controller.initialize(token("t1")).await;
    controller.reset_and_reload().await;

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    assert_eq!(received.len(), 5);
    assert!(matches!(received[2], FeedEvent::ScrollToTop));
    match &received[4] {
        FeedEvent::Snapshot(snapshot) => assert_eq!(snapshot.footer(), FeedFooter::EndOfFeed),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn missing_fetcher_leaves_feed_idle_with_error() {
    let controller = FeedController::new(Arc::new(MissingPageFetcher), Arc::new(NoopObserver));
    controller.initialize(token("t1")).await;

    let snapshot = controller.snapshot().await;
    assert!(!snapshot.is_loading);
    assert!(snapshot.posts.is_empty());
    let failure = snapshot.last_error.expect("failure recorded");
    assert_eq!(failure.kind, CycleKind::Initial);
    assert!(failure.to_string().contains("unavailable"));
}
