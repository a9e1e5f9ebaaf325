use tokio::sync::broadcast;

use crate::state::FeedSnapshot;

/// View-side sink for feed state. Implementations must not block; they run on
/// the controller's task right after each transition.
pub trait FeedObserver: Send + Sync {
    fn on_snapshot(&self, snapshot: &FeedSnapshot);

    /// The list should jump back to its first item.
    fn on_scroll_to_top(&self) {}
}

pub struct NoopObserver;

impl FeedObserver for NoopObserver {
    fn on_snapshot(&self, _snapshot: &FeedSnapshot) {}
}

#[derive(Debug, Clone)]
pub enum FeedEvent {
    Snapshot(FeedSnapshot),
    ScrollToTop,
}

/// Fans feed events out to any number of subscribers. Slow subscribers lag and
/// lose the oldest events rather than stalling the controller.
pub struct BroadcastObserver {
    events: broadcast::Sender<FeedEvent>,
}

impl BroadcastObserver {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self { events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.events.subscribe()
    }
}

impl FeedObserver for BroadcastObserver {
    fn on_snapshot(&self, snapshot: &FeedSnapshot) {
        let _ = self.events.send(FeedEvent::Snapshot(snapshot.clone()));
    }

    fn on_scroll_to_top(&self) {
        let _ = self.events.send(FeedEvent::ScrollToTop);
    }
}
