use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Run-wide counters. All writers use `SeqCst`; snapshots are approximate
/// while the run is live and exact once the stream has completed.
#[derive(Debug, Default)]
pub struct CrawlStats {
    pub(crate) enqueued: AtomicUsize,
    pub(crate) deduped: AtomicUsize,
    pub(crate) depth_dropped: AtomicUsize,
    pub(crate) fetched: AtomicUsize,
    pub(crate) failed: AtomicUsize,
    pub(crate) hook_dropped: AtomicUsize,
    pub(crate) yielded: AtomicUsize,
}

impl CrawlStats {
    pub(crate) fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enqueued: self.enqueued.load(Ordering::SeqCst),
            deduped: self.deduped.load(Ordering::SeqCst),
            depth_dropped: self.depth_dropped.load(Ordering::SeqCst),
            fetched: self.fetched.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            hook_dropped: self.hook_dropped.load(Ordering::SeqCst),
            yielded: self.yielded.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub enqueued: usize,
    pub deduped: usize,
    pub depth_dropped: usize,
    pub fetched: usize,
    pub failed: usize,
    pub hook_dropped: usize,
    pub yielded: usize,
}

/// Observer invoked with periodic snapshots while a run is live.
pub type ProgressFn = Arc<dyn Fn(StatsSnapshot) + Send + Sync>;
