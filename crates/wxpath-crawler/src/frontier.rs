use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::stats::CrawlStats;
use crate::urls;

/// Unit of work awaiting fetch.
#[derive(Debug, Clone)]
pub struct CrawlTask {
    /// Canonical absolute URL.
    pub url: String,
    /// Seed = 0; +1 per `url(...)` hop.
    pub depth: usize,
    /// URL of the document that enqueued this task.
    pub backlink: Option<String>,
    /// Index of the first segment to execute once fetched.
    pub cursor: usize,
    /// Deep-visited: re-enqueue the program's deep XPath on this document.
    pub deep: bool,
    /// Per-subtree depth cap from a `depth=` argument on the seed.
    pub depth_cap: Option<usize>,
}

/// Counted, deduplicating sender onto the task queue. Enqueueing
/// canonicalises the URL, consults the run-global `seen` set atomically,
/// applies the inclusive depth limit, and only then counts the task in.
#[derive(Clone)]
pub struct Frontier {
    tx: mpsc::UnboundedSender<CrawlTask>,
    seen: Arc<Mutex<HashSet<String>>>,
    tasks_in: Arc<AtomicUsize>,
    stats: Arc<CrawlStats>,
    max_depth: usize,
}

impl Frontier {
    pub(crate) fn new(
        tx: mpsc::UnboundedSender<CrawlTask>,
        tasks_in: Arc<AtomicUsize>,
        stats: Arc<CrawlStats>,
        max_depth: usize,
    ) -> Self {
        Self {
            tx,
            seen: Arc::new(Mutex::new(HashSet::new())),
            tasks_in,
            stats,
            max_depth,
        }
    }

    /// True when the task was accepted onto the queue.
    pub(crate) fn enqueue(&self, task: CrawlTask) -> bool {
        let url = match urls::canonicalize(&task.url) {
            Ok(url) => url,
            Err(e) => {
                log::warn!("Skipping unparseable URL {}: {e}", task.url);
                return false;
            }
        };
        // Dedup check and insert are one critical section; the depth guard
        // runs after it, so a depth-dropped URL stays claimed.
        if !self.seen.lock().unwrap().insert(url.clone()) {
            CrawlStats::bump(&self.stats.deduped);
            return false;
        }
        let cap = task
            .depth_cap
            .map_or(self.max_depth, |c| c.min(self.max_depth));
        if task.depth > cap {
            CrawlStats::bump(&self.stats.depth_dropped);
            return false;
        }
        let task = CrawlTask { url, ..task };
        // Counted before the send: a child that fails fast must never let
        // the outstanding-work counter hit zero while its parent is still
        // being dispatched.
        self.tasks_in.fetch_add(1, Ordering::SeqCst);
        match self.tx.send(task) {
            Ok(()) => {
                CrawlStats::bump(&self.stats.enqueued);
                true
            }
            Err(e) => {
                self.tasks_in.fetch_sub(1, Ordering::SeqCst);
                log::error!("Couldn't enqueue task: {e}");
                false
            }
        }
    }
}
