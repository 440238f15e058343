use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use atlas_core::FrontierEntry;

/// Why an enqueue was rejected (or that it wasn't).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Added,
    /// urlKey was already admitted once; entries enter the frontier at most once.
    Duplicate,
    /// Entry depth exceeds the crawl's max depth.
    DepthExceeded,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FrontierSnapshot {
    pub entries: Vec<FrontierEntry>,
    pub enqueued: Vec<String>,
}

struct Inner {
    queue: VecDeque<FrontierEntry>,
    /// Every urlKey ever admitted, including ones already popped.
    enqueued: HashSet<String>,
    /// urlKeys of successfully visited pages.
    visited: HashSet<String>,
}

/// FIFO frontier with exact dedup. The queue and both indexes live behind a
/// single mutex; workers never touch this directly, only the coordinator.
pub struct Frontier {
    inner: Mutex<Inner>,
    /// -1 = unlimited, 0 = seeds only.
    max_depth: i64,
}

impl Frontier {
    pub fn new(max_depth: i64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                enqueued: HashSet::new(),
                visited: HashSet::new(),
            }),
            max_depth,
        }
    }

    pub async fn enqueue(&self, entry: FrontierEntry) -> EnqueueOutcome {
        if self.max_depth >= 0 && i64::from(entry.depth) > self.max_depth {
            return EnqueueOutcome::DepthExceeded;
        }
        let mut inner = self.inner.lock().await;
        if !inner.enqueued.insert(entry.url_key.clone()) {
            return EnqueueOutcome::Duplicate;
        }
        debug!(url = %entry.url, depth = entry.depth, "enqueued");
        inner.queue.push_back(entry);
        EnqueueOutcome::Added
    }

    pub async fn pop(&self) -> Option<FrontierEntry> {
        self.inner.lock().await.queue.pop_front()
    }

    /// Put an entry back at the head, e.g. after a rate-limit deny.
    pub async fn push_front(&self, entry: FrontierEntry) {
        self.inner.lock().await.queue.push_front(entry);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.queue.is_empty()
    }

    pub async fn mark_visited(&self, url_key: &str) {
        self.inner.lock().await.visited.insert(url_key.to_string());
    }

    pub async fn is_visited(&self, url_key: &str) -> bool {
        self.inner.lock().await.visited.contains(url_key)
    }

    pub async fn visited_count(&self) -> u64 {
        self.inner.lock().await.visited.len() as u64
    }

    pub async fn enqueued_count(&self) -> u64 {
        self.inner.lock().await.enqueued.len() as u64
    }

    /// Queue order is preserved so a resumed crawl continues where it left off.
    pub async fn snapshot(&self) -> (FrontierSnapshot, Vec<String>) {
        let inner = self.inner.lock().await;
        let snapshot = FrontierSnapshot {
            entries: inner.queue.iter().cloned().collect(),
            enqueued: inner.enqueued.iter().cloned().collect(),
        };
        let visited = inner.visited.iter().cloned().collect();
        (snapshot, visited)
    }

    pub async fn restore(&self, snapshot: FrontierSnapshot, visited: Vec<String>) {
        let mut inner = self.inner.lock().await;
        inner.queue = snapshot.entries.into();
        inner.enqueued = snapshot.enqueued.into_iter().collect();
        inner.visited = visited.into_iter().collect();
        debug!(
            queue = inner.queue.len(),
            enqueued = inner.enqueued.len(),
            visited = inner.visited.len(),
            "frontier restored"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(url: &str, depth: u32) -> FrontierEntry {
        FrontierEntry {
            url: url.to_string(),
            url_key: atlas_core::url::url_key(url),
            depth,
            discovered_from: None,
            enqueued_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn enqueue_is_idempotent() {
        let frontier = Frontier::new(-1);
        assert_eq!(frontier.enqueue(entry("https://a/", 0)).await, EnqueueOutcome::Added);
        assert_eq!(frontier.enqueue(entry("https://a/", 0)).await, EnqueueOutcome::Duplicate);
        assert_eq!(frontier.enqueue(entry("https://a/", 3)).await, EnqueueOutcome::Duplicate);
        assert_eq!(frontier.len().await, 1);
    }

    #[tokio::test]
    async fn dedup_survives_pop() {
        let frontier = Frontier::new(-1);
        frontier.enqueue(entry("https://a/", 0)).await;
        assert!(frontier.pop().await.is_some());
        // Popped once, never admitted again.
        assert_eq!(frontier.enqueue(entry("https://a/", 1)).await, EnqueueOutcome::Duplicate);
        assert!(frontier.pop().await.is_none());
    }

    #[tokio::test]
    async fn fifo_order() {
        let frontier = Frontier::new(-1);
        for u in ["https://a/", "https://b/", "https://c/"] {
            frontier.enqueue(entry(u, 0)).await;
        }
        assert_eq!(frontier.pop().await.unwrap().url, "https://a/");
        assert_eq!(frontier.pop().await.unwrap().url, "https://b/");
        assert_eq!(frontier.pop().await.unwrap().url, "https://c/");
    }

    #[tokio::test]
    async fn depth_gate() {
        let seeds_only = Frontier::new(0);
        assert_eq!(seeds_only.enqueue(entry("https://a/", 0)).await, EnqueueOutcome::Added);
        assert_eq!(
            seeds_only.enqueue(entry("https://b/", 1)).await,
            EnqueueOutcome::DepthExceeded
        );

        let unlimited = Frontier::new(-1);
        assert_eq!(unlimited.enqueue(entry("https://c/", 10_000)).await, EnqueueOutcome::Added);

        let bounded = Frontier::new(2);
        assert_eq!(bounded.enqueue(entry("https://d/", 2)).await, EnqueueOutcome::Added);
        assert_eq!(bounded.enqueue(entry("https://e/", 3)).await, EnqueueOutcome::DepthExceeded);
    }

    #[tokio::test]
    async fn snapshot_restore_round_trip() {
        let frontier = Frontier::new(-1);
        frontier.enqueue(entry("https://a/", 0)).await;
        frontier.enqueue(entry("https://b/", 1)).await;
        frontier.mark_visited("k-visited").await;

        let (snapshot, visited) = frontier.snapshot().await;

        let restored = Frontier::new(-1);
        restored.restore(snapshot, visited).await;
        assert_eq!(restored.len().await, 2);
        assert!(restored.is_visited("k-visited").await);
        assert_eq!(restored.pop().await.unwrap().url, "https://a/");
        // Dedup index came along too.
        assert_eq!(restored.enqueue(entry("https://b/", 1)).await, EnqueueOutcome::Duplicate);
    }
}
