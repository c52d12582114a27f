//! Deduplicator (C7): the single entry point for both the polling
//! orchestrator and the webhook intake. Coalesces duplicate submissions of
//! the same `(repo, PR number)` key into one processing run (I4).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tracing::warn;

use crate::platform::RepoRef;

pub const DEFAULT_MAX_QUEUE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Poll,
    Event,
}

pub type Key = (RepoRef, u64);

#[derive(Default)]
struct Inner {
    queue: VecDeque<Key>,
    queued: HashSet<Key>,
    in_flight: HashSet<Key>,
    sources: HashMap<Key, HashSet<Source>>,
    coalesced: u64,
    dropped: u64,
}

pub struct Deduplicator {
    inner: Mutex<Inner>,
    notify: Notify,
    max_queue: usize,
}

impl Deduplicator {
    pub fn new(max_queue: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            max_queue,
        }
    }

    /// Enqueue `key` from `source`. If it is already queued or in-flight,
    /// merge the source and bump the coalesce counter instead of
    /// duplicating work.
    pub async fn submit(&self, key: Key, source: Source) {
        let mut inner = self.inner.lock().await;
        let already_tracked = inner.queued.contains(&key) || inner.in_flight.contains(&key);
        inner.sources.entry(key.clone()).or_default().insert(source);

        if already_tracked {
            inner.coalesced += 1;
            return;
        }

        if inner.queue.len() >= self.max_queue {
            if let Some(oldest) = inner
                .queue
                .iter()
                .position(|k| !inner.in_flight.contains(k))
            {
                let dropped = inner.queue.remove(oldest).unwrap();
                inner.queued.remove(&dropped);
                inner.sources.remove(&dropped);
                inner.dropped += 1;
                warn!(?dropped, "deduplicator queue full, dropped oldest non-in-flight key");
            } else {
                inner.dropped += 1;
                warn!("deduplicator queue full and every entry in flight, rejecting submission");
                inner.sources.remove(&key);
                return;
            }
        }

        inner.queue.push_back(key.clone());
        inner.queued.insert(key);
        drop(inner);
        self.notify.notify_one();
    }

    /// Dequeue the next key along with every source that coalesced into it.
    /// Marks the key in-flight; the caller must call `done` on completion.
    pub async fn next(&self) -> (Key, HashSet<Source>) {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some(key) = inner.queue.pop_front() {
                    inner.queued.remove(&key);
                    inner.in_flight.insert(key.clone());
                    let sources = inner.sources.remove(&key).unwrap_or_default();
                    return (key, sources);
                }
            }
            self.notify.notified().await;
        }
    }

    pub async fn done(&self, key: &Key) {
        self.inner.lock().await.in_flight.remove(key);
    }

    pub async fn coalesced_count(&self) -> u64 {
        self.inner.lock().await.coalesced
    }

    pub async fn dropped_count(&self) -> u64 {
        self.inner.lock().await.dropped
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_QUEUE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(number: u64) -> Key {
        (RepoRef::new("acme", "web"), number)
    }

    #[tokio::test]
    async fn submit_then_next_round_trips() {
        let dedup = Deduplicator::new(16);
        dedup.submit(key(9), Source::Poll).await;
        let (k, sources) = dedup.next().await;
        assert_eq!(k, key(9));
        assert!(sources.contains(&Source::Poll));
    }

    #[tokio::test]
    async fn duplicate_submission_coalesces() {
        let dedup = Deduplicator::new(16);
        dedup.submit(key(9), Source::Poll).await;
        dedup.submit(key(9), Source::Event).await;
        assert_eq!(dedup.coalesced_count().await, 1);
        let (_, sources) = dedup.next().await;
        assert_eq!(sources.len(), 2);
    }

    #[tokio::test]
    async fn submission_while_in_flight_also_coalesces() {
        let dedup = Deduplicator::new(16);
        dedup.submit(key(9), Source::Event).await;
        let (k, _) = dedup.next().await;
        dedup.submit(k.clone(), Source::Poll).await;
        assert_eq!(dedup.coalesced_count().await, 1);
        dedup.done(&k).await;
    }

    #[tokio::test]
    async fn done_releases_in_flight_mark() {
        let dedup = Deduplicator::new(16);
        dedup.submit(key(1), Source::Poll).await;
        let (k, _) = dedup.next().await;
        dedup.done(&k).await;
        // resubmitting after done is a fresh entry, not a coalesce
        dedup.submit(key(1), Source::Poll).await;
        assert_eq!(dedup.coalesced_count().await, 0);
    }

    #[tokio::test]
    async fn bounded_queue_drops_oldest_not_in_flight() {
        let dedup = Deduplicator::new(2);
        dedup.submit(key(1), Source::Poll).await;
        dedup.submit(key(2), Source::Poll).await;
        dedup.submit(key(3), Source::Poll).await;
        assert_eq!(dedup.dropped_count().await, 1);
        let (k, _) = dedup.next().await;
        assert_eq!(k, key(2));
    }
}
