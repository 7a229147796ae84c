//! Process-local sliding window: one queue of attempt instants per key.
//!
//! Each key remembers the period it was last checked with, so the overflow
//! sweep prunes IP and email keys by their own windows.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;

use super::{Decision, Window};

pub(crate) const DEFAULT_MAX_KEYS: usize = 100_000;

#[derive(Debug, Default)]
struct Bucket {
    period: Duration,
    events: VecDeque<Instant>,
}

impl Bucket {
    fn prune(&mut self, now: Instant) {
        prune_queue(&mut self.events, now, self.period);
    }
}

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, Bucket>>>,
    max_keys: usize,
}

impl MemoryStore {
    pub fn new(max_keys: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            max_keys,
        }
    }

    pub fn hit(&self, key: &str, window: Window) -> Decision {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let bucket = inner.entry(key.to_string()).or_default();
        bucket.period = window.period;
        bucket.prune(now);
        let queue = &mut bucket.events;

        let allowed = queue.len() < window.limit as usize;
        if allowed {
            queue.push_back(now);
        }
        let count = u32::try_from(queue.len()).unwrap_or(u32::MAX);
        let until_clear = queue
            .front()
            .map(|oldest| window.period.saturating_sub(now.duration_since(*oldest)))
            .unwrap_or(Duration::ZERO);

        if inner.len() > self.max_keys {
            inner.retain(|_, bucket| {
                bucket.prune(now);
                !bucket.events.is_empty()
            });
        }

        decision(allowed, window, count, until_clear)
    }

    pub fn reset(&self, key: &str) {
        self.inner.lock().remove(key);
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

fn prune_queue(queue: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(front) = queue.front() {
        if now.duration_since(*front) >= window {
            queue.pop_front();
        } else {
            break;
        }
    }
}

fn decision(allowed: bool, window: Window, count: u32, until_clear: Duration) -> Decision {
    let until_secs = until_clear.as_secs() + u64::from(until_clear.subsec_nanos() > 0);
    Decision {
        allowed,
        limit: window.limit,
        remaining: window.limit.saturating_sub(count),
        retry_after: if allowed { 0 } else { until_secs.max(1) },
        reset_at: Utc::now().timestamp() + i64::try_from(until_secs).unwrap_or(i64::MAX / 2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn rejects_when_limit_reached() {
        let store = MemoryStore::new(16);
        let w = Window::new(2, Duration::from_secs(60));
        assert!(store.hit("k", w).allowed);
        assert!(store.hit("k", w).allowed);
        let denied = store.hit("k", w);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.retry_after > 0 && denied.retry_after <= 60);
    }

    #[test]
    fn allows_after_window_elapses() {
        let store = MemoryStore::new(16);
        let w = Window::new(1, Duration::from_millis(5));
        assert!(store.hit("k", w).allowed);
        assert!(!store.hit("k", w).allowed);
        thread::sleep(Duration::from_millis(10));
        assert!(store.hit("k", w).allowed);
    }

    #[test]
    fn denied_attempts_are_not_recorded() {
        let store = MemoryStore::new(16);
        let w = Window::new(1, Duration::from_millis(20));
        assert!(store.hit("k", w).allowed);
        for _ in 0..10 {
            assert!(!store.hit("k", w).allowed);
        }
        thread::sleep(Duration::from_millis(25));
        assert!(store.hit("k", w).allowed);
    }

    #[test]
    fn overflow_evicts_idle_keys() {
        let store = MemoryStore::new(2);
        let w = Window::new(5, Duration::from_millis(1));
        store.hit("a", w);
        store.hit("b", w);
        thread::sleep(Duration::from_millis(3));
        store.hit("c", w);
        assert!(store.inner.lock().len() <= 2);
    }

    #[test]
    fn overflow_sweep_keeps_longer_windows_intact() {
        let store = MemoryStore::new(1);
        let email = Window::new(1, Duration::from_secs(900));
        let ip = Window::new(5, Duration::from_millis(1));

        assert!(store.hit("email", email).allowed);
        assert!(!store.hit("email", email).allowed);

        store.hit("ip-a", ip);
        thread::sleep(Duration::from_millis(3));
        store.hit("ip-b", ip);

        assert!(
            !store.hit("email", email).allowed,
            "email attempts must outlive a sweep triggered by a shorter window"
        );
    }
}
