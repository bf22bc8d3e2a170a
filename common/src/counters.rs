use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Shared sliding-window counter store, keyed by composite strings such as
/// `{tenant}:{tool}`. All updates are atomic record-and-count operations;
/// entries outside the window expire on access.
#[derive(Default)]
pub struct SlidingWindow {
    entries: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one event for `key` and returns how many events fall inside
    /// the trailing `window`, including the one just recorded.
    pub fn record_and_count(&self, key: &str, window: Duration) -> usize {
        let now = Instant::now();
        #[allow(clippy::expect_used)]
        let mut entries = self.entries.lock().expect("counter mutex poisoned");
        let bucket = entries.entry(key.to_owned()).or_default();
        Self::expire(bucket, now, window);
        bucket.push_back(now);
        bucket.len()
    }

    /// Removes the most recent event for `key`, undoing a reservation that
    /// did not result in an admitted call.
    pub fn forget_last(&self, key: &str) {
        #[allow(clippy::expect_used)]
        let mut entries = self.entries.lock().expect("counter mutex poisoned");
        if let Some(bucket) = entries.get_mut(key) {
            bucket.pop_back();
            if bucket.is_empty() {
                entries.remove(key);
            }
        }
    }

    /// Current count inside the trailing `window` without recording.
    pub fn count(&self, key: &str, window: Duration) -> usize {
        let now = Instant::now();
        #[allow(clippy::expect_used)]
        let mut entries = self.entries.lock().expect("counter mutex poisoned");
        match entries.get_mut(key) {
            Some(bucket) => {
                Self::expire(bucket, now, window);
                bucket.len()
            }
            None => 0,
        }
    }

    fn expire(bucket: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = bucket.front() {
            if now.duration_since(*oldest) > window {
                bucket.pop_front();
            } else {
                break;
            }
        }
    }
}
