//! Work queue: hands object keys to workers, one in-flight reconcile per key.
//!
//! Keys are deduplicated while pending. A key handed out by [`WorkQueue::get`]
//! stays in the processing set until [`WorkQueue::done`]; adds that arrive in
//! the meantime are parked and the key is queued again once the worker
//! finishes. Different keys flow to different workers in parallel.
//!
//! Delayed adds back both the notification coalescing window and per-key
//! exponential retry backoff.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use webui_state::ObjectKey;

/// Exponential retry delay: `base * 2^failures`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn delay(&self, failures: u32) -> Duration {
        self.base
            .saturating_mul(2u32.saturating_pow(failures))
            .min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(5),
            max: Duration::from_secs(300),
        }
    }
}

#[derive(Default)]
struct QueueState {
    /// Keys ready to hand out, in arrival order.
    queue: VecDeque<ObjectKey>,
    /// Keys that need processing (queued, or parked behind an in-flight run).
    dirty: HashSet<ObjectKey>,
    /// Keys currently held by a worker.
    processing: HashSet<ObjectKey>,
    /// Earliest pending delayed add per key.
    waiting: HashMap<ObjectKey, Instant>,
    /// Consecutive failures per key.
    failures: HashMap<ObjectKey, u32>,
    shutting_down: bool,
}

/// Deduplicating, single-flight queue of object keys.
pub struct WorkQueue {
    state: Mutex<QueueState>,
    ready: Notify,
    backoff: Backoff,
}

impl WorkQueue {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            ready: Notify::new(),
            backoff,
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `key` as needing a reconcile.
    pub fn add(&self, key: ObjectKey) {
        {
            let mut state = self.state();
            if state.shutting_down || state.dirty.contains(&key) {
                return;
            }
            state.dirty.insert(key.clone());
            if state.processing.contains(&key) {
                // Re-queued by `done`.
                return;
            }
            state.queue.push_back(key);
        }
        self.ready.notify_one();
    }

    /// Add `key` once `delay` has elapsed. Of several pending delayed adds for
    /// one key only the earliest is kept.
    pub fn add_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let deadline = Instant::now() + delay;
        {
            let mut state = self.state();
            if state.shutting_down {
                return;
            }
            if let Some(existing) = state.waiting.get(&key)
                && *existing <= deadline
            {
                return;
            }
            state.waiting.insert(key.clone(), deadline);
        }

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let current = {
                let mut state = queue.state();
                let current = state.waiting.get(&key) == Some(&deadline);
                if current {
                    state.waiting.remove(&key);
                }
                current
            };
            // A superseded timer leaves the add to the one that replaced it.
            if current {
                queue.add(key);
            }
        });
    }

    /// Re-add `key` after its backoff delay and count the failure.
    /// Returns the delay used.
    pub fn add_rate_limited(self: &Arc<Self>, key: ObjectKey) -> Duration {
        let failures = {
            let mut state = self.state();
            let count = state.failures.entry(key.clone()).or_insert(0);
            let previous = *count;
            *count = count.saturating_add(1);
            previous
        };
        let delay = self.backoff.delay(failures);
        debug!(%key, failures = failures + 1, ?delay, "requeue with backoff");
        self.add_after(key, delay);
        delay
    }

    /// Reset the failure count for `key`.
    pub fn forget(&self, key: &ObjectKey) {
        self.state().failures.remove(key);
    }

    /// Consecutive failures recorded for `key`.
    pub fn requeues(&self, key: &ObjectKey) -> u32 {
        self.state().failures.get(key).copied().unwrap_or(0)
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<ObjectKey> {
        loop {
            // Created before checking so a shutdown in between is not missed.
            let notified = self.ready.notified();
            {
                let mut state = self.state();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Release `key` after a worker finished with it.
    pub fn done(&self, key: &ObjectKey) {
        let requeued = {
            let mut state = self.state();
            state.processing.remove(key);
            if state.dirty.contains(key) && !state.shutting_down {
                state.queue.push_back(key.clone());
                true
            } else {
                false
            }
        };
        if requeued {
            self.ready.notify_one();
        }
    }

    /// Stop handing out keys and wake every waiting worker.
    pub fn shutdown(&self) {
        self.state().shutting_down = true;
        self.ready.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }

    /// Keys ready to hand out right now.
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
