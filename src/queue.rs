//! Deduplicating, rate-limited work queue for exposure intents
//!
//! Semantics follow the controller work queue most Kubernetes controllers are
//! built on:
//!
//! - A key is queued at most once. Adding an intent for a key that is already
//!   waiting replaces the waiting intent, so the newest decision wins.
//! - A key handed out by [`WorkQueue::get`] is in flight until
//!   [`WorkQueue::done`]. Intents added meanwhile are parked and re-queued on
//!   `done`, so one key is never processed twice concurrently.
//! - [`WorkQueue::add_rate_limited`] re-adds after a per-key exponential delay;
//!   [`WorkQueue::forget`] resets that key's failure count.
//! - After [`WorkQueue::shutdown`], new adds are ignored, already queued items
//!   are still handed out, and `get` returns `None` once the queue is empty.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::intent::{ExposureIntent, ObjectKey};

/// Per-key exponential backoff used for failed items.
///
/// The n-th consecutive failure of a key waits `base_delay * 2^(n-1)`, capped
/// at `max_delay`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExponentialBackoff {
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
        }
    }
}

impl ExponentialBackoff {
    /// Delay before retrying an item that has already failed `previous_failures` times
    pub fn delay_for(&self, previous_failures: u32) -> Duration {
        // 2^31 * 5ms already overflows any sane max_delay
        let exponent = previous_failures.min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

#[derive(Default)]
struct State {
    /// FIFO order of waiting keys
    order: VecDeque<ObjectKey>,
    /// Latest intent for every waiting key
    waiting: HashMap<ObjectKey, ExposureIntent>,
    /// Keys handed out by `get` and not yet `done`
    in_flight: HashSet<ObjectKey>,
    /// Intents that arrived while their key was in flight
    parked: HashMap<ObjectKey, ExposureIntent>,
    /// Consecutive failures per key
    failures: HashMap<ObjectKey, u32>,
    /// Generation of the latest fresh `add` per key; stale delayed retries
    /// compare against it
    generations: HashMap<ObjectKey, u64>,
    /// Queue-wide source of generations, never reused even after `forget`
    next_generation: u64,
    shutting_down: bool,
}

impl State {
    fn enqueue(&mut self, intent: ExposureIntent) -> bool {
        let key = intent.key().clone();
        if self.in_flight.contains(&key) {
            trace!(key = %key, "Key in flight, parking intent");
            self.parked.insert(key, intent);
            return false;
        }
        if self.waiting.insert(key.clone(), intent).is_none() {
            self.order.push_back(key);
            return true;
        }
        trace!(key = %key, "Key already queued, replaced waiting intent");
        false
    }
}

struct Inner {
    state: Mutex<State>,
    notify: Notify,
    backoff: ExponentialBackoff,
}

/// Handle to a shared work queue. Clones refer to the same queue.
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new(ExponentialBackoff::default())
    }
}

impl WorkQueue {
    /// Create an empty queue with the given retry backoff
    pub fn new(backoff: ExponentialBackoff) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                backoff,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // Critical sections never panic, so a poisoned lock still holds consistent state
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add an intent. Never blocks.
    pub fn add(&self, intent: ExposureIntent) {
        let mut state = self.state();
        if state.shutting_down {
            debug!(key = %intent.key(), "Queue shutting down, dropping intent");
            return;
        }
        state.next_generation += 1;
        let generation = state.next_generation;
        state.generations.insert(intent.key().clone(), generation);
        let woke = state.enqueue(intent);
        drop(state);
        if woke {
            self.inner.notify.notify_one();
        }
    }

    /// Re-add a failed intent after the key's backoff delay.
    ///
    /// The retry is discarded if a newer intent for the same key is added
    /// before the delay elapses (or was added while this one was in flight),
    /// or if the key is forgotten meanwhile.
    pub fn add_rate_limited(&self, intent: ExposureIntent) {
        let (delay, generation) = {
            let mut state = self.state();
            if state.shutting_down {
                return;
            }
            let key = intent.key().clone();
            if state.parked.contains_key(&key) {
                debug!(key = %key, "Newer intent arrived while in flight, skipping retry");
                return;
            }
            let failures = state.failures.entry(key.clone()).or_insert(0);
            let delay = self.inner.backoff.delay_for(*failures);
            *failures += 1;
            let generation = state.generations.get(&key).copied().unwrap_or(0);
            (delay, generation)
        };

        debug!(
            key = %intent.key(),
            delay_ms = delay.as_millis() as u64,
            "Scheduling retry"
        );

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.requeue(intent, generation);
        });
    }

    fn requeue(&self, intent: ExposureIntent, generation: u64) {
        let mut state = self.state();
        if state.shutting_down {
            return;
        }
        let current = state.generations.get(intent.key()).copied().unwrap_or(0);
        if current != generation {
            debug!(key = %intent.key(), "Superseded by a newer intent, dropping retry");
            return;
        }
        let woke = state.enqueue(intent);
        drop(state);
        if woke {
            self.inner.notify.notify_one();
        }
    }

    /// Wait for the next intent. Returns `None` once the queue is shut down
    /// and empty. The returned key stays in flight until [`WorkQueue::done`].
    pub async fn get(&self) -> Option<ExposureIntent> {
        loop {
            // Registered before the state check so a concurrent add or shutdown is not missed
            let notified = self.inner.notify.notified();
            {
                let mut state = self.state();
                while let Some(key) = state.order.pop_front() {
                    if let Some(intent) = state.waiting.remove(&key) {
                        state.in_flight.insert(key);
                        return Some(intent);
                    }
                }
                if state.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Mark a key as no longer in flight, re-queueing any intent parked for it
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self.state();
        state.in_flight.remove(key);
        let woke = match state.parked.remove(key) {
            Some(intent) => state.enqueue(intent),
            None => false,
        };
        drop(state);
        if woke {
            self.inner.notify.notify_one();
        }
    }

    /// Reset the failure history of a key
    pub fn forget(&self, key: &ObjectKey) {
        let mut state = self.state();
        state.failures.remove(key);
        state.generations.remove(key);
    }

    /// Number of consecutive failures recorded for a key
    pub fn num_requeues(&self, key: &ObjectKey) -> u32 {
        self.state().failures.get(key).copied().unwrap_or(0)
    }

    /// Number of keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.state().waiting.len()
    }

    /// Whether no keys are waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting work and wake every waiter
    pub fn shutdown(&self) {
        self.state().shutting_down = true;
        self.inner.notify.notify_waiters();
        debug!("Work queue shut down");
    }

    /// Whether [`WorkQueue::shutdown`] has been called
    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }
}
