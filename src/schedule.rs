// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Scheduling primitives: debounce and latest-request-wins sequencing

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Default quiet period before a debounced task runs
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs only the last of a burst of scheduled tasks
///
/// Every `schedule` call aborts the previously scheduled task if it has not
/// started its work yet, so a burst of N calls within the quiet period runs
/// once, after the last call.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    /// Debouncer with the given quiet period
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    /// Quiet period
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule `task`, replacing anything still waiting
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        if let Some(previous) = lock(&self.pending).replace(handle) {
            if !previous.is_finished() {
                debug!("debounce: superseded pending task");
            }
            previous.abort();
        }
    }

    /// Drop the pending task, if any
    pub fn cancel(&self) {
        if let Some(previous) = lock(&self.pending).take() {
            previous.abort();
        }
    }

    /// Whether a scheduled task has not finished yet
    #[must_use]
    pub fn is_pending(&self) -> bool {
        lock(&self.pending).as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Sequence number identifying one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestTag(u64);

impl RequestTag {
    /// Raw sequence number
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

/// Latest-request-wins sequencing for one kind of request
///
/// Each request takes a tag; its result may only be applied while that tag
/// is still the newest one issued.
#[derive(Debug, Default)]
pub struct LatestOnly {
    latest: AtomicU64,
}

impl LatestOnly {
    /// Fresh sequence
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag a new request, superseding all earlier ones
    pub fn issue(&self) -> RequestTag {
        RequestTag(self.latest.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Whether `tag` is still the newest request
    #[must_use]
    pub fn is_current(&self, tag: RequestTag) -> bool {
        self.latest.load(Ordering::SeqCst) == tag.0
    }

    /// Supersede every outstanding request without starting a new one
    pub fn invalidate(&self) {
        self.latest.fetch_add(1, Ordering::SeqCst);
    }

    /// Pass `value` through if `tag` is current, else drop it
    pub fn accept<T>(&self, tag: RequestTag, value: T) -> Option<T> {
        if self.is_current(tag) {
            Some(value)
        } else {
            debug!("discarding stale result for request {}", tag.0);
            None
        }
    }
}

/// Latest-request-wins sequencing per key
#[derive(Debug, Default)]
pub struct KeyedLatest {
    counter: AtomicU64,
    latest: Mutex<HashMap<String, u64>>,
}

impl KeyedLatest {
    /// Fresh sequence
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag a new request on `key`, superseding earlier ones on the same key
    pub fn issue(&self, key: &str) -> RequestTag {
        let tag = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.latest).insert(key.to_string(), tag);
        RequestTag(tag)
    }

    /// Whether `tag` is still the newest request on `key`
    #[must_use]
    pub fn is_current(&self, key: &str, tag: RequestTag) -> bool {
        lock(&self.latest).get(key) == Some(&tag.0)
    }

    /// Supersede every outstanding request on every key
    pub fn invalidate_all(&self) {
        lock(&self.latest).clear();
    }

    /// Settle a request: returns whether it was current, and forgets the key
    /// if so
    pub fn finish(&self, key: &str, tag: RequestTag) -> bool {
        let mut latest = lock(&self.latest);
        if latest.get(key) == Some(&tag.0) {
            latest.remove(key);
            true
        } else {
            debug!("discarding stale result for {} (request {})", key, tag.0);
            false
        }
    }
}
