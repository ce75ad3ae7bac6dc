//! Timer service for deferred lifecycle work
//!
//! The wake-up handler never owns its own clock: poll scheduling, the
//! deferred no-more-information send and the sleep grace window all go
//! through this injected service, so tests substitute a manually fired
//! timer.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::AbortHandle;

/// Work scheduled to run once after a delay.
pub type TimerCallback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Identifies one scheduled callback so it can be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

/// Scheduling primitive consumed by the lifecycle handlers.
pub trait TimerService: Send + Sync {
    /// Run `callback` once after `delay`.
    fn schedule_once(&self, delay: Duration, callback: TimerCallback) -> TimerHandle;

    /// Cancel a scheduled callback. Cancelling a handle that already fired
    /// or was never issued is a no-op.
    fn cancel(&self, handle: TimerHandle);
}

/// Production timer backed by spawned sleep tasks.
pub struct TokioTimer {
    next_id: AtomicU64,
    tasks: Arc<Mutex<HashMap<u64, AbortHandle>>>,
}

impl TokioTimer {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for TokioTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerService for TokioTimer {
    fn schedule_once(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let tasks = Arc::clone(&self.tasks);

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Ok(mut tasks) = tasks.lock() {
                tasks.remove(&id);
            }
            callback().await;
        });

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.insert(id, task.abort_handle());
        }

        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) {
        let removed = self
            .tasks
            .lock()
            .ok()
            .and_then(|mut tasks| tasks.remove(&handle.0));
        if let Some(task) = removed {
            task.abort();
        }
    }
}

/// Test timer that holds callbacks until the test fires them.
#[cfg(test)]
pub struct ManualTimer {
    next_id: AtomicU64,
    pending: Mutex<Vec<(u64, Duration, Option<TimerCallback>)>>,
}

#[cfg(test)]
impl ManualTimer {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Number of callbacks scheduled and not yet fired or cancelled.
    pub fn active(&self) -> usize {
        self.pending
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, _, cb)| cb.is_some())
            .count()
    }

    /// Delays of the callbacks still pending, in scheduling order.
    pub fn pending_delays(&self) -> Vec<Duration> {
        self.pending
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, _, cb)| cb.is_some())
            .map(|(_, delay, _)| *delay)
            .collect()
    }

    /// Fire the oldest pending callback. Returns false if none was pending.
    pub async fn fire_next(&self) -> bool {
        let callback = {
            let mut pending = self.pending.lock().unwrap();
            pending
                .iter_mut()
                .find_map(|(_, _, cb)| cb.take())
        };
        match callback {
            Some(callback) => {
                callback().await;
                true
            }
            None => false,
        }
    }

    /// Fire every callback pending at the time of the call. Callbacks
    /// scheduled while firing are left pending.
    pub async fn fire_all(&self) {
        let callbacks: Vec<TimerCallback> = {
            let mut pending = self.pending.lock().unwrap();
            pending.iter_mut().filter_map(|(_, _, cb)| cb.take()).collect()
        };
        for callback in callbacks {
            callback().await;
        }
    }
}

#[cfg(test)]
impl TimerService for ManualTimer {
    fn schedule_once(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.pending
            .lock()
            .unwrap()
            .push((id, delay, Some(callback)));
        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) {
        let mut pending = self.pending.lock().unwrap();
        if let Some((_, _, cb)) = pending.iter_mut().find(|(id, _, _)| *id == handle.0) {
            *cb = None;
        }
    }
}
