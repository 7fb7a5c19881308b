//! # Step Scheduler
//!
//! Cancellable delayed actions keyed by unit of work (run, node walk) and
//! step index. Each armed timer owns a `CancellationToken`; firing and
//! revoking both claim the table entry under one lock, so a revoked timer
//! never fires and a fired timer can no longer be revoked.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::clock::DelayGenerator;
use crate::config::DelayRange;

/// Identifies one timer: a unit of work plus the step it advances
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimerKey {
    pub unit: String,
    pub step: usize,
}

impl TimerKey {
    pub fn new(unit: &str, step: usize) -> Self {
        Self {
            unit: unit.to_string(),
            step,
        }
    }
}

struct Entry {
    seq: u64,
    token: CancellationToken,
}

struct SchedulerInner {
    timers: Mutex<HashMap<TimerKey, Entry>>,
    delays: Arc<dyn DelayGenerator>,
    next_seq: AtomicU64,
}

impl SchedulerInner {
    fn timers(&self) -> MutexGuard<'_, HashMap<TimerKey, Entry>> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take ownership of an elapsed timer; false if it was revoked or
    /// replaced in the meantime
    fn claim(&self, key: &TimerKey, seq: u64) -> bool {
        let mut timers = self.timers();
        match timers.get(key) {
            Some(entry) if entry.seq == seq => {
                timers.remove(key);
                true
            }
            _ => false,
        }
    }
}

/// Handle to one armed timer
#[derive(Clone)]
pub struct TimerHandle {
    key: TimerKey,
    seq: u64,
    scheduler: Scheduler,
}

impl TimerHandle {
    pub fn key(&self) -> &TimerKey {
        &self.key
    }

    /// Revoke this timer if it is still pending
    pub fn revoke(&self) -> bool {
        let mut timers = self.scheduler.inner.timers();
        match timers.get(&self.key) {
            Some(entry) if entry.seq == self.seq => {
                if let Some(entry) = timers.remove(&self.key) {
                    entry.token.cancel();
                }
                true
            }
            _ => false,
        }
    }
}

/// Shared timer table
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(delays: Arc<dyn DelayGenerator>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                timers: Mutex::new(HashMap::new()),
                delays,
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Arm a timer. The returned future resolves to `true` once the delay
    /// elapsed and the timer was claimed, `false` if it was revoked.
    /// Arming a key that is already pending revokes the older timer.
    pub fn arm(
        &self,
        key: TimerKey,
        range: DelayRange,
    ) -> (TimerHandle, impl Future<Output = bool> + Send + 'static) {
        let delay = self.inner.delays.delay(range);
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        if let Some(old) = self.inner.timers().insert(
            key.clone(),
            Entry {
                seq,
                token: token.clone(),
            },
        ) {
            old.token.cancel();
        }
        tracing::debug!(unit = %key.unit, step = key.step, delay_ms = delay.as_millis() as u64, "Timer armed");

        let inner = Arc::clone(&self.inner);
        let claim_key = key.clone();
        let fired = async move {
            tokio::select! {
                _ = token.cancelled() => false,
                _ = tokio::time::sleep(delay) => inner.claim(&claim_key, seq),
            }
        };

        let handle = TimerHandle {
            key,
            seq,
            scheduler: self.clone(),
        };
        (handle, fired)
    }

    /// Run `action` after a delay unless revoked first
    pub fn schedule<F>(&self, key: TimerKey, range: DelayRange, action: F) -> (TimerHandle, JoinHandle<()>)
    where
        F: FnOnce() + Send + 'static,
    {
        let (handle, fired) = self.arm(key, range);
        let task = tokio::spawn(async move {
            if fired.await {
                action();
            }
        });
        (handle, task)
    }

    /// Wait in place for a delay; `false` if revoked
    pub async fn sleep(&self, key: TimerKey, range: DelayRange) -> bool {
        let (_, fired) = self.arm(key, range);
        fired.await
    }

    /// Revoke one pending timer
    pub fn revoke(&self, key: &TimerKey) -> bool {
        match self.inner.timers().remove(key) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Revoke every pending timer of a unit of work
    pub fn revoke_unit(&self, unit: &str) -> usize {
        let mut timers = self.inner.timers();
        let keys: Vec<TimerKey> = timers.keys().filter(|k| k.unit == unit).cloned().collect();
        for key in &keys {
            if let Some(entry) = timers.remove(key) {
                entry.token.cancel();
            }
        }
        if !keys.is_empty() {
            tracing::debug!(unit = %unit, revoked = keys.len(), "Timers revoked");
        }
        keys.len()
    }

    pub fn is_pending(&self, key: &TimerKey) -> bool {
        self.inner.timers().contains_key(key)
    }

    pub fn pending_for(&self, unit: &str) -> usize {
        self.inner.timers().keys().filter(|k| k.unit == unit).count()
    }
}
