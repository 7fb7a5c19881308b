//! # Clock and Delay Sources
//!
//! Injected into the engines so tests can pin time and make simulated
//! durations deterministic.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::DelayRange;

/// Source of wall-clock timestamps
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = *now + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Produces the simulated duration of one step
pub trait DelayGenerator: Send + Sync {
    fn delay(&self, range: DelayRange) -> Duration;
}

/// Uniform random delay in `[min, max)`
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomDelay;

impl DelayGenerator for RandomDelay {
    fn delay(&self, range: DelayRange) -> Duration {
        if range.max_ms <= range.min_ms {
            return range.min();
        }
        Duration::from_millis(rand::thread_rng().gen_range(range.min_ms..range.max_ms))
    }
}

/// Always the same delay, regardless of range
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

impl FixedDelay {
    pub fn zero() -> Self {
        Self(Duration::ZERO)
    }
}

impl DelayGenerator for FixedDelay {
    fn delay(&self, _range: DelayRange) -> Duration {
        self.0
    }
}
