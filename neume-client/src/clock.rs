//! Injected time source for resolving scheduling offsets.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in seconds since the UNIX epoch. Injected rather
/// than read from a global so scheduling is testable with a fixed clock.
pub trait Clock: Send {
    fn now_secs(&self) -> f64;
}

/// The real wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// A settable clock for tests.
pub struct ManualClock {
    secs: Mutex<f64>,
}

impl ManualClock {
    pub fn at(secs: f64) -> Self {
        Self {
            secs: Mutex::new(secs),
        }
    }

    pub fn set(&self, secs: f64) {
        if let Ok(mut guard) = self.secs.lock() {
            *guard = secs;
        }
    }

    pub fn advance(&self, delta_secs: f64) {
        if let Ok(mut guard) = self.secs.lock() {
            *guard += delta_secs;
        }
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> f64 {
        self.secs.lock().map(|guard| *guard).unwrap_or(0.0)
    }
}
