//! Monotonic microsecond time source.
//!
//! The gateway timestamps every received frame and schedules downlinks
//! against a free-running 32-bit microsecond counter (the Semtech `tmst`
//! field). The counter wraps every ~71.6 minutes, so all comparisons go
//! through [`us_delta`], which is wrap-aware.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Monotonic microsecond clock.
///
/// Implementations must be cheap to call and safe to use from the radio
/// interrupt path. On ESP32 this is backed by `esp_timer_get_time`; on the
/// host by [`StdClock`].
pub trait MonotonicClock: Send + Sync {
    /// Current counter value in microseconds, wrapping modulo 2^32.
    fn now_us(&self) -> u32;
}

/// Signed difference `t - reference` on the wrapping 32-bit counter.
///
/// Positive means `t` lies in the future relative to `reference`, negative
/// in the past. Valid for deltas up to ±2^31 µs (~35.8 minutes).
pub fn us_delta(t: u32, reference: u32) -> i32 {
    t.wrapping_sub(reference) as i32
}

/// Host clock based on [`Instant`], counting from construction.
pub struct StdClock {
    start: Instant,
}

impl StdClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for StdClock {
    fn now_us(&self) -> u32 {
        self.start.elapsed().as_micros() as u32
    }
}

/// Manually advanced clock for tests.
///
/// Shared freely via `Arc`; `advance` and `set` are visible to every clone.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<AtomicU32>,
}

impl ManualClock {
    pub fn new(start_us: u32) -> Self {
        Self {
            now: Arc::new(AtomicU32::new(start_us)),
        }
    }

    pub fn advance(&self, us: u32) {
        self.now.fetch_add(us, Ordering::SeqCst);
    }

    pub fn set(&self, us: u32) {
        self.now.store(us, Ordering::SeqCst);
    }
}

impl MonotonicClock for ManualClock {
    fn now_us(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }
}
