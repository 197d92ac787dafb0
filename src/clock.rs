// src/clock.rs
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use once_cell::sync::Lazy;

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Source of "now" for deciding when a finished trial may be aggregated.
pub trait Clock: Send + Sync {
    fn now_ticks(&self) -> i64;
}

/// Software ticks since the first call into this module.
pub fn software_now(ticks_per_second: u64) -> i64 {
    let nanos = EPOCH.elapsed().as_nanos();
    (nanos * ticks_per_second as u128 / 1_000_000_000) as i64
}

/// Converts a sample offset inside a block into software ticks.
pub fn samples_to_ticks(samples: i64, sample_rate_hz: f32, ticks_per_second: f64) -> i64 {
    (samples as f64 * ticks_per_second / sample_rate_hz as f64).round() as i64
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    ticks_per_second: u64,
}

impl SystemClock {
    pub fn new(ticks_per_second: u64) -> Self {
        Lazy::force(&EPOCH);
        Self { ticks_per_second }
    }
}

impl Clock for SystemClock {
    fn now_ticks(&self) -> i64 {
        software_now(self.ticks_per_second)
    }
}

/// Clock that only moves when told to. Drives simulations and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, ticks: i64) {
        self.now.store(ticks, Ordering::Release);
    }

    pub fn advance(&self, ticks: i64) -> i64 {
        self.now.fetch_add(ticks, Ordering::AcqRel) + ticks
    }
}

impl Clock for ManualClock {
    fn now_ticks(&self) -> i64 {
        self.now.load(Ordering::Acquire)
    }
}
