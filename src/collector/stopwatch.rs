use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of microsecond timestamps.
pub trait Stopwatch: Send + Sync {
    fn microtime(&self) -> u64;
}

/// Wall clock, microseconds since the unix epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemStopwatch;

impl Stopwatch for SystemStopwatch {
    fn microtime(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualStopwatch {
    now: AtomicU64,
}

impl ManualStopwatch {
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    pub fn set(&self, micros: u64) {
        self.now.store(micros, Ordering::SeqCst);
    }

    pub fn advance(&self, micros: u64) {
        self.now.fetch_add(micros, Ordering::SeqCst);
    }
}

impl Stopwatch for ManualStopwatch {
    fn microtime(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
