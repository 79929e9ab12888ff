//! Timing for blocking waits
//!
//! Device workers block on stream synchronisation and completion fences. A wait that takes longer
//! than the slow-wait threshold usually means a stalled device or a starved poller, so it is
//! reported at `warn`; everything else goes out at `trace`.
//!
//! ```rust
//! use memzone_tracing::WaitTimer;
//!
//! {
//!     let _timer = WaitTimer::start("sync_device");
//!     // ... block on the device ...
//! } // logged on drop
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Threshold used when neither the configuration nor the caller provides one.
pub const DEFAULT_SLOW_WAIT: Duration = Duration::from_millis(10);

static SLOW_WAIT_US: AtomicU64 = AtomicU64::new(DEFAULT_SLOW_WAIT.as_micros() as u64);

/// Set the process-wide slow-wait threshold used by [`WaitTimer::start`].
pub fn set_slow_wait_threshold(threshold: Duration) {
    SLOW_WAIT_US.store(threshold.as_micros().min(u128::from(u64::MAX)) as u64, Ordering::Relaxed);
}

/// Current process-wide slow-wait threshold.
pub fn slow_wait_threshold() -> Duration {
    Duration::from_micros(SLOW_WAIT_US.load(Ordering::Relaxed))
}

/// RAII guard that measures a blocking wait and logs it when dropped.
#[must_use = "the wait is measured until the timer is dropped"]
pub struct WaitTimer {
    operation: &'static str,
    threshold: Duration,
    start_time: Instant,
}

impl WaitTimer {
    /// Start timing `operation` against the process-wide threshold.
    pub fn start(operation: &'static str) -> Self {
        Self::with_threshold(operation, slow_wait_threshold())
    }

    /// Start timing `operation` against an explicit threshold.
    pub fn with_threshold(operation: &'static str, threshold: Duration) -> Self {
        Self {
            operation,
            threshold,
            start_time: Instant::now(),
        }
    }

    /// Time elapsed since the timer started.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Whether the wait has already crossed the slow-wait threshold.
    pub fn is_slow(&self) -> bool {
        self.elapsed() >= self.threshold
    }
}

impl Drop for WaitTimer {
    fn drop(&mut self) {
        let elapsed = self.elapsed();
        let elapsed_us = elapsed.as_micros() as u64;

        if elapsed >= self.threshold {
            tracing::warn!(
                operation = self.operation,
                duration_us = elapsed_us,
                threshold_us = self.threshold.as_micros() as u64,
                "slow_wait"
            );
        } else {
            tracing::trace!(operation = self.operation, duration_us = elapsed_us, "wait_complete");
        }
    }
}
