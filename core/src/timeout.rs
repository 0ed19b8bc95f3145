//! Runaway script detection
//!
//! The script loop refreshes an activity timestamp at every frame boundary.
//! The hook compares it against the budget on every line and raises
//! [`TIMEOUT_MESSAGE`](crate::error::TIMEOUT_MESSAGE) once it is exceeded.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::DEFAULT_TIMEOUT_NS;

/// Budget value that disables the check
pub const TIMEOUT_DISABLED: i64 = -1;

/// Watches how long the script went without yielding a frame
#[derive(Debug)]
pub struct TimeoutMonitor {
    /// Budget in nanoseconds, `<= 0` disables the check
    timeout_ns: AtomicI64,
    /// Value restored by [`finish`](Self::finish)
    default_ns: i64,
    origin: Instant,
    /// Last activity, nanoseconds since `origin`
    activity_ns: AtomicU64,
}

impl Default for TimeoutMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT_NS)
    }
}

impl TimeoutMonitor {
    pub fn new(default_ns: i64) -> Self {
        let default_ns = clamp(default_ns);
        Self {
            timeout_ns: AtomicI64::new(default_ns),
            default_ns,
            origin: Instant::now(),
            activity_ns: AtomicU64::new(0),
        }
    }

    /// Current budget in nanoseconds
    pub fn timeout(&self) -> i64 {
        self.timeout_ns.load(Ordering::Acquire)
    }

    /// Sets the budget; values below -1 are clamped to -1
    pub fn set_timeout(&self, ns: i64) {
        let ns = clamp(ns);
        debug!(timeout_ns = ns, "script timeout changed");
        self.timeout_ns.store(ns, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.timeout() > 0
    }

    /// Records that the script made progress
    pub fn activate(&self) {
        let now = self.origin.elapsed().as_nanos();
        self.activity_ns
            .store(u64::try_from(now).unwrap_or(u64::MAX), Ordering::Release);
    }

    /// Time since the last [`activate`](Self::activate)
    pub fn idle(&self) -> Duration {
        let last = Duration::from_nanos(self.activity_ns.load(Ordering::Acquire));
        self.origin.elapsed().saturating_sub(last)
    }

    /// Whether the budget is enabled and has been used up
    pub fn expired(&self) -> bool {
        let timeout = self.timeout();
        if timeout <= 0 {
            return false;
        }
        self.idle() >= Duration::from_nanos(timeout as u64)
    }

    /// Restores the default budget at the end of a run.
    ///
    /// A budget the user disabled with -1 stays disabled.
    pub fn finish(&self) {
        if self.timeout() >= 0 {
            self.timeout_ns.store(self.default_ns, Ordering::Release);
        }
    }
}

fn clamp(ns: i64) -> i64 {
    ns.max(TIMEOUT_DISABLED)
}
