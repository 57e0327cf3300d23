//! Progress hook that cancels a build at a chosen invocation.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use crate::engine::ProgressFn;

/// Counts progress callbacks and answers "cancel" exactly once, at the
/// armed invocation index.
#[derive(Debug)]
pub struct ProgressMonitor {
    break_at: AtomicI64,
    invocations: AtomicI64,
    trips: AtomicU64,
}

impl Default for ProgressMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressMonitor {
    /// Creates a disarmed monitor.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            break_at: AtomicI64::new(-1),
            invocations: AtomicI64::new(0),
            trips: AtomicU64::new(0),
        }
    }

    /// Disarms the monitor and zeroes the invocation counter.
    pub fn reset(&self) {
        self.break_at.store(-1, Ordering::SeqCst);
        self.invocations.store(0, Ordering::SeqCst);
    }

    /// Cancels the build on invocation `index` (zero based); `None` disarms.
    pub fn arm(&self, index: Option<u64>) {
        let at = index.map_or(-1, |i| i64::try_from(i).unwrap_or(i64::MAX));
        self.break_at.store(at, Ordering::SeqCst);
        self.invocations.store(0, Ordering::SeqCst);
    }

    /// Callbacks observed since the last reset.
    #[must_use]
    pub fn invocations(&self) -> u64 {
        u64::try_from(self.invocations.load(Ordering::SeqCst)).unwrap_or(0)
    }

    /// Cancellations requested over the monitor's lifetime.
    #[must_use]
    pub fn trips(&self) -> u64 {
        self.trips.load(Ordering::SeqCst)
    }

    /// The callback body.
    pub fn should_continue(&self, _progress: f64) -> bool {
        let n = self.invocations.fetch_add(1, Ordering::SeqCst);
        if n == self.break_at.load(Ordering::SeqCst) {
            self.trips.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(invocation = n, "progress monitor requests cancellation");
            return false;
        }
        true
    }

    /// Wraps the monitor as an engine hook.
    #[must_use]
    pub fn hook(self: &Arc<Self>) -> ProgressFn {
        let monitor = Arc::clone(self);
        Arc::new(move |progress| monitor.should_continue(progress))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disarmed_never_cancels() {
        let monitor = ProgressMonitor::new();
        assert!((0..100).all(|i| monitor.should_continue(f64::from(i) / 100.0)));
        assert_eq!(monitor.invocations(), 100);
        assert_eq!(monitor.trips(), 0);
    }

    #[test]
    fn cancels_exactly_at_armed_index() {
        let monitor = ProgressMonitor::new();
        monitor.arm(Some(3));
        let answers: Vec<bool> = (0..6).map(|_| monitor.should_continue(0.5)).collect();
        assert_eq!(answers, [true, true, true, false, true, true]);
        assert_eq!(monitor.trips(), 1);
    }

    #[test]
    fn hook_shares_counters() {
        let monitor = Arc::new(ProgressMonitor::new());
        monitor.arm(Some(0));
        let hook = monitor.hook();
        assert!(!hook(0.0));
        assert!(hook(1.0));
        assert_eq!(monitor.invocations(), 2);
    }
}
