//! Memory hook that tracks outstanding bytes and denies one allocation.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use crate::engine::MemoryFn;

/// Accumulates every byte delta the engine reports and denies the positive
/// delta at the armed invocation index.
///
/// A denied pre-allocation request (`post == false`) is subtracted again
/// because the engine will not perform it. A denied post-allocation report
/// stays counted: the engine already holds those bytes and must release
/// them on its unwind path.
#[derive(Debug)]
pub struct MemoryMonitor {
    break_at: AtomicI64,
    invocations: AtomicI64,
    bytes_used: AtomicI64,
    denials: AtomicU64,
}

impl Default for MemoryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMonitor {
    /// Creates a disarmed monitor.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            break_at: AtomicI64::new(-1),
            invocations: AtomicI64::new(0),
            bytes_used: AtomicI64::new(0),
            denials: AtomicU64::new(0),
        }
    }

    /// Disarms the monitor and zeroes the invocation counter. Outstanding
    /// bytes are kept.
    pub fn reset(&self) {
        self.break_at.store(-1, Ordering::SeqCst);
        self.invocations.store(0, Ordering::SeqCst);
    }

    /// Denies the allocation at invocation `index`; `None` disarms.
    pub fn arm(&self, index: Option<u64>) {
        let at = index.map_or(-1, |i| i64::try_from(i).unwrap_or(i64::MAX));
        self.break_at.store(at, Ordering::SeqCst);
        self.invocations.store(0, Ordering::SeqCst);
    }

    /// Positive deltas observed since the last reset.
    #[must_use]
    pub fn invocations(&self) -> u64 {
        u64::try_from(self.invocations.load(Ordering::SeqCst)).unwrap_or(0)
    }

    /// Bytes the engine currently holds according to its reports.
    #[must_use]
    pub fn bytes_used(&self) -> i64 {
        self.bytes_used.load(Ordering::SeqCst)
    }

    /// Allocations denied over the monitor's lifetime.
    #[must_use]
    pub fn denials(&self) -> u64 {
        self.denials.load(Ordering::SeqCst)
    }

    /// The callback body.
    pub fn on_event(&self, bytes: i64, post: bool) -> bool {
        self.bytes_used.fetch_add(bytes, Ordering::SeqCst);
        if bytes > 0 {
            let n = self.invocations.fetch_add(1, Ordering::SeqCst);
            if n == self.break_at.load(Ordering::SeqCst) {
                if !post {
                    self.bytes_used.fetch_sub(bytes, Ordering::SeqCst);
                }
                self.denials.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(invocation = n, bytes, post, "memory monitor denies allocation");
                return false;
            }
        }
        true
    }

    /// Wraps the monitor as an engine hook.
    #[must_use]
    pub fn hook(self: &Arc<Self>) -> MemoryFn {
        let monitor = Arc::clone(self);
        Arc::new(move |bytes, post| monitor.on_event(bytes, post))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_deltas_return_to_zero() {
        let monitor = MemoryMonitor::new();
        assert!(monitor.on_event(128, false));
        assert!(monitor.on_event(64, true));
        assert!(monitor.on_event(-192, true));
        assert_eq!(monitor.bytes_used(), 0);
        assert_eq!(monitor.invocations(), 2);
    }

    #[test]
    fn denied_pre_allocation_is_not_counted() {
        let monitor = MemoryMonitor::new();
        monitor.arm(Some(1));
        assert!(monitor.on_event(10, false));
        assert!(!monitor.on_event(20, false));
        assert_eq!(monitor.bytes_used(), 10);
        assert_eq!(monitor.denials(), 1);
    }

    #[test]
    fn denied_post_allocation_stays_counted() {
        let monitor = MemoryMonitor::new();
        monitor.arm(Some(0));
        assert!(!monitor.on_event(20, true));
        assert_eq!(monitor.bytes_used(), 20);
        assert!(monitor.on_event(-20, true));
        assert_eq!(monitor.bytes_used(), 0);
    }

    #[test]
    fn releases_do_not_advance_the_counter() {
        let monitor = MemoryMonitor::new();
        monitor.arm(Some(1));
        assert!(monitor.on_event(5, false));
        assert!(monitor.on_event(-5, true));
        assert!(!monitor.on_event(5, false));
    }
}
