//! The run-wide error tally.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::Error;

/// Counts every non-clean status check of a test.
///
/// One counter is owned per test run and handed by reference to every
/// worker; a test passes iff the counter is zero when it finishes.
#[derive(Debug, Default)]
pub struct ErrorCounter {
    count: AtomicUsize,
}

impl ErrorCounter {
    /// Creates a zeroed counter.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
        }
    }

    /// Tallies one error and logs it.
    pub fn record(&self, err: &Error) {
        let ctx = err.context();
        tracing::debug!(
            kind = ?err.kind(),
            injected = err.kind().is_injected(),
            scene_index = ?ctx.scene_index,
            iteration = ?ctx.iteration,
            thread_index = ?ctx.thread_index,
            error = %err,
            "error counted"
        );
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    /// Tallies every error in `errs`.
    pub fn record_all<'a>(&self, errs: impl IntoIterator<Item = &'a Error>) {
        for err in errs {
            self.record(err);
        }
    }

    /// Current tally.
    #[must_use]
    pub fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Returns true if nothing was counted.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.get() == 0
    }

    /// Zeroes the tally.
    pub fn reset(&self) {
        self.count.store(0, Ordering::SeqCst);
    }
}
