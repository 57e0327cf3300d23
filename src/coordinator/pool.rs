//! Scoped worker pool: spawn a batch, join all, report per-worker faults.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crossbeam_queue::SegQueue;

use crate::error::{Error, ErrorKind};

/// Why a worker did not finish normally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerFailure {
    /// The worker body panicked.
    Panicked {
        /// Worker index.
        thread_index: usize,
        /// Panic payload text.
        message: String,
    },
    /// The OS refused to start the thread.
    SpawnFailed {
        /// Worker index.
        thread_index: usize,
        /// OS error text.
        message: String,
    },
}

impl WorkerFailure {
    /// Index of the failed worker.
    #[must_use]
    pub const fn thread_index(&self) -> usize {
        match self {
            Self::Panicked { thread_index, .. } | Self::SpawnFailed { thread_index, .. } => {
                *thread_index
            }
        }
    }

    /// Converts the failure into a counted error.
    #[must_use]
    pub fn into_error(self) -> Error {
        match self {
            Self::Panicked {
                thread_index,
                message,
            } => Error::worker_panicked(thread_index, &message),
            Self::SpawnFailed {
                thread_index,
                message,
            } => Error::new(ErrorKind::UnknownFailure)
                .with_message(format!("failed to spawn worker {thread_index}: {message}")),
        }
    }
}

/// Extracts the text of a panic payload.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Runs `body` on the calling thread, converting a panic into a failure.
pub fn run_inline(thread_index: usize, body: impl FnOnce()) -> Option<WorkerFailure> {
    panic::catch_unwind(AssertUnwindSafe(body))
        .err()
        .map(|payload| WorkerFailure::Panicked {
            thread_index,
            message: panic_message(payload.as_ref()),
        })
}

/// Spawns named OS threads for one task and joins them all.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    name_prefix: String,
}

impl WorkerPool {
    /// Creates a pool whose threads are named `{prefix}-{index}`.
    #[must_use]
    pub fn new(name_prefix: impl Into<String>) -> Self {
        Self {
            name_prefix: name_prefix.into(),
        }
    }

    /// Runs `body(index)` on `count` threads and waits for all of them.
    ///
    /// If a spawn fails, `abort` is called so that already running workers
    /// blocked on a rendezvous with the missing thread can bail out.
    pub fn run<F>(&self, count: usize, body: F, abort: &(dyn Fn() + Sync)) -> Vec<WorkerFailure>
    where
        F: Fn(usize) + Sync,
    {
        let failures = SegQueue::new();
        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(count);
            for thread_index in 0..count {
                let builder =
                    thread::Builder::new().name(format!("{}-{thread_index}", self.name_prefix));
                let body = &body;
                let failures = &failures;
                let spawned = builder.spawn_scoped(scope, move || {
                    if let Some(failure) = run_inline(thread_index, || body(thread_index)) {
                        failures.push(failure);
                    }
                });
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(err) => {
                        tracing::error!(thread_index, error = %err, "worker spawn failed");
                        failures.push(WorkerFailure::SpawnFailed {
                            thread_index,
                            message: err.to_string(),
                        });
                        abort();
                        break;
                    }
                }
            }
            for handle in handles {
                let _ = handle.join();
            }
        });

        let mut out = Vec::new();
        while let Some(failure) = failures.pop() {
            out.push(failure);
        }
        out.sort_by_key(WorkerFailure::thread_index);
        out
    }
}
