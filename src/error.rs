//! Error types and error handling strategy for the stress harness.
//!
//! Error handling follows these principles:
//!
//! - Engine failures are reported through a status query after every call and
//!   converted into a typed [`Error`] at the call site
//! - A failure aborts only the current iteration; the runner tallies it
//! - Panics inside workers are caught and converted to `WorkerPanicked`
//! - Protocol failures (a broken barrier) never strand peer threads
//!
//! # Error Categories
//!
//! - **Engine**: status codes reported by the acceleration-structure engine
//! - **Injection**: failures deliberately provoked by the fault monitors
//! - **Protocol**: worker pool and barrier failures
//! - **Oracle**: post-condition violations (leaked memory, unexpected hits)
//! - **Harness**: configuration and test selection problems

use core::fmt;
use std::sync::Arc;

use crate::engine::EngineError;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Injection ===
    /// The progress monitor requested cancellation of a build.
    BuildCancelled,
    /// The memory monitor denied an allocation.
    OutOfMemory,

    // === Engine ===
    /// Operation not legal in the current state (e.g. commit with a mapped buffer).
    InvalidOperation,
    /// Argument rejected by the engine.
    InvalidArgument,
    /// Any other failure, including faults escaping a worker.
    UnknownFailure,

    // === Protocol ===
    /// A peer died while others waited at a rendezvous.
    BarrierBroken,
    /// A worker thread panicked.
    WorkerPanicked,

    // === Oracle ===
    /// Memory accounting did not return to zero.
    MemoryLeak,
    /// A ray query produced an outcome the scenario forbids.
    UnexpectedHit,

    // === Harness ===
    /// Invalid harness configuration.
    Config,
    /// Invalid test selection pattern.
    Selection,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::BuildCancelled | Self::OutOfMemory => ErrorCategory::Injection,
            Self::InvalidOperation | Self::InvalidArgument | Self::UnknownFailure => {
                ErrorCategory::Engine
            }
            Self::BarrierBroken | Self::WorkerPanicked => ErrorCategory::Protocol,
            Self::MemoryLeak | Self::UnexpectedHit => ErrorCategory::Oracle,
            Self::Config | Self::Selection => ErrorCategory::Harness,
        }
    }

    /// Returns true if this failure was provoked on purpose by a fault monitor.
    ///
    /// Injected failures are still counted; the distinction only matters for
    /// logging and statistics.
    #[must_use]
    pub const fn is_injected(&self) -> bool {
        matches!(self.category(), ErrorCategory::Injection)
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Engine-reported status codes.
    Engine,
    /// Failures triggered by fault injection.
    Injection,
    /// Worker and rendezvous failures.
    Protocol,
    /// Post-condition violations.
    Oracle,
    /// Configuration and selection problems.
    Harness,
}

/// Where in the regression loop an error surfaced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Scene index of the owning task.
    pub scene_index: Option<usize>,
    /// Iteration within the task.
    pub iteration: Option<usize>,
    /// Worker thread index (0 = driver).
    pub thread_index: Option<usize>,
}

/// The main error type for harness operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    context: ErrorContext,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
            context: ErrorContext {
                scene_index: None,
                iteration: None,
                thread_index: None,
            },
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds loop position context to the error.
    #[must_use]
    pub const fn with_context(mut self, ctx: ErrorContext) -> Self {
        self.context = ctx;
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the loop position context.
    #[must_use]
    pub const fn context(&self) -> &ErrorContext {
        &self.context
    }

    /// Returns true if the build was cancelled by the progress monitor.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::BuildCancelled)
    }

    /// Creates an error for a worker panic, keeping the payload text.
    #[must_use]
    pub fn worker_panicked(thread_index: usize, payload: &str) -> Self {
        Self::new(ErrorKind::WorkerPanicked)
            .with_message(format!("worker {thread_index} panicked: {payload}"))
            .with_context(ErrorContext {
                thread_index: Some(thread_index),
                ..ErrorContext::default()
            })
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config).with_message(detail)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<EngineError> for Error {
    fn from(code: EngineError) -> Self {
        let kind = match code {
            EngineError::Cancelled => ErrorKind::BuildCancelled,
            EngineError::OutOfMemory => ErrorKind::OutOfMemory,
            EngineError::InvalidOperation => ErrorKind::InvalidOperation,
            EngineError::InvalidArgument => ErrorKind::InvalidArgument,
            EngineError::Unknown | EngineError::UnsupportedCpu => ErrorKind::UnknownFailure,
        };
        Self::new(kind).with_source(code)
    }
}

impl From<crate::sync::BarrierWaitError> for Error {
    fn from(e: crate::sync::BarrierWaitError) -> Self {
        Self::new(ErrorKind::BarrierBroken).with_source(e)
    }
}

/// Extension trait for adding context to Results.
#[allow(clippy::result_large_err)]
pub trait ResultExt<T> {
    /// Attach a context message on error.
    fn context(self, msg: impl Into<String>) -> Result<T>;
    /// Attach context message computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_message(msg))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_message(f()))
    }
}

/// A specialized Result type for harness operations.
#[allow(clippy::result_large_err)]
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn display_without_message() {
        let err = Error::new(ErrorKind::UnknownFailure);
        assert_eq!(err.to_string(), "UnknownFailure");
    }

    #[test]
    fn display_with_message() {
        let err = Error::new(ErrorKind::OutOfMemory).with_message("arena growth denied");
        assert_eq!(err.to_string(), "OutOfMemory: arena growth denied");
    }

    #[test]
    fn engine_codes_map_to_taxonomy() {
        let cases = [
            (EngineError::Cancelled, ErrorKind::BuildCancelled),
            (EngineError::OutOfMemory, ErrorKind::OutOfMemory),
            (EngineError::InvalidOperation, ErrorKind::InvalidOperation),
            (EngineError::InvalidArgument, ErrorKind::InvalidArgument),
            (EngineError::Unknown, ErrorKind::UnknownFailure),
            (EngineError::UnsupportedCpu, ErrorKind::UnknownFailure),
        ];
        for (code, kind) in cases {
            let err: Error = code.into();
            assert_eq!(err.kind(), kind);
            assert!(err.source().is_some());
        }
    }

    #[test]
    fn injected_kinds_are_flagged() {
        assert!(ErrorKind::BuildCancelled.is_injected());
        assert!(ErrorKind::OutOfMemory.is_injected());
        assert!(!ErrorKind::InvalidOperation.is_injected());
        assert_eq!(ErrorKind::BarrierBroken.category(), ErrorCategory::Protocol);
    }

    #[test]
    fn result_ext_adds_message() {
        let res: core::result::Result<(), EngineError> = Err(EngineError::InvalidOperation);
        let err = res.context("commit failed").expect_err("expected err");
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
        assert_eq!(err.to_string(), "InvalidOperation: commit failed");
    }

    #[test]
    fn worker_panic_carries_thread_index() {
        let err = Error::worker_panicked(3, "boom");
        assert_eq!(err.kind(), ErrorKind::WorkerPanicked);
        assert_eq!(err.context().thread_index, Some(3));
        assert_eq!(err.message(), Some("worker 3 panicked: boom"));
    }
}
