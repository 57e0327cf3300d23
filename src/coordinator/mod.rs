//! Multi-threaded mutate/build/verify cycles over one scene.
//!
//! A [`RegressionTask`] runs `scene_count` iterations. Each iteration moves
//! through `Mutate -> BarrierA -> Build -> BarrierB -> Verify`:
//!
//! - `Mutate`: the driver (thread 0) applies one mutation pass, then
//!   publishes the scene and `num_active` in `[1, thread_count]`.
//! - `BarrierA`: every thread arrives, participating or not.
//! - `Build`: threads with `index < num_active` commit according to the
//!   task's [`CommitMode`] and check their own error status.
//! - `BarrierB`: every thread arrives again; nothing mutates the scene while
//!   any thread is still building.
//! - `Verify`: the driver fires the ray oracle if its build was clean.
//!
//! Every thread performs exactly two rendezvous per iteration. A failed
//! mutation abandons the iteration, but the rendezvous still happen so the
//! pool stays in lock step. A worker that panics breaks the barrier on
//! unwind; its peers observe `BarrierBroken`, count it, and leave their loop.

mod pool;
mod task;

pub use pool::{panic_message, run_inline, WorkerFailure, WorkerPool};
pub use task::{RegressionTask, TaskEnv, TaskReport, ThreadRegressionTask};

/// How participating threads build the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    /// One thread, ordinary commit.
    Single,
    /// Every participant calls the collaborative commit twice.
    Partial,
    /// Every participant calls the ordinary commit concurrently.
    Join,
}

impl CommitMode {
    /// Name used in test names.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Partial => "user_threads",
            Self::Join => "build_join",
        }
    }

    /// Returns true if the mode runs a thread pool.
    #[must_use]
    pub const fn is_threaded(self) -> bool {
        !matches!(self, Self::Single)
    }
}
