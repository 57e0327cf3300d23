//! Synchronization primitives used by the worker pool.
//!
//! - [`Barrier`]: generation-counted N-way rendezvous that can be broken

mod barrier;

pub use barrier::{Barrier, BarrierWaitError, BarrierWaitResult, BreakOnUnwind};
