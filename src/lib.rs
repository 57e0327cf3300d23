//! scene-stress: randomized concurrent stress and fault-injection harness for
//! acceleration-structure scene engines.
//!
//! # Overview
//!
//! The harness hammers an engine with deterministic random sequences of
//! geometry creation, mutation and deletion, drives its builds from pools of
//! cooperating threads, trips cancellation and allocation failures at exact
//! points, and checks that the engine unwinds cleanly and still answers ray
//! queries afterwards.
//!
//! # Core Guarantees
//!
//! - **Reproducible**: every random decision derives from `(scene_index, iteration)`
//! - **Two rendezvous per iteration**: no thread mutates a scene another thread is building
//! - **No stranded peers**: a dying worker breaks the barrier on unwind
//! - **Exact trip points**: fault monitors are calibrated on a dry run, then armed
//! - **Counted, not thrown**: every failed status check increments one tally
//!
//! # Module Structure
//!
//! - [`engine`]: the `Device` collaborator contract and an in-process reference engine
//! - [`mutation`]: deterministic scene mutation and mesh builders
//! - [`fault`]: progress and memory monitors with calibrate-then-arm plans
//! - [`coordinator`]: regression tasks, the barrier protocol and the worker pool
//! - [`oracle`]: ray liveness and memory-leak post-conditions
//! - [`runner`]: test registry, scenarios and reporting
//! - [`sync`]: generation-counted cyclic barrier
//! - [`config`]: layered harness configuration
//! - [`cli`]: exit codes and console output
//! - [`util`]: deterministic RNG
//! - [`error`]: error types

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(dead_code)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod fault;
pub mod mutation;
pub mod oracle;
pub mod runner;
pub mod sync;
pub mod util;

#[doc(hidden)]
pub mod test_utils;

// Re-exports for convenient access to core types
pub use config::{ConfigError, HarnessConfig};
pub use coordinator::{CommitMode, RegressionTask, TaskEnv, TaskReport};
pub use engine::reference::{RefDevice, RefDeviceConfig};
pub use engine::Device;
pub use error::{Error, ErrorCategory, ErrorContext, ErrorKind, Result, ResultExt};
pub use fault::{FaultConfig, FaultInjector, FaultPlan};
pub use mutation::{MutationConfig, MutationGenerator, SceneMode};
pub use oracle::{MemoryLeakOracle, OracleViolation, RayOracle, RayOracleConfig};
pub use runner::{ErrorCounter, Expected, Registry, RunSummary, Runner};
