//! Test registry, scenarios, and the run loop.
//!
//! Every test receives a [`RunContext`] with a fresh [`ErrorCounter`] and a
//! device factory. A test passes iff its expected outcome agrees with
//! "returned `Ok` and counted no errors"; a panicking test fails.

mod counter;
mod registry;
mod report;
pub mod scenarios;

pub use counter::ErrorCounter;
pub use registry::{Expected, GroupMarker, Registry, Test, TestFn};
pub use report::{RunSummary, Runner, TestResult};

use crate::config::HarnessConfig;
use crate::coordinator::TaskEnv;
use crate::engine::reference::{RefDevice, RefDeviceConfig};
use crate::engine::Device;
use crate::fault::FaultInjector;
use crate::oracle::RayOracle;

/// Builds the device a test runs against.
pub type DeviceFactory = dyn Fn(RefDeviceConfig) -> Box<dyn Device> + Send + Sync;

/// Factory producing [`RefDevice`]s.
#[must_use]
pub fn reference_factory() -> Box<DeviceFactory> {
    Box::new(|config| Box::new(RefDevice::new(config)))
}

/// What a running test can reach.
pub struct RunContext<'a> {
    config: &'a HarnessConfig,
    errors: &'a ErrorCounter,
    factory: &'a DeviceFactory,
}

impl std::fmt::Debug for RunContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("config", self.config)
            .field("errors", &self.errors.get())
            .finish_non_exhaustive()
    }
}

impl<'a> RunContext<'a> {
    /// Creates a context.
    #[must_use]
    pub fn new(config: &'a HarnessConfig, errors: &'a ErrorCounter, factory: &'a DeviceFactory) -> Self {
        Self {
            config,
            errors,
            factory,
        }
    }

    /// Harness configuration.
    #[must_use]
    pub const fn config(&self) -> &HarnessConfig {
        self.config
    }

    /// Error tally of the running test.
    #[must_use]
    pub const fn errors(&self) -> &ErrorCounter {
        self.errors
    }

    /// A device with the configured culling mode.
    #[must_use]
    pub fn device(&self) -> Box<dyn Device> {
        self.device_with(RefDeviceConfig::default().backface_culling(self.config.backface_culling))
    }

    /// A device with explicit options.
    #[must_use]
    pub fn device_with(&self, options: RefDeviceConfig) -> Box<dyn Device> {
        (self.factory)(options)
    }

    /// Ray oracle with the configured batch shape.
    #[must_use]
    pub const fn oracle(&self) -> RayOracle {
        RayOracle::new(self.config.oracle)
    }

    /// Scene index `offset` positions past the configured base.
    #[must_use]
    pub const fn scene_index(&self, offset: usize) -> usize {
        (self.config.seed_base as usize).wrapping_add(offset)
    }

    /// Task environment over `device`, counting into `errors`.
    #[must_use]
    pub const fn task_env<'d>(
        &self,
        device: &'d dyn Device,
        errors: &'d ErrorCounter,
        faults: Option<&'d FaultInjector>,
    ) -> TaskEnv<'d> {
        TaskEnv {
            device,
            errors,
            faults,
            oracle: self.oracle(),
            mutation: self.config.mutation,
        }
    }
}
