//! Fault injection through the engine's memory and progress hooks.
//!
//! Faults are not random per call. A scenario first runs a task with both
//! monitors disarmed to learn how many times each hook fires, then draws a
//! single trip point per monitor from that count and replays the task. The
//! replay must hit the engine's error path at a realistic point and still
//! leave the memory accounting balanced.
//!
//! # Presets
//!
//! | Preset | Memory | Progress |
//! |--------|--------|----------|
//! | [`FaultConfig::off()`] | off | off |
//! | [`FaultConfig::memory_only()`] | `[0, n)` | off |
//! | [`FaultConfig::progress_only()`] | off | `[0, 2n)` |
//! | [`FaultConfig::full()`] | `[0, n)` | `[0, 2n)` |
//!
//! The progress range deliberately overshoots the observed count so some
//! replays run to completion without cancellation.

mod memory;
mod progress;

use std::sync::Arc;

pub use memory::MemoryMonitor;
pub use progress::ProgressMonitor;

use crate::engine::{Device, SceneId};
use crate::util::DetRng;

/// Which monitors are active and how trip points are drawn.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FaultConfig {
    /// Install the memory hook.
    pub memory: bool,
    /// Install the progress hook.
    pub progress: bool,
    /// Memory trip point is drawn from `[0, invocations * memory_overshoot)`.
    pub memory_overshoot: f64,
    /// Progress trip point is drawn from `[0, invocations * progress_overshoot)`.
    pub progress_overshoot: f64,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self::off()
    }
}

impl FaultConfig {
    /// No hooks installed.
    #[must_use]
    pub const fn off() -> Self {
        Self {
            memory: false,
            progress: false,
            memory_overshoot: 1.0,
            progress_overshoot: 2.0,
        }
    }

    /// Memory denial only.
    #[must_use]
    pub const fn memory_only() -> Self {
        Self {
            memory: true,
            ..Self::off()
        }
    }

    /// Build cancellation only.
    #[must_use]
    pub const fn progress_only() -> Self {
        Self {
            progress: true,
            ..Self::off()
        }
    }

    /// Both monitors.
    #[must_use]
    pub const fn full() -> Self {
        Self {
            memory: true,
            progress: true,
            ..Self::off()
        }
    }

    /// Sets the memory overshoot factor.
    ///
    /// # Panics
    ///
    /// Panics if `factor` is negative or not finite.
    #[must_use]
    pub fn with_memory_overshoot(mut self, factor: f64) -> Self {
        assert!(
            factor.is_finite() && factor >= 0.0,
            "overshoot must be finite and non-negative, got {factor}"
        );
        self.memory_overshoot = factor;
        self
    }

    /// Sets the progress overshoot factor.
    ///
    /// # Panics
    ///
    /// Panics if `factor` is negative or not finite.
    #[must_use]
    pub fn with_progress_overshoot(mut self, factor: f64) -> Self {
        assert!(
            factor.is_finite() && factor >= 0.0,
            "overshoot must be finite and non-negative, got {factor}"
        );
        self.progress_overshoot = factor;
        self
    }

    /// Returns true if any monitor is enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.memory || self.progress
    }
}

/// Trip points for one replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct FaultPlan {
    /// Memory invocation to deny.
    pub memory_break: Option<u64>,
    /// Progress invocation to cancel at.
    pub progress_break: Option<u64>,
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation
)]
fn scaled(count: u64, factor: f64, rng: &mut DetRng) -> u64 {
    (count as f64 * factor * rng.next_f64()) as u64
}

impl FaultPlan {
    /// Draws trip points from the invocation counts of a dry run.
    #[must_use]
    pub fn from_dry_run(
        memory_invocations: u64,
        progress_invocations: u64,
        rng: &mut DetRng,
        config: &FaultConfig,
    ) -> Self {
        let memory_break = scaled(memory_invocations, config.memory_overshoot, rng);
        let progress_break = scaled(progress_invocations, config.progress_overshoot, rng);
        Self {
            memory_break: config.memory.then_some(memory_break),
            progress_break: config.progress.then_some(progress_break),
        }
    }
}

/// Counters exposed after a scenario.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct FaultStats {
    /// Positive memory deltas since the last reset.
    pub memory_invocations: u64,
    /// Progress callbacks since the last reset.
    pub progress_invocations: u64,
    /// Allocations denied.
    pub memory_denials: u64,
    /// Builds cancelled.
    pub cancellations: u64,
    /// Outstanding bytes.
    pub bytes_used: i64,
}

/// Owns both monitors and installs them on a device and its scenes.
#[derive(Debug, Clone)]
pub struct FaultInjector {
    config: FaultConfig,
    memory: Arc<MemoryMonitor>,
    progress: Arc<ProgressMonitor>,
}

impl FaultInjector {
    /// Creates an injector with disarmed monitors.
    #[must_use]
    pub fn new(config: FaultConfig) -> Self {
        Self {
            config,
            memory: Arc::new(MemoryMonitor::new()),
            progress: Arc::new(ProgressMonitor::new()),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &FaultConfig {
        &self.config
    }

    /// The memory monitor.
    #[must_use]
    pub fn memory(&self) -> &Arc<MemoryMonitor> {
        &self.memory
    }

    /// The progress monitor.
    #[must_use]
    pub fn progress(&self) -> &Arc<ProgressMonitor> {
        &self.progress
    }

    /// Installs the memory hook on the device if enabled.
    pub fn attach_device(&self, device: &dyn Device) {
        if self.config.memory {
            device.set_memory_monitor(Some(self.memory.hook()));
        }
    }

    /// Removes the memory hook.
    pub fn detach_device(&self, device: &dyn Device) {
        if self.config.memory {
            device.set_memory_monitor(None);
        }
    }

    /// Installs the progress hook on a scene if enabled.
    pub fn attach_scene(&self, device: &dyn Device, scene: SceneId) {
        if self.config.progress {
            device.set_progress_monitor(scene, Some(self.progress.hook()));
        }
    }

    /// Disarms both monitors and zeroes their invocation counters.
    pub fn reset(&self) {
        self.memory.reset();
        self.progress.reset();
    }

    /// Draws a plan from the counters of the run that just finished.
    #[must_use]
    pub fn plan(&self, rng: &mut DetRng) -> FaultPlan {
        FaultPlan::from_dry_run(
            self.memory.invocations(),
            self.progress.invocations(),
            rng,
            &self.config,
        )
    }

    /// Arms both monitors and zeroes their invocation counters.
    pub fn arm(&self, plan: FaultPlan) {
        tracing::debug!(
            memory_break = ?plan.memory_break,
            progress_break = ?plan.progress_break,
            "arming fault monitors"
        );
        self.memory.arm(plan.memory_break);
        self.progress.arm(plan.progress_break);
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> FaultStats {
        FaultStats {
            memory_invocations: self.memory.invocations(),
            progress_invocations: self.progress.invocations(),
            memory_denials: self.memory.denials(),
            cancellations: self.progress.trips(),
            bytes_used: self.memory.bytes_used(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::reference::RefDevice;
    use crate::engine::SceneFlags;

    #[test]
    fn presets_enable_expected_monitors() {
        assert!(!FaultConfig::off().is_enabled());
        assert!(FaultConfig::memory_only().memory);
        assert!(!FaultConfig::memory_only().progress);
        assert!(FaultConfig::progress_only().progress);
        let full = FaultConfig::full();
        assert!(full.memory && full.progress);
        assert!((full.progress_overshoot - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    #[should_panic(expected = "overshoot must be finite")]
    fn negative_overshoot_panics() {
        let _ = FaultConfig::full().with_memory_overshoot(-1.0);
    }

    #[test]
    fn plan_stays_inside_scaled_range() {
        let config = FaultConfig::full();
        let mut rng = DetRng::new(7);
        for _ in 0..256 {
            let plan = FaultPlan::from_dry_run(10, 10, &mut rng, &config);
            assert!(plan.memory_break.is_some_and(|b| b < 10));
            assert!(plan.progress_break.is_some_and(|b| b < 20));
        }
    }

    #[test]
    fn disabled_monitor_yields_no_trip_point() {
        let mut rng = DetRng::new(7);
        let plan = FaultPlan::from_dry_run(10, 10, &mut rng, &FaultConfig::memory_only());
        assert!(plan.memory_break.is_some());
        assert_eq!(plan.progress_break, None);
    }

    #[test]
    fn zero_invocations_plan_zero() {
        let mut rng = DetRng::new(3);
        let plan = FaultPlan::from_dry_run(0, 0, &mut rng, &FaultConfig::full());
        assert_eq!(plan.memory_break, Some(0));
        assert_eq!(plan.progress_break, Some(0));
    }

    #[test]
    fn injector_tracks_device_allocations() {
        let device = RefDevice::default();
        let injector = FaultInjector::new(FaultConfig::full());
        injector.attach_device(&device);
        let scene = device.new_scene(SceneFlags::STATIC).expect("scene");
        injector.attach_scene(&device, scene);
        device.delete_scene(scene);
        let stats = injector.stats();
        assert_eq!(stats.bytes_used, 0);
        injector.detach_device(&device);
    }
}
