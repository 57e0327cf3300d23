//! Deterministic random scene mutation.
//!
//! A [`MutationGenerator`] turns `(scene_index, iteration)` into a
//! reproducible sequence of edits and applies them to a scene through the
//! [`Device`](crate::engine::Device) contract. Three modes are supported:
//!
//! - [`SceneMode::Static`]: a fresh scene per iteration, creation only.
//! - [`SceneMode::Dynamic`]: one long-lived scene whose slot table is
//!   created into, deleted from, displaced, and periodically cleared.
//! - [`SceneMode::Garbage`]: geometry built from random bit patterns with
//!   out-of-range indices.
//!
//! Every engine call is followed by an error-status check. A failed
//! creation stops the current iteration; failed deletions and
//! displacements are tallied and the step sequence continues.

mod generator;
pub mod mesh;
mod ops;

pub use generator::{MutationGenerator, MutationOutcome};
pub use ops::{MutationOp, ShapeKind, SlotEntry, SlotTable};

use crate::engine::SceneFlags;

/// How a generator treats its scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneMode {
    /// New scene per iteration, geometry is only created.
    Static,
    /// One scene per task, edited in place.
    Dynamic,
    /// New scene per iteration filled with garbage primitives.
    Garbage,
}

impl SceneMode {
    /// Seed for one iteration.
    #[must_use]
    pub const fn seed(self, scene_index: usize, iteration: usize) -> u64 {
        let (a, b) = match self {
            Self::Static => (13_565, 3_242),
            Self::Dynamic => (23_565, 2_242),
            Self::Garbage => (23_565, 0),
        };
        (scene_index as u64)
            .wrapping_mul(a)
            .wrapping_add((iteration as u64).wrapping_mul(b))
    }

    /// Flags of the scene created for `iteration`.
    #[must_use]
    pub const fn scene_flags(self, selector: usize) -> SceneFlags {
        match self {
            Self::Static | Self::Garbage => SceneFlags::from_selector(selector),
            Self::Dynamic => SceneFlags::DYNAMIC,
        }
    }

    /// Returns true if the scene is created per iteration rather than per task.
    #[must_use]
    pub const fn scene_per_iteration(self) -> bool {
        !matches!(self, Self::Dynamic)
    }

    /// Short name used in test names and logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Dynamic => "dynamic",
            Self::Garbage => "garbage",
        }
    }
}

/// Knobs of the mutation generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct MutationConfig {
    /// Upper bound (exclusive) on sphere rings for static creations.
    pub max_tessellation: usize,
    /// Upper bound (exclusive) on rings for subdivision spheres and for
    /// every dynamic creation.
    pub small_tessellation: usize,
    /// Each of NaN, infinity and `1e30` replaces a center with probability
    /// `1 / degenerate_one_in`. Zero disables the substitution.
    pub degenerate_one_in: usize,
    /// Garbage indices are replaced by a random value with probability
    /// `1 / corrupt_index_one_in`. Zero disables the substitution.
    pub corrupt_index_one_in: usize,
    /// Geometries created per static iteration.
    pub static_creations: usize,
    /// Steps per dynamic iteration.
    pub dynamic_steps: usize,
    /// Slots in the dynamic table.
    pub slot_count: usize,
    /// Everything is deleted when `step % clear_interval == clear_interval - 2`.
    /// Zero disables clearing.
    pub clear_interval: usize,
    /// Geometries per garbage scene.
    pub garbage_geometries: usize,
    /// Upper bound (exclusive) on primitives per garbage geometry.
    pub garbage_max_primitives: usize,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            max_tessellation: 100,
            small_tessellation: 10,
            degenerate_one_in: 16,
            corrupt_index_one_in: 32,
            static_creations: 10,
            dynamic_steps: 40,
            slot_count: 1024,
            clear_interval: 40,
            garbage_geometries: 20,
            garbage_max_primitives: 256,
        }
    }
}

impl MutationConfig {
    /// Small meshes for fast tests.
    #[must_use]
    pub const fn small() -> Self {
        Self {
            max_tessellation: 8,
            small_tessellation: 5,
            degenerate_one_in: 16,
            corrupt_index_one_in: 32,
            static_creations: 10,
            dynamic_steps: 40,
            slot_count: 64,
            clear_interval: 40,
            garbage_geometries: 8,
            garbage_max_primitives: 32,
        }
    }

    /// Sets the static tessellation bound.
    #[must_use]
    pub const fn with_max_tessellation(mut self, bound: usize) -> Self {
        self.max_tessellation = bound;
        self
    }

    /// Sets the number of dynamic steps per iteration.
    #[must_use]
    pub const fn with_dynamic_steps(mut self, steps: usize) -> Self {
        self.dynamic_steps = steps;
        self
    }

    /// Sets the slot table size.
    #[must_use]
    pub const fn with_slot_count(mut self, slots: usize) -> Self {
        self.slot_count = slots;
        self
    }

    /// Checks that every bound used as a modulus is non-zero.
    pub fn validate(&self) -> crate::Result<()> {
        let bounds = [
            ("max_tessellation", self.max_tessellation),
            ("small_tessellation", self.small_tessellation),
            ("slot_count", self.slot_count),
            ("garbage_max_primitives", self.garbage_max_primitives),
        ];
        for (name, value) in bounds {
            if value == 0 {
                return Err(crate::Error::config(format!("mutation.{name} must be non-zero")));
            }
        }
        if self.clear_interval == 1 {
            return Err(crate::Error::config("mutation.clear_interval must be 0 or at least 2"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_follow_mode_strides() {
        assert_eq!(SceneMode::Static.seed(2, 3), 2 * 13_565 + 3 * 3_242);
        assert_eq!(SceneMode::Dynamic.seed(2, 3), 2 * 23_565 + 3 * 2_242);
        assert_eq!(SceneMode::Garbage.seed(5, 9), 5 * 23_565);
    }

    #[test]
    fn dynamic_mode_keeps_its_scene() {
        assert!(SceneMode::Static.scene_per_iteration());
        assert!(!SceneMode::Dynamic.scene_per_iteration());
        assert!(SceneMode::Dynamic.scene_flags(7).is_dynamic());
    }

    #[test]
    fn validate_rejects_zero_bounds() {
        assert!(MutationConfig::default().validate().is_ok());
        assert!(MutationConfig::small().validate().is_ok());
        let bad = MutationConfig::default().with_slot_count(0);
        assert_eq!(bad.validate().unwrap_err().kind(), crate::ErrorKind::Config);
        let bad = MutationConfig {
            clear_interval: 1,
            ..MutationConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
