//! The mutation generator proper.

use super::mesh::{self, SphereSpec};
use super::ops::{MutationOp, ShapeKind, SlotEntry, SlotTable};
use super::{MutationConfig, SceneMode};
use crate::engine::{check_op, Device, GeometryFlags, GeometryId, SceneId};
use crate::util::DetRng;
use crate::{Error, Result};

const RADIUS: f32 = 2.0;
const HAIR_SCALE: f32 = 1.0;
const MOTION: f32 = 1.0;
const DISPLACEMENT: f32 = 0.1;
const SPREAD: f32 = 100.0;

/// What one iteration did.
#[derive(Debug, Default)]
pub struct MutationOutcome {
    /// Operations attempted, in order.
    pub ops: Vec<MutationOp>,
    /// Every error the status checks reported.
    pub errors: Vec<Error>,
    /// A creation failed and the iteration stopped early.
    pub aborted: bool,
}

impl MutationOutcome {
    /// Returns true if no status check failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Applies seeded edit sequences to a scene.
#[derive(Debug, Clone)]
pub struct MutationGenerator {
    mode: SceneMode,
    config: MutationConfig,
    slots: SlotTable,
}

impl MutationGenerator {
    /// Creates a generator with an empty slot table.
    #[must_use]
    pub fn new(mode: SceneMode, config: MutationConfig) -> Self {
        Self {
            mode,
            config,
            slots: SlotTable::new(config.slot_count.max(1)),
        }
    }

    /// The generator's mode.
    #[must_use]
    pub const fn mode(&self) -> SceneMode {
        self.mode
    }

    /// Live geometries tracked in the slot table.
    #[must_use]
    pub fn live_geometries(&self) -> usize {
        self.slots.live()
    }

    /// Forgets every tracked geometry. Used when the scene is replaced.
    pub fn forget(&mut self) {
        let _ = self.slots.drain();
    }

    /// Applies one iteration's edits to `scene`.
    pub fn run_iteration(
        &mut self,
        device: &dyn Device,
        scene: SceneId,
        scene_index: usize,
        iteration: usize,
    ) -> MutationOutcome {
        let mut rng = DetRng::from_index(self.mode.seed(scene_index, iteration));
        let mut outcome = MutationOutcome::default();
        match self.mode {
            SceneMode::Static => self.static_pass(device, scene, &mut rng, &mut outcome),
            SceneMode::Dynamic => self.dynamic_pass(device, scene, &mut rng, &mut outcome),
            SceneMode::Garbage => self.garbage_pass(device, scene, &mut rng, &mut outcome),
        }
        if !outcome.is_clean() {
            tracing::debug!(
                mode = self.mode.name(),
                scene_index,
                iteration,
                errors = outcome.errors.len(),
                aborted = outcome.aborted,
                "mutation pass reported errors"
            );
        }
        outcome
    }

    /// A center in `[0, 100)^3`, occasionally replaced by a degenerate value.
    fn center(&self, rng: &mut DetRng) -> [f32; 3] {
        let p = [(); 3].map(|()| SPREAD * rng.next_f32());
        if self.config.degenerate_one_in == 0 {
            return p;
        }
        match rng.next_usize(self.config.degenerate_one_in) {
            0 => [f32::NAN; 3],
            1 => [f32::INFINITY; 3],
            2 => [1e30; 3],
            _ => p,
        }
    }

    /// Primitive budget for a sphere with `num_phi` rings.
    fn primitive_budget(num_phi: usize, rng: &mut DetRng) -> usize {
        let full = 4 * num_phi * num_phi.saturating_sub(1);
        rng.next_usize(full + 1)
    }

    #[allow(clippy::too_many_arguments)]
    fn create(
        device: &dyn Device,
        scene: SceneId,
        shape: ShapeKind,
        flags: GeometryFlags,
        motion: bool,
        center: [f32; 3],
        num_phi: usize,
        budget: usize,
    ) -> Result<GeometryId> {
        let spec = SphereSpec {
            center,
            radius: RADIUS,
            num_phi,
            max_primitives: budget,
            motion: if motion { MOTION } else { 0.0 },
        };
        match shape {
            ShapeKind::Sphere => mesh::add_sphere(device, scene, flags, spec),
            ShapeKind::SubdivSphere => mesh::add_subdiv_sphere(device, scene, flags, spec),
            ShapeKind::Hair => {
                mesh::add_hair(device, scene, flags, center, HAIR_SCALE, RADIUS, budget, spec.motion)
            }
            ShapeKind::UserSphere => mesh::add_user_sphere(device, scene, center, RADIUS),
            ShapeKind::GarbageTriangles | ShapeKind::GarbageHair => Err(Error::new(
                crate::ErrorKind::InvalidArgument,
            )
            .with_message("garbage shapes need the garbage pass")),
        }
    }

    fn static_pass(&mut self, device: &dyn Device, scene: SceneId, rng: &mut DetRng, out: &mut MutationOutcome) {
        self.forget();
        for slot in 0..self.config.static_creations {
            let center = self.center(rng);
            let (shape, motion) = match rng.next_usize(6) {
                0 => (ShapeKind::Sphere, false),
                1 => (ShapeKind::Sphere, true),
                2 => (ShapeKind::SubdivSphere, false),
                3 => (ShapeKind::Hair, false),
                4 => (ShapeKind::Hair, true),
                _ => (ShapeKind::UserSphere, false),
            };
            let bound = if shape == ShapeKind::SubdivSphere {
                self.config.small_tessellation
            } else {
                self.config.max_tessellation
            };
            let num_phi = rng.next_usize(bound.max(1));
            let budget = Self::primitive_budget(num_phi, rng);
            let flags = GeometryFlags::Static;
            out.ops.push(MutationOp::Create {
                slot,
                shape,
                flags,
                motion,
                size: num_phi,
            });
            match Self::create(device, scene, shape, flags, motion, center, num_phi, budget) {
                Ok(geometry) => self.slots.insert(
                    slot,
                    SlotEntry {
                        geometry,
                        shape,
                        flags,
                        time_steps: if motion { 2 } else { 1 },
                    },
                ),
                Err(err) => {
                    out.errors.push(err);
                    out.aborted = true;
                    return;
                }
            }
        }
    }

    fn dynamic_pass(&mut self, device: &dyn Device, scene: SceneId, rng: &mut DetRng, out: &mut MutationOutcome) {
        let interval = self.config.clear_interval;
        for step in 0..self.config.dynamic_steps {
            let slot = rng.next_usize(self.slots.len());
            match self.slots.get(slot).copied() {
                None => {
                    if let Err(err) = self.dynamic_create(device, scene, slot, rng, out) {
                        out.errors.push(err);
                        out.aborted = true;
                        return;
                    }
                }
                Some(entry) if !entry.is_displaceable() || rng.next_bool() => {
                    self.slots.remove(slot);
                    out.ops.push(MutationOp::Delete { slot });
                    device.delete_geometry(scene, entry.geometry);
                    if let Err(err) = check_op(device, "delete_geometry") {
                        out.errors.push(err);
                    }
                }
                Some(entry) => {
                    out.ops.push(MutationOp::Displace { slot });
                    if let Err(err) = mesh::displace(device, scene, entry.geometry, entry.time_steps, DISPLACEMENT) {
                        out.errors.push(err);
                    }
                }
            }
            if interval >= 2 && step % interval == interval - 2 {
                self.clear(device, scene, out);
            }
        }
    }

    fn dynamic_create(
        &mut self,
        device: &dyn Device,
        scene: SceneId,
        slot: usize,
        rng: &mut DetRng,
        out: &mut MutationOutcome,
    ) -> Result<()> {
        let kind = rng.next_usize(10);
        let center = self.center(rng);
        let num_phi = rng.next_usize(self.config.small_tessellation.max(1));
        let budget = Self::primitive_budget(num_phi, rng);
        let flags = match kind % 3 {
            1 => GeometryFlags::Deformable,
            2 => GeometryFlags::Dynamic,
            _ => GeometryFlags::Static,
        };
        let (shape, motion) = match kind {
            0..=2 => (ShapeKind::Sphere, false),
            3..=5 => (ShapeKind::SubdivSphere, false),
            6..=8 => (ShapeKind::Sphere, true),
            _ => (ShapeKind::UserSphere, false),
        };
        out.ops.push(MutationOp::Create {
            slot,
            shape,
            flags,
            motion,
            size: num_phi,
        });
        let geometry = Self::create(device, scene, shape, flags, motion, center, num_phi, budget)?;
        self.slots.insert(
            slot,
            SlotEntry {
                geometry,
                shape,
                flags,
                time_steps: if motion { 2 } else { 1 },
            },
        );
        Ok(())
    }

    fn clear(&mut self, device: &dyn Device, scene: SceneId, out: &mut MutationOutcome) {
        let removed = self.slots.drain();
        out.ops.push(MutationOp::Clear {
            removed: removed.len(),
        });
        for entry in removed {
            device.delete_geometry(scene, entry.geometry);
            if let Err(err) = check_op(device, "delete_geometry") {
                out.errors.push(err);
            }
        }
    }

    fn garbage_pass(&mut self, device: &dyn Device, scene: SceneId, rng: &mut DetRng, out: &mut MutationOutcome) {
        self.forget();
        let corrupt = self.config.corrupt_index_one_in;
        for slot in 0..self.config.garbage_geometries {
            let count = rng.next_usize(self.config.garbage_max_primitives.max(1));
            let choice = rng.next_usize(4);
            let motion = choice % 2 == 1;
            let shape = if choice < 2 {
                ShapeKind::GarbageTriangles
            } else {
                ShapeKind::GarbageHair
            };
            let flags = GeometryFlags::Static;
            out.ops.push(MutationOp::Create {
                slot,
                shape,
                flags,
                motion,
                size: count,
            });
            let created = if shape == ShapeKind::GarbageTriangles {
                mesh::add_garbage_triangles(device, scene, flags, count, motion, corrupt, rng)
            } else {
                mesh::add_garbage_hair(device, scene, flags, count, motion, corrupt, rng)
            };
            match created {
                Ok(geometry) => self.slots.insert(
                    slot,
                    SlotEntry {
                        geometry,
                        shape,
                        flags,
                        time_steps: if motion { 2 } else { 1 },
                    },
                ),
                Err(err) => {
                    out.errors.push(err);
                    out.aborted = true;
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::reference::RefDevice;
    use crate::engine::{check, SceneFlags};

    fn run(mode: SceneMode, iterations: usize) -> Vec<Vec<MutationOp>> {
        let device = RefDevice::default();
        let mut generator = MutationGenerator::new(mode, MutationConfig::small());
        let mut scene = device.new_scene(mode.scene_flags(0)).expect("scene");
        let mut log = Vec::new();
        for i in 0..iterations {
            if mode.scene_per_iteration() && i > 0 {
                device.delete_scene(scene);
                scene = device.new_scene(mode.scene_flags(i)).expect("scene");
            }
            let outcome = generator.run_iteration(&device, scene, 3, i);
            assert!(outcome.is_clean(), "{mode:?} iteration {i}: {:?}", outcome.errors);
            device.commit(scene);
            check(&device).expect("commit");
            log.push(outcome.ops);
        }
        device.delete_scene(scene);
        log
    }

    #[test]
    fn static_pass_is_deterministic() {
        let a = run(SceneMode::Static, 3);
        let b = run(SceneMode::Static, 3);
        assert_eq!(a, b);
        assert!(a.iter().all(|ops| ops.len() == 10));
        assert!(a
            .iter()
            .flatten()
            .all(|op| matches!(op, MutationOp::Create { flags: GeometryFlags::Static, .. })));
    }

    #[test]
    fn dynamic_pass_clears_periodically() {
        let log = run(SceneMode::Dynamic, 2);
        assert_eq!(log, run(SceneMode::Dynamic, 2));
        for ops in &log {
            let clears = ops.iter().filter(|op| matches!(op, MutationOp::Clear { .. })).count();
            assert_eq!(clears, 1);
        }
    }

    #[test]
    fn dynamic_pass_touches_every_op_kind() {
        let log = run(SceneMode::Dynamic, 6);
        let ops: Vec<_> = log.into_iter().flatten().collect();
        assert!(ops.iter().any(|op| matches!(op, MutationOp::Create { .. })));
        assert!(ops.iter().any(|op| matches!(op, MutationOp::Delete { .. })));
        assert!(ops.iter().any(|op| matches!(op, MutationOp::Displace { .. })));
    }

    #[test]
    fn garbage_pass_builds_every_geometry() {
        let log = run(SceneMode::Garbage, 2);
        assert!(log.iter().all(|ops| ops.len() == MutationConfig::small().garbage_geometries));
    }

    #[test]
    fn static_scene_rejects_dynamic_creations() {
        let device = RefDevice::default();
        let scene = device.new_scene(SceneFlags::STATIC).expect("scene");
        let mut generator = MutationGenerator::new(SceneMode::Dynamic, MutationConfig::small());
        let outcome = (0..4)
            .map(|i| generator.run_iteration(&device, scene, 0, i))
            .find(|o| o.aborted)
            .expect("a deformable creation must fail in a static scene");
        assert_eq!(outcome.errors[0].kind(), crate::ErrorKind::InvalidOperation);
    }
}
