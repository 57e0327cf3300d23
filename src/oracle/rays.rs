//! Random ray batches through every query mode.

use crate::engine::{
    check_op, Device, PacketWidth, QueryKind, QueryMode, Ray, RayBatch, SceneId, TraversalHint,
};
use crate::util::DetRng;
use crate::Result;

use super::OracleViolation;

/// Batch shape of the ray oracle.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RayOracleConfig {
    /// Rays generated per mode and query kind.
    pub rays_per_batch: usize,
    /// Origins and directions are drawn from `[-extent, extent]^3`.
    pub extent: f32,
}

impl Default for RayOracleConfig {
    fn default() -> Self {
        Self {
            rays_per_batch: 100,
            extent: 1.0,
        }
    }
}

/// Outcome of one mode, kind and hint combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct BatchReport {
    /// Query mode.
    pub mode: QueryMode,
    /// Query kind.
    pub kind: QueryKind,
    /// Traversal hint.
    pub hint: TraversalHint,
    /// Rays traced (masked-off lanes excluded).
    pub traced: usize,
    /// Rays that reported a hit or occlusion.
    pub hits: usize,
}

/// Outcome of a full oracle pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct OracleReport {
    /// One entry per issued batch.
    pub batches: Vec<BatchReport>,
}

impl OracleReport {
    /// Hits over every batch.
    #[must_use]
    pub fn total_hits(&self) -> usize {
        self.batches.iter().map(|b| b.hits).sum()
    }

    /// Fails on the first batch that reported a hit.
    pub fn expect_no_hits(&self) -> core::result::Result<(), OracleViolation> {
        match self.batches.iter().find(|b| b.hits > 0) {
            None => Ok(()),
            Some(b) => Err(OracleViolation::UnexpectedHits {
                mode: b.mode,
                kind: b.kind,
                hits: b.hits,
            }),
        }
    }
}

/// Liveness oracle issuing random queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct RayOracle {
    config: RayOracleConfig,
}

fn is_hit(ray: &Ray, kind: QueryKind) -> bool {
    match kind {
        QueryKind::Intersect => ray.hit.is_some(),
        QueryKind::Occluded => ray.occluded,
    }
}

impl RayOracle {
    /// Creates an oracle.
    #[must_use]
    pub const fn new(config: RayOracleConfig) -> Self {
        Self { config }
    }

    /// Random rays with origins and directions in the configured cube.
    pub fn random_rays(&self, rng: &mut DetRng) -> Vec<Ray> {
        let e = self.config.extent;
        (0..self.config.rays_per_batch)
            .map(|_| {
                let origin = [(); 3].map(|()| rng.next_range_f32(-e, e));
                let dir = [(); 3].map(|()| rng.next_range_f32(-e, e));
                Ray::new(origin, dir)
            })
            .collect()
    }

    /// Issues one batch per supported mode, query kind and hint, checking
    /// the error status after every call.
    pub fn fire(&self, device: &dyn Device, scene: SceneId, rng: &mut DetRng) -> Result<OracleReport> {
        let mut report = OracleReport::default();
        for mode in device.supported_query_modes() {
            for kind in [QueryKind::Intersect, QueryKind::Occluded] {
                for hint in [TraversalHint::Coherent, TraversalHint::Incoherent] {
                    let mut rays = self.random_rays(rng);
                    let traced = Self::issue(device, scene, mode, kind, hint, &mut rays, rng)?;
                    let hits = rays.iter().filter(|r| is_hit(r, kind)).count();
                    report.batches.push(BatchReport {
                        mode,
                        kind,
                        hint,
                        traced,
                        hits,
                    });
                }
            }
        }
        Ok(report)
    }

    /// Traces `rays` in one mode. Returns the number of rays traced.
    pub fn issue(
        device: &dyn Device,
        scene: SceneId,
        mode: QueryMode,
        kind: QueryKind,
        hint: TraversalHint,
        rays: &mut [Ray],
        rng: &mut DetRng,
    ) -> Result<usize> {
        let query = |batch: RayBatch<'_>| -> Result<()> {
            match kind {
                QueryKind::Intersect => device.intersect(scene, batch, hint),
                QueryKind::Occluded => device.occluded(scene, batch, hint),
            }
            check_op(device, query_name(kind))
        };
        match mode {
            QueryMode::Single => {
                for ray in rays.iter_mut() {
                    query(RayBatch::Single(ray))?;
                }
                Ok(rays.len())
            }
            QueryMode::Packet(width) => Self::issue_packets(width, rays, query),
            QueryMode::Stream => {
                query(RayBatch::Stream { rays, active: None })?;
                Ok(rays.len())
            }
            QueryMode::MaskedStream => {
                let mask: Vec<bool> = rays.iter().map(|_| rng.next_bool()).collect();
                let traced = mask.iter().filter(|m| **m).count();
                query(RayBatch::Stream {
                    rays,
                    active: Some(&mask),
                })?;
                Ok(traced)
            }
        }
    }

    /// Splits `rays` into packets; the tail packet is padded with inactive
    /// lanes.
    fn issue_packets(
        width: PacketWidth,
        rays: &mut [Ray],
        query: impl Fn(RayBatch<'_>) -> Result<()>,
    ) -> Result<usize> {
        let lanes = width.lanes();
        let filler = Ray::new([0.0; 3], [0.0, 0.0, 1.0]);
        for chunk in rays.chunks_mut(lanes) {
            let mut packet = vec![filler; lanes];
            packet[..chunk.len()].copy_from_slice(chunk);
            let valid: Vec<bool> = (0..lanes).map(|i| i < chunk.len()).collect();
            query(RayBatch::Packet {
                width,
                valid: &valid,
                rays: &mut packet,
            })?;
            chunk.copy_from_slice(&packet[..chunk.len()]);
        }
        Ok(rays.len())
    }
}

const fn query_name(kind: QueryKind) -> &'static str {
    match kind {
        QueryKind::Intersect => "intersect",
        QueryKind::Occluded => "occluded",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::reference::RefDevice;
    use crate::engine::{check, SceneFlags};
    use crate::test_utils::init_test_logging;
    use crate::{assert_with_log, test_complete, test_phase};

    fn committed_empty_scene(device: &RefDevice) -> SceneId {
        let scene = device.new_scene(SceneFlags::STATIC).expect("scene");
        device.commit(scene);
        check(device).expect("commit");
        scene
    }

    #[test]
    fn covers_every_mode_kind_and_hint() {
        init_test_logging();
        test_phase!("covers_every_mode_kind_and_hint");
        let device = RefDevice::default();
        let scene = committed_empty_scene(&device);
        let mut rng = DetRng::new(11);
        let report = RayOracle::default().fire(&device, scene, &mut rng).expect("fire");
        assert_with_log!(report.batches.len() == 6 * 2 * 2, "batch count", 24, report.batches.len());
        assert!(report.expect_no_hits().is_ok());
        test_complete!("covers_every_mode_kind_and_hint");
    }

    #[test]
    fn packet_tail_is_traced() {
        let device = RefDevice::default();
        let scene = committed_empty_scene(&device);
        let mut rng = DetRng::new(5);
        let mut rays = vec![Ray::new([0.0; 3], [1.0, 0.0, 0.0]); 10];
        let traced = RayOracle::issue(
            &device,
            scene,
            QueryMode::Packet(PacketWidth::W8),
            QueryKind::Occluded,
            TraversalHint::Incoherent,
            &mut rays,
            &mut rng,
        )
        .expect("packets");
        assert_eq!(traced, 10);
    }

    #[test]
    fn uncommitted_scene_is_reported() {
        let device = RefDevice::default();
        let scene = device.new_scene(SceneFlags::STATIC).expect("scene");
        let mut rng = DetRng::new(5);
        let err = RayOracle::default().fire(&device, scene, &mut rng).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidOperation);
    }

    #[test]
    fn rays_stay_in_cube() {
        let oracle = RayOracle::new(RayOracleConfig {
            rays_per_batch: 64,
            extent: 1.0,
        });
        let mut rng = DetRng::new(9);
        let rays = oracle.random_rays(&mut rng);
        assert_eq!(rays.len(), 64);
        assert!(rays
            .iter()
            .all(|r| r.origin.iter().chain(&r.dir).all(|c| (-1.0..=1.0).contains(c))));
    }
}
