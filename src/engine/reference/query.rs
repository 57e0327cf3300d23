//! Built acceleration state and brute-force traversal.
//!
//! Primitives are grouped per geometry into fixed-size chunks with their own
//! bounds, giving a two-level hierarchy that is enough to keep random ray
//! batches cheap against scenes with a few hundred thousand triangles.

use std::sync::Arc;

use crate::engine::{Aabb, GeometryId, Hit, Ray, UserGeometry};

/// Primitives per chunk.
pub(super) const CHUNK_SIZE: usize = 64;

#[derive(Debug, Clone)]
pub(super) enum BuiltPrim {
    Triangle { prim: u32, v: [[f32; 3]; 3] },
    Curve { prim: u32, bounds: Aabb },
    User { item: u32 },
}

#[derive(Debug)]
pub(super) struct Chunk {
    pub bounds: Aabb,
    pub prims: Vec<BuiltPrim>,
}

#[derive(Debug)]
pub(super) struct BuiltGeometry {
    pub id: GeometryId,
    pub bounds: Aabb,
    pub chunks: Vec<Chunk>,
    pub user: Option<Arc<dyn UserGeometry>>,
}

/// The committed state of a scene.
#[derive(Debug, Default)]
pub(super) struct BuiltScene {
    pub geometries: Vec<BuiltGeometry>,
    /// Bytes reported to the memory monitor for this state.
    pub bytes: i64,
}

fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1].mul_add(b[2], -(a[2] * b[1])),
        a[2].mul_add(b[0], -(a[0] * b[2])),
        a[0].mul_add(b[1], -(a[1] * b[0])),
    ]
}

fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0].mul_add(b[0], a[1].mul_add(b[1], a[2] * b[2]))
}

/// Möller–Trumbore. The front face is the side the geometric normal
/// `(v1 - v0) x (v2 - v0)` points away from.
pub(super) fn intersect_triangle(
    v: &[[f32; 3]; 3],
    ray: &Ray,
    backface_culling: bool,
) -> Option<(f32, f32, f32)> {
    const EPS: f32 = 1e-12;
    let e1 = sub(v[1], v[0]);
    let e2 = sub(v[2], v[0]);
    let p = cross(ray.dir, e2);
    let det = dot(e1, p);
    if backface_culling {
        if det <= EPS {
            return None;
        }
    } else if det.abs() <= EPS {
        return None;
    }
    let inv = 1.0 / det;
    let s = sub(ray.origin, v[0]);
    let u = dot(s, p) * inv;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = cross(s, e1);
    let w = dot(ray.dir, q) * inv;
    if w < 0.0 || u + w > 1.0 {
        return None;
    }
    let t = dot(e2, q) * inv;
    if t.is_finite() && t >= ray.tnear && t <= ray.tfar {
        Some((t, u, w))
    } else {
        None
    }
}

impl BuiltScene {
    /// Finds the nearest hit; returns whether anything was hit.
    pub fn intersect(&self, ray: &mut Ray, backface_culling: bool) -> bool {
        self.traverse(ray, backface_culling, false)
    }

    /// Returns true if anything blocks the ray segment.
    pub fn occluded(&self, ray: &mut Ray, backface_culling: bool) -> bool {
        let blocked = self.traverse(ray, backface_culling, true);
        ray.occluded = blocked;
        blocked
    }

    fn traverse(&self, ray: &mut Ray, backface_culling: bool, any_hit: bool) -> bool {
        let mut found = false;
        for geometry in &self.geometries {
            if geometry.bounds.intersect(ray).is_none() {
                continue;
            }
            for chunk in &geometry.chunks {
                if chunk.bounds.intersect(ray).is_none() {
                    continue;
                }
                for prim in &chunk.prims {
                    let candidate = match prim {
                        BuiltPrim::Triangle { prim, v } => intersect_triangle(v, ray, backface_culling)
                            .map(|(t, u, v)| (*prim, t, u, v)),
                        BuiltPrim::Curve { prim, bounds } => {
                            bounds.intersect(ray).map(|t| (*prim, t, 0.0, 0.0))
                        }
                        BuiltPrim::User { item } => geometry
                            .user
                            .as_ref()
                            .and_then(|user| user.intersect(*item, ray))
                            .filter(|t| *t >= ray.tnear && *t <= ray.tfar)
                            .map(|t| (*item, t, 0.0, 0.0)),
                    };
                    if let Some((primitive, t, u, v)) = candidate {
                        found = true;
                        if any_hit {
                            return true;
                        }
                        ray.tfar = t;
                        ray.hit = Some(Hit {
                            geometry: geometry.id,
                            primitive,
                            t,
                            u,
                            v,
                        });
                    }
                }
            }
        }
        found
    }
}
