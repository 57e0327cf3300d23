//! Geometry builders used as mutation primitives.
//!
//! Every builder follows the same protocol: create the geometry, fill its
//! buffers, and query the error status after each engine call. If any step
//! fails the half-built geometry is deleted again and the first error is
//! returned.

use std::f32::consts::PI;
use std::sync::Arc;

use crate::engine::{
    check_op, Aabb, BufferKind, Device, GeometryDesc, GeometryFlags, GeometryId, GeometryKind, Ray,
    SceneId, UserGeometry, Vertex,
};
use crate::util::DetRng;
use crate::Result;

/// Procedural sphere handed to the engine as user geometry.
#[derive(Debug, Clone, Copy)]
pub struct UserSphere {
    /// Center.
    pub center: [f32; 3],
    /// Radius.
    pub radius: f32,
}

impl UserGeometry for UserSphere {
    fn bounds(&self, _item: u32) -> Aabb {
        let r = self.radius;
        Aabb {
            lower: self.center.map(|c| c - r),
            upper: self.center.map(|c| c + r),
        }
    }

    fn intersect(&self, _item: u32, ray: &Ray) -> Option<f32> {
        let oc = [
            ray.origin[0] - self.center[0],
            ray.origin[1] - self.center[1],
            ray.origin[2] - self.center[2],
        ];
        let a = ray.dir.iter().map(|d| d * d).sum::<f32>();
        let b = 2.0 * oc.iter().zip(ray.dir).map(|(o, d)| o * d).sum::<f32>();
        let c = oc.iter().map(|o| o * o).sum::<f32>() - self.radius * self.radius;
        let disc = b.mul_add(b, -4.0 * a * c);
        if a == 0.0 || disc < 0.0 {
            return None;
        }
        let sqrt = disc.sqrt();
        [(-b - sqrt) / (2.0 * a), (-b + sqrt) / (2.0 * a)]
            .into_iter()
            .find(|t| t.is_finite() && *t >= ray.tnear && *t <= ray.tfar)
    }
}

/// Runs `fill` on a freshly created geometry, deleting it if anything fails.
fn build(
    device: &dyn Device,
    scene: SceneId,
    desc: GeometryDesc,
    fill: impl FnOnce(GeometryId) -> Result<()>,
) -> Result<GeometryId> {
    let kind = desc.kind.name();
    let created = device.create_geometry(scene, desc);
    check_op(device, "create_geometry")?;
    let Some(geometry) = created else {
        return Err(crate::Error::new(crate::ErrorKind::UnknownFailure)
            .with_message(format!("engine returned no id for {kind} geometry")));
    };
    if let Err(err) = fill(geometry) {
        device.delete_geometry(scene, geometry);
        // The fill error is the one reported; a failed cleanup only gets logged.
        if let Err(cleanup) = check_op(device, "delete_geometry") {
            tracing::warn!(kind, error = %cleanup, "could not delete half-built geometry");
        }
        return Err(err);
    }
    Ok(geometry)
}

/// Maps `kind`, lets `write` edit it, and unmaps it again.
fn with_vertices(
    device: &dyn Device,
    scene: SceneId,
    geometry: GeometryId,
    kind: BufferKind,
    write: impl FnOnce(&mut [Vertex]),
) -> Result<()> {
    let mapped = device.map_buffer(scene, geometry, kind);
    check_op(device, "map_buffer")?;
    if let Some(mut buffer) = mapped {
        if let Some(vertices) = buffer.vertices_mut() {
            write(vertices);
        }
        device.unmap_buffer(scene, buffer);
        check_op(device, "unmap_buffer")?;
    }
    Ok(())
}

fn with_indices(
    device: &dyn Device,
    scene: SceneId,
    geometry: GeometryId,
    kind: BufferKind,
    write: impl FnOnce(&mut [u32]),
) -> Result<()> {
    let mapped = device.map_buffer(scene, geometry, kind);
    check_op(device, "map_buffer")?;
    if let Some(mut buffer) = mapped {
        if let Some(indices) = buffer.indices_mut() {
            write(indices);
        }
        device.unmap_buffer(scene, buffer);
        check_op(device, "unmap_buffer")?;
    }
    Ok(())
}

fn to_u32(v: usize) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}

#[allow(clippy::cast_precision_loss)]
fn sphere_point(center: [f32; 3], radius: f32, phi: usize, num_phi: usize, theta: usize, num_theta: usize) -> [f32; 3] {
    let phif = phi as f32 * PI / num_phi as f32;
    let thetaf = theta as f32 * 2.0 * PI / num_theta as f32;
    [
        (radius * phif.sin()).mul_add(thetaf.sin(), center[0]),
        radius.mul_add(phif.cos(), center[1]),
        (radius * phif.sin()).mul_add(thetaf.cos(), center[2]),
    ]
}

/// Tessellated sphere parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphereSpec {
    /// Center.
    pub center: [f32; 3],
    /// Radius.
    pub radius: f32,
    /// Rings from pole to pole; twice as many segments around.
    pub num_phi: usize,
    /// Upper bound on emitted primitives.
    pub max_primitives: usize,
    /// Offset of the second time step; `0.0` means no motion blur.
    pub motion: f32,
}

impl SphereSpec {
    const fn time_steps(&self) -> usize {
        if self.motion == 0.0 {
            1
        } else {
            2
        }
    }
}

/// Adds a triangulated sphere. Vertices go through `set_buffer` with a
/// packed three-float stride.
pub fn add_sphere(
    device: &dyn Device,
    scene: SceneId,
    flags: GeometryFlags,
    spec: SphereSpec,
) -> Result<GeometryId> {
    let num_phi = spec.num_phi;
    let num_theta = 2 * num_phi;
    let full = 2 * num_theta * num_phi.saturating_sub(1);
    let num_triangles = full.min(spec.max_primitives);
    let num_vertices = num_theta * (num_phi + 1);
    let time_steps = spec.time_steps();

    let desc = GeometryDesc {
        kind: GeometryKind::Triangles,
        flags,
        primitive_count: num_triangles,
        vertex_count: num_vertices,
        time_steps,
    };
    build(device, scene, desc, |geometry| {
        for step in 0..time_steps {
            let offset = if step == 0 { 0.0 } else { spec.motion };
            let mut flat = Vec::with_capacity(num_vertices * 3);
            for phi in 0..=num_phi {
                for theta in 0..num_theta {
                    let p = sphere_point(spec.center, spec.radius, phi, num_phi, theta, num_theta);
                    flat.extend(p.map(|c| c + offset));
                }
            }
            device.set_buffer(scene, geometry, BufferKind::vertex(step), &flat, 12);
            check_op(device, "set_buffer")?;
        }

        with_indices(device, scene, geometry, BufferKind::Index, |indices| {
            let mut tri = 0;
            let mut emit = |a: usize, b: usize, c: usize| {
                if tri < num_triangles {
                    indices[3 * tri..3 * tri + 3].copy_from_slice(&[to_u32(a), to_u32(b), to_u32(c)]);
                    tri += 1;
                }
            };
            for phi in 1..=num_phi {
                for theta in 1..=num_theta {
                    let p00 = (phi - 1) * num_theta + theta - 1;
                    let p01 = (phi - 1) * num_theta + theta % num_theta;
                    let p10 = phi * num_theta + theta - 1;
                    let p11 = phi * num_theta + theta % num_theta;
                    if phi > 1 {
                        emit(p10, p00, p01);
                    }
                    if phi < num_phi {
                        emit(p11, p10, p01);
                    }
                }
            }
        })
    })
}

/// Adds a sphere made of quad faces (triangles at the poles).
pub fn add_subdiv_sphere(
    device: &dyn Device,
    scene: SceneId,
    flags: GeometryFlags,
    spec: SphereSpec,
) -> Result<GeometryId> {
    let num_phi = spec.num_phi;
    let num_theta = 2 * num_phi;
    let mut vertices = Vec::with_capacity(num_theta * (num_phi + 1));
    let mut indices = Vec::new();
    let mut faces = Vec::new();
    for phi in 0..=num_phi {
        for theta in 0..num_theta {
            let p = sphere_point(spec.center, spec.radius, phi, num_phi, theta, num_theta);
            vertices.push([p[0], p[1], p[2], 0.0]);
        }
        if phi == 0 {
            continue;
        }
        for theta in 1..=num_theta {
            let p00 = (phi - 1) * num_theta + theta - 1;
            let p01 = (phi - 1) * num_theta + theta % num_theta;
            let p10 = phi * num_theta + theta - 1;
            let p11 = phi * num_theta + theta % num_theta;
            if phi == 1 {
                indices.extend([p10, num_theta - 1, p11].map(to_u32));
                faces.push(3);
            } else if phi == num_phi {
                indices.extend([num_phi * num_theta, p00, p01].map(to_u32));
                faces.push(3);
            } else {
                indices.extend([p10, p00, p01, p11].map(to_u32));
                faces.push(4);
            }
        }
    }
    faces.truncate(spec.max_primitives);
    let time_steps = spec.time_steps();
    let desc = GeometryDesc {
        kind: GeometryKind::Subdivision {
            edge_count: indices.len(),
        },
        flags,
        primitive_count: faces.len(),
        vertex_count: vertices.len(),
        time_steps,
    };
    build(device, scene, desc, |geometry| {
        for step in 0..time_steps {
            let offset = if step == 0 { 0.0 } else { spec.motion };
            with_vertices(device, scene, geometry, BufferKind::vertex(step), |dst| {
                for (d, s) in dst.iter_mut().zip(&vertices) {
                    *d = [s[0] + offset, s[1] + offset, s[2] + offset, 0.0];
                }
            })?;
        }
        with_indices(device, scene, geometry, BufferKind::Index, |dst| {
            dst.copy_from_slice(&indices);
        })?;
        with_indices(device, scene, geometry, BufferKind::FaceCounts, |dst| {
            dst.copy_from_slice(&faces);
        })
    })
}

/// Adds `num_hairs` four-point curves starting at `center`.
#[allow(clippy::cast_precision_loss, clippy::too_many_arguments)]
pub fn add_hair(
    device: &dyn Device,
    scene: SceneId,
    flags: GeometryFlags,
    center: [f32; 3],
    scale: f32,
    radius: f32,
    num_hairs: usize,
    motion: f32,
) -> Result<GeometryId> {
    let time_steps = if motion == 0.0 { 1 } else { 2 };
    let desc = GeometryDesc {
        kind: GeometryKind::Curves,
        flags,
        primitive_count: num_hairs,
        vertex_count: num_hairs * 4,
        time_steps,
    };
    build(device, scene, desc, |geometry| {
        for step in 0..time_steps {
            let offset = if step == 0 { 0.0 } else { motion };
            with_vertices(device, scene, geometry, BufferKind::vertex(step), |dst| {
                for (i, hair) in dst.chunks_exact_mut(4).enumerate() {
                    let p0 = [
                        scale.mul_add((i % 7) as f32, center[0]),
                        scale.mul_add((i % 13) as f32, center[1]),
                        scale.mul_add((i % 31) as f32, center[2]),
                    ];
                    let steps = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 1.0], [0.0, 1.0, 0.0]];
                    for (v, d) in hair.iter_mut().zip(steps) {
                        *v = [
                            scale.mul_add(d[0], p0[0]) + offset,
                            scale.mul_add(d[1], p0[1]) + offset,
                            scale.mul_add(d[2], p0[2]) + offset,
                            radius,
                        ];
                    }
                }
            })?;
        }
        with_indices(device, scene, geometry, BufferKind::Index, |dst| {
            for (i, start) in dst.iter_mut().enumerate() {
                *start = to_u32(4 * i);
            }
        })
    })
}

/// Adds a single procedural sphere.
pub fn add_user_sphere(device: &dyn Device, scene: SceneId, center: [f32; 3], radius: f32) -> Result<GeometryId> {
    let desc = GeometryDesc {
        kind: GeometryKind::User(Arc::new(UserSphere { center, radius })),
        flags: GeometryFlags::Static,
        primitive_count: 1,
        vertex_count: 0,
        time_steps: 1,
    };
    build(device, scene, desc, |_| Ok(()))
}

/// Adds one triangle with the given corners.
pub fn add_triangle(
    device: &dyn Device,
    scene: SceneId,
    flags: GeometryFlags,
    corners: [[f32; 3]; 3],
) -> Result<GeometryId> {
    let desc = GeometryDesc {
        kind: GeometryKind::Triangles,
        flags,
        primitive_count: 1,
        vertex_count: 3,
        time_steps: 1,
    };
    build(device, scene, desc, |geometry| {
        with_vertices(device, scene, geometry, BufferKind::Vertex0, |dst| {
            for (d, c) in dst.iter_mut().zip(corners) {
                *d = [c[0], c[1], c[2], 0.0];
            }
        })?;
        with_indices(device, scene, geometry, BufferKind::Index, |dst| {
            dst.copy_from_slice(&[0, 1, 2]);
        })
    })
}

/// Random bit patterns for every vertex lane.
fn garbage_vertices(dst: &mut [Vertex], rng: &mut DetRng) {
    for v in dst {
        *v = [(); 4].map(|()| f32::from_bits(rng.next_u32()));
    }
}

/// Picks a random index with probability `1 / corrupt_one_in`.
fn maybe_corrupt(expected: usize, corrupt_one_in: usize, rng: &mut DetRng) -> u32 {
    if corrupt_one_in > 0 && rng.one_in(corrupt_one_in) {
        rng.next_u32()
    } else {
        to_u32(expected)
    }
}

/// Adds triangles over random bit-pattern vertices with occasionally
/// out-of-range indices.
pub fn add_garbage_triangles(
    device: &dyn Device,
    scene: SceneId,
    flags: GeometryFlags,
    count: usize,
    motion: bool,
    corrupt_one_in: usize,
    rng: &mut DetRng,
) -> Result<GeometryId> {
    let time_steps = if motion { 2 } else { 1 };
    let desc = GeometryDesc {
        kind: GeometryKind::Triangles,
        flags,
        primitive_count: count,
        vertex_count: 3 * count,
        time_steps,
    };
    build(device, scene, desc, |geometry| {
        for step in 0..time_steps {
            with_vertices(device, scene, geometry, BufferKind::vertex(step), |dst| {
                garbage_vertices(dst, rng);
            })?;
        }
        with_indices(device, scene, geometry, BufferKind::Index, |dst| {
            for (i, index) in dst.iter_mut().enumerate() {
                *index = maybe_corrupt(i, corrupt_one_in, rng);
            }
        })
    })
}

/// Adds curves over random bit-pattern control points with occasionally
/// out-of-range start indices.
pub fn add_garbage_hair(
    device: &dyn Device,
    scene: SceneId,
    flags: GeometryFlags,
    count: usize,
    motion: bool,
    corrupt_one_in: usize,
    rng: &mut DetRng,
) -> Result<GeometryId> {
    let time_steps = if motion { 2 } else { 1 };
    let desc = GeometryDesc {
        kind: GeometryKind::Curves,
        flags,
        primitive_count: count,
        vertex_count: 4 * count,
        time_steps,
    };
    build(device, scene, desc, |geometry| {
        for step in 0..time_steps {
            with_vertices(device, scene, geometry, BufferKind::vertex(step), |dst| {
                garbage_vertices(dst, rng);
            })?;
        }
        with_indices(device, scene, geometry, BufferKind::Index, |dst| {
            for (i, start) in dst.iter_mut().enumerate() {
                *start = maybe_corrupt(4 * i, corrupt_one_in, rng);
            }
        })
    })
}

/// Moves every vertex of the listed time steps by `delta` on all axes.
pub fn displace(
    device: &dyn Device,
    scene: SceneId,
    geometry: GeometryId,
    time_steps: usize,
    delta: f32,
) -> Result<()> {
    for step in 0..time_steps {
        with_vertices(device, scene, geometry, BufferKind::vertex(step), |dst| {
            for v in dst {
                v[0] += delta;
                v[1] += delta;
                v[2] += delta;
            }
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::reference::RefDevice;
    use crate::engine::{check, EngineError, RayBatch, SceneFlags, TraversalHint};

    #[test]
    fn sphere_is_hit_from_outside() {
        let device = RefDevice::default();
        let scene = device.new_scene(SceneFlags::STATIC).expect("scene");
        let spec = SphereSpec {
            center: [0.0, 0.0, 5.0],
            radius: 1.0,
            num_phi: 8,
            max_primitives: usize::MAX,
            motion: 0.0,
        };
        add_sphere(&device, scene, GeometryFlags::Static, spec).expect("sphere");
        device.commit(scene);
        check(&device).expect("commit");
        let mut ray = Ray::new([0.0, 0.0, 0.0], [0.0, 0.0, 1.0]);
        device.intersect(scene, RayBatch::Single(&mut ray), TraversalHint::Coherent);
        let hit = ray.hit.expect("sphere should be hit");
        assert!(hit.t > 3.5 && hit.t < 4.5, "t = {}", hit.t);
    }

    fn unfilled_triangles() -> GeometryDesc {
        GeometryDesc {
            kind: GeometryKind::Triangles,
            flags: GeometryFlags::Deformable,
            primitive_count: 4,
            vertex_count: 6,
            time_steps: 1,
        }
    }

    #[test]
    fn failed_fill_deletes_the_geometry() {
        let device = RefDevice::default();
        let scene = device.new_scene(SceneFlags::DYNAMIC).expect("scene");
        let mut seen = None;
        let err = build(&device, scene, unfilled_triangles(), |geometry| {
            seen = Some(geometry);
            Err(crate::Error::new(crate::ErrorKind::InvalidOperation))
        })
        .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidOperation);
        assert_eq!(device.take_error(), None);

        let geometry = seen.expect("fill ran");
        device.delete_geometry(scene, geometry);
        assert_eq!(device.take_error(), Some(EngineError::InvalidArgument));
        device.delete_scene(scene);
    }

    #[test]
    fn failed_cleanup_keeps_the_fill_error() {
        let device = RefDevice::default();
        let scene = device.new_scene(SceneFlags::DYNAMIC).expect("scene");
        let err = build(&device, scene, unfilled_triangles(), |geometry| {
            device.delete_geometry(scene, geometry);
            check_op(&device, "delete_geometry")?;
            Err(crate::Error::new(crate::ErrorKind::InvalidOperation))
        })
        .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidOperation);
        assert_eq!(device.take_error(), None);
        device.delete_scene(scene);
    }

    #[test]
    fn degenerate_sphere_sizes_are_accepted() {
        let device = RefDevice::default();
        let scene = device.new_scene(SceneFlags::STATIC).expect("scene");
        for num_phi in 0..3 {
            let spec = SphereSpec {
                center: [f32::NAN; 3],
                radius: 2.0,
                num_phi,
                max_primitives: 7,
                motion: 1.0,
            };
            add_sphere(&device, scene, GeometryFlags::Static, spec).expect("sphere");
            add_subdiv_sphere(&device, scene, GeometryFlags::Static, spec).expect("subdiv");
        }
        device.commit(scene);
        check(&device).expect("commit tolerates degenerate input");
    }

    #[test]
    fn user_sphere_intersection() {
        let sphere = UserSphere {
            center: [0.0, 0.0, 0.0],
            radius: 1.0,
        };
        let ray = Ray::new([0.0, 0.0, -3.0], [0.0, 0.0, 1.0]);
        let t = sphere.intersect(0, &ray).expect("hit");
        assert!((t - 2.0).abs() < 1e-5);
        let miss = Ray::new([0.0, 2.0, -3.0], [0.0, 0.0, 1.0]);
        assert!(sphere.intersect(0, &miss).is_none());
    }

    #[test]
    fn garbage_geometry_commits() {
        let device = RefDevice::default();
        let scene = device.new_scene(SceneFlags::ROBUST).expect("scene");
        let mut rng = DetRng::new(23_565);
        add_garbage_triangles(&device, scene, GeometryFlags::Static, 64, true, 32, &mut rng).expect("triangles");
        add_garbage_hair(&device, scene, GeometryFlags::Static, 64, false, 32, &mut rng).expect("hair");
        device.commit(scene);
        check(&device).expect("garbage commit");
    }
}
