//! Value types shared by the engine contract and the harness.

use core::fmt;
use core::ops::BitOr;
use std::sync::Arc;

/// Handle to an engine-owned scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SceneId(pub(crate) u32);

impl fmt::Display for SceneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scene#{}", self.0)
    }
}

/// Identifier of a geometry inside one scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryId(pub u32);

impl fmt::Display for GeometryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "geom#{}", self.0)
    }
}

/// Status codes reported by the engine's error query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum EngineError {
    /// Unclassified engine failure.
    #[error("unknown engine error")]
    Unknown,
    /// An argument was rejected.
    #[error("invalid argument")]
    InvalidArgument,
    /// The call is not legal in the current state.
    #[error("invalid operation")]
    InvalidOperation,
    /// An allocation failed or was denied.
    #[error("out of memory")]
    OutOfMemory,
    /// The host CPU lacks a required feature.
    #[error("unsupported cpu")]
    UnsupportedCpu,
    /// A build was cancelled through the progress monitor.
    #[error("build cancelled")]
    Cancelled,
}

/// Scene creation flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct SceneFlags(u32);

impl SceneFlags {
    /// Geometry is fixed after the first commit.
    pub const STATIC: Self = Self(0);
    /// Geometry may be added, removed and modified between commits.
    pub const DYNAMIC: Self = Self(1 << 0);
    /// Favour memory footprint over build speed.
    pub const COMPACT: Self = Self(1 << 8);
    /// Optimise for coherent ray batches.
    pub const COHERENT: Self = Self(1 << 9);
    /// Optimise for incoherent ray batches.
    pub const INCOHERENT: Self = Self(1 << 10);
    /// Spend more build time for faster traversal.
    pub const HIGH_QUALITY: Self = Self(1 << 11);
    /// Avoid optimisations that reduce robustness.
    pub const ROBUST: Self = Self(1 << 16);

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true for dynamic scenes.
    #[must_use]
    pub const fn is_dynamic(self) -> bool {
        self.contains(Self::DYNAMIC)
    }

    /// Returns true for robust scenes.
    #[must_use]
    pub const fn is_robust(self) -> bool {
        self.contains(Self::ROBUST)
    }

    /// Maps a small selector onto a flag combination.
    ///
    /// Bits of `index` select, in order, dynamic, compact, coherent,
    /// incoherent, high quality and robust. Cycling `index` therefore walks
    /// every combination the regression loops want to cover.
    #[must_use]
    pub const fn from_selector(index: usize) -> Self {
        let table = [
            Self::DYNAMIC,
            Self::COMPACT,
            Self::COHERENT,
            Self::INCOHERENT,
            Self::HIGH_QUALITY,
            Self::ROBUST,
        ];
        let mut bits = 0;
        let mut i = 0;
        while i < table.len() {
            if index & (1 << i) != 0 {
                bits |= table[i].0;
            }
            i += 1;
        }
        Self(bits)
    }
}

/// Renders as `static` or `dynamic` followed by the set quality bits, e.g.
/// `dynamic_compact_robust`.
impl fmt::Display for SceneFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_dynamic() { "dynamic" } else { "static" })?;
        let named = [
            (Self::COMPACT, "compact"),
            (Self::COHERENT, "coherent"),
            (Self::INCOHERENT, "incoherent"),
            (Self::HIGH_QUALITY, "high_quality"),
            (Self::ROBUST, "robust"),
        ];
        for (flag, name) in named {
            if self.contains(flag) {
                write!(f, "_{name}")?;
            }
        }
        Ok(())
    }
}

impl BitOr for SceneFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// How a geometry may change after it has been committed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum GeometryFlags {
    /// Never modified after creation.
    #[default]
    Static,
    /// Vertex positions may change.
    Deformable,
    /// Vertex positions and topology may change.
    Dynamic,
}

impl GeometryFlags {
    /// Returns true if buffers may be remapped after a commit.
    #[must_use]
    pub const fn is_mutable(self) -> bool {
        !matches!(self, Self::Static)
    }
}

/// A procedural primitive supplied by the harness.
///
/// The engine only sees bounds and an intersection callback.
pub trait UserGeometry: Send + Sync + fmt::Debug {
    /// Bounds of primitive `item`.
    fn bounds(&self, item: u32) -> Aabb;

    /// Intersects `ray` with primitive `item`, returning the hit distance.
    fn intersect(&self, item: u32, ray: &Ray) -> Option<f32>;
}

/// Geometry type and type-specific sizes.
#[derive(Clone, Debug)]
pub enum GeometryKind {
    /// Indexed triangles, three indices per primitive.
    Triangles,
    /// Subdivision faces with a per-face vertex count; `edge_count` indices total.
    Subdivision {
        /// Number of face-vertex indices.
        edge_count: usize,
    },
    /// Cubic curves, one start index per primitive, four control points each.
    Curves,
    /// Procedural primitives.
    User(Arc<dyn UserGeometry>),
}

impl GeometryKind {
    /// Short name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Triangles => "triangles",
            Self::Subdivision { .. } => "subdivision",
            Self::Curves => "curves",
            Self::User(_) => "user",
        }
    }
}

/// Parameters for [`crate::engine::Device::create_geometry`].
#[derive(Clone, Debug)]
pub struct GeometryDesc {
    /// Geometry type.
    pub kind: GeometryKind,
    /// Mutability after commit.
    pub flags: GeometryFlags,
    /// Number of primitives (triangles, faces, curves or user items).
    pub primitive_count: usize,
    /// Number of vertices per time step.
    pub vertex_count: usize,
    /// Number of motion-blur time steps (1 or 2).
    pub time_steps: usize,
}

/// Buffers a geometry exposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Primitive indices.
    Index,
    /// Vertex positions for time step 0.
    Vertex0,
    /// Vertex positions for time step 1.
    Vertex1,
    /// Per-face vertex counts (subdivision only).
    FaceCounts,
}

impl BufferKind {
    /// Vertex buffer for the given time step.
    #[must_use]
    pub const fn vertex(time_step: usize) -> Self {
        if time_step == 0 {
            Self::Vertex0
        } else {
            Self::Vertex1
        }
    }

    /// Returns true for vertex buffers.
    #[must_use]
    pub const fn is_vertex(self) -> bool {
        matches!(self, Self::Vertex0 | Self::Vertex1)
    }
}

/// A vertex with a radius lane (used by curves, ignored otherwise).
pub type Vertex = [f32; 4];

/// Owned contents of a buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum BufferData {
    /// Vertex data.
    Vertices(Vec<Vertex>),
    /// Index or count data.
    Indices(Vec<u32>),
}

impl BufferData {
    /// Size in bytes as the engine accounts it.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Vertices(v) => v.len() * std::mem::size_of::<Vertex>(),
            Self::Indices(i) => i.len() * std::mem::size_of::<u32>(),
        }
    }
}

/// A buffer checked out with [`crate::engine::Device::map_buffer`].
///
/// The engine considers the buffer mapped until it is handed back through
/// `unmap_buffer`; committing in between is an invalid operation.
#[derive(Debug)]
pub struct MappedBuffer {
    pub(crate) geometry: GeometryId,
    pub(crate) kind: BufferKind,
    pub(crate) data: BufferData,
}

impl MappedBuffer {
    /// Geometry the buffer belongs to.
    #[must_use]
    pub const fn geometry(&self) -> GeometryId {
        self.geometry
    }

    /// Which buffer this is.
    #[must_use]
    pub const fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Mutable access to vertex data, if this is a vertex buffer.
    pub fn vertices_mut(&mut self) -> Option<&mut [Vertex]> {
        match &mut self.data {
            BufferData::Vertices(v) => Some(v),
            BufferData::Indices(_) => None,
        }
    }

    /// Mutable access to index data, if this is an index buffer.
    pub fn indices_mut(&mut self) -> Option<&mut [u32]> {
        match &mut self.data {
            BufferData::Indices(i) => Some(i),
            BufferData::Vertices(_) => None,
        }
    }
}

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    /// Lower corner.
    pub lower: [f32; 3],
    /// Upper corner.
    pub upper: [f32; 3],
}

impl Aabb {
    /// An empty box that any `extend` call replaces.
    pub const EMPTY: Self = Self {
        lower: [f32::INFINITY; 3],
        upper: [f32::NEG_INFINITY; 3],
    };

    /// Grows the box to contain `p`.
    pub fn extend(&mut self, p: [f32; 3]) {
        for axis in 0..3 {
            self.lower[axis] = self.lower[axis].min(p[axis]);
            self.upper[axis] = self.upper[axis].max(p[axis]);
        }
    }

    /// Returns true if the box has finite, ordered corners.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        (0..3).all(|a| {
            self.lower[a].is_finite() && self.upper[a].is_finite() && self.lower[a] <= self.upper[a]
        })
    }

    /// Slab test; returns the entry distance within `[tnear, tfar]`.
    #[must_use]
    pub fn intersect(&self, ray: &Ray) -> Option<f32> {
        let mut t0 = ray.tnear;
        let mut t1 = ray.tfar;
        for axis in 0..3 {
            let inv = 1.0 / ray.dir[axis];
            let mut near = (self.lower[axis] - ray.origin[axis]) * inv;
            let mut far = (self.upper[axis] - ray.origin[axis]) * inv;
            if near > far {
                std::mem::swap(&mut near, &mut far);
            }
            t0 = if near > t0 { near } else { t0 };
            t1 = if far < t1 { far } else { t1 };
            if t0 > t1 || t0.is_nan() || t1.is_nan() {
                return None;
            }
        }
        Some(t0)
    }
}

/// A hit record written by `intersect`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hit {
    /// Geometry that was hit.
    pub geometry: GeometryId,
    /// Primitive within the geometry.
    pub primitive: u32,
    /// Hit distance along the ray.
    pub t: f32,
    /// Barycentric u.
    pub u: f32,
    /// Barycentric v.
    pub v: f32,
}

/// A single ray with its query result slots.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    /// Origin.
    pub origin: [f32; 3],
    /// Direction (not necessarily normalized).
    pub dir: [f32; 3],
    /// Start of the valid segment.
    pub tnear: f32,
    /// End of the valid segment; shortened by hits.
    pub tfar: f32,
    /// Nearest hit, filled by `intersect`.
    pub hit: Option<Hit>,
    /// Set by `occluded` when anything blocks the segment.
    pub occluded: bool,
}

impl Ray {
    /// Creates an unbounded ray.
    #[must_use]
    pub const fn new(origin: [f32; 3], dir: [f32; 3]) -> Self {
        Self {
            origin,
            dir,
            tnear: 0.0,
            tfar: f32::INFINITY,
            hit: None,
            occluded: false,
        }
    }

    /// Returns true if either query kind reported something.
    #[must_use]
    pub const fn any_hit(&self) -> bool {
        self.hit.is_some() || self.occluded
    }
}

/// Traversal hint passed with every query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub enum TraversalHint {
    /// Rays in the batch are spatially coherent.
    Coherent,
    /// Rays in the batch are unrelated.
    Incoherent,
}

/// Fixed packet widths.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub enum PacketWidth {
    /// Four lanes.
    W4,
    /// Eight lanes.
    W8,
    /// Sixteen lanes.
    W16,
}

impl PacketWidth {
    /// Number of lanes.
    #[must_use]
    pub const fn lanes(self) -> usize {
        match self {
            Self::W4 => 4,
            Self::W8 => 8,
            Self::W16 => 16,
        }
    }
}

/// Ray representation handed to a query.
#[derive(Debug)]
pub enum RayBatch<'a> {
    /// One ray.
    Single(&'a mut Ray),
    /// A fixed-width packet with a lane validity mask.
    Packet {
        /// Packet width; `rays` and `valid` must have exactly this many lanes.
        width: PacketWidth,
        /// Lanes to trace.
        valid: &'a [bool],
        /// Lane rays.
        rays: &'a mut [Ray],
    },
    /// A stream of any length, optionally masked.
    Stream {
        /// Stream rays.
        rays: &'a mut [Ray],
        /// Per-ray active mask; `None` traces everything.
        active: Option<&'a [bool]>,
    },
}

/// Ray-query modes a device can advertise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub enum QueryMode {
    /// One ray per call.
    Single,
    /// Fixed-width packets.
    Packet(PacketWidth),
    /// Unmasked stream.
    Stream,
    /// Stream with a per-ray active mask.
    MaskedStream,
}

impl QueryMode {
    /// Every mode in a stable order.
    pub const ALL: [Self; 6] = [
        Self::Single,
        Self::Packet(PacketWidth::W4),
        Self::Packet(PacketWidth::W8),
        Self::Packet(PacketWidth::W16),
        Self::Stream,
        Self::MaskedStream,
    ];
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Packet(w) => write!(f, "packet{}", w.lanes()),
            Self::Stream => write!(f, "stream"),
            Self::MaskedStream => write!(f, "masked-stream"),
        }
    }
}

/// Nearest-hit or any-hit query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub enum QueryKind {
    /// Nearest hit (`intersect`).
    Intersect,
    /// Any hit (`occluded`).
    Occluded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_walks_flag_bits() {
        assert_eq!(SceneFlags::from_selector(0), SceneFlags::STATIC);
        assert_eq!(SceneFlags::from_selector(1), SceneFlags::DYNAMIC);
        assert_eq!(
            SceneFlags::from_selector(0b10_0011),
            SceneFlags::DYNAMIC | SceneFlags::COMPACT | SceneFlags::ROBUST
        );
        assert!(SceneFlags::from_selector(33).is_robust());
        assert!(!SceneFlags::from_selector(2).is_dynamic());
    }

    #[test]
    fn flag_names() {
        assert_eq!(SceneFlags::STATIC.to_string(), "static");
        assert_eq!(
            (SceneFlags::DYNAMIC | SceneFlags::COMPACT | SceneFlags::ROBUST).to_string(),
            "dynamic_compact_robust"
        );
    }

    #[test]
    fn aabb_slab_test() {
        let mut bounds = Aabb::EMPTY;
        assert!(!bounds.is_valid());
        bounds.extend([-1.0, -1.0, -1.0]);
        bounds.extend([1.0, 1.0, 1.0]);
        assert!(bounds.is_valid());

        let toward = Ray::new([0.0, 0.0, -5.0], [0.0, 0.0, 1.0]);
        let t = bounds.intersect(&toward).expect("ray should enter box");
        assert!((t - 4.0).abs() < 1e-6);

        let away = Ray::new([0.0, 0.0, -5.0], [0.0, 0.0, -1.0]);
        assert!(bounds.intersect(&away).is_none());
    }

    #[test]
    fn packet_lanes() {
        assert_eq!(PacketWidth::W4.lanes(), 4);
        assert_eq!(PacketWidth::W16.lanes(), 16);
        assert_eq!(QueryMode::Packet(PacketWidth::W8).to_string(), "packet8");
    }
}
