//! The acceleration-structure engine as seen by the harness.
//!
//! [`Device`] is the collaborator contract: scene and geometry CRUD, full and
//! collaborative commits, ray queries, a per-thread error status, and the two
//! monitor hooks the fault injectors attach to. Calls do not return
//! `Result`; failures are reported through [`Device::take_error`], which the
//! harness queries after every call (see [`check`]).
//!
//! [`reference::RefDevice`] is an in-process implementation used by the
//! binary and the test suite.

pub mod reference;
mod types;

use std::sync::Arc;

pub use types::{
    Aabb, BufferData, BufferKind, EngineError, GeometryDesc, GeometryFlags, GeometryId,
    GeometryKind, Hit, MappedBuffer, PacketWidth, QueryKind, QueryMode, Ray, RayBatch, SceneFlags,
    SceneId, TraversalHint, UserGeometry, Vertex,
};

/// Progress hook: receives build progress in `[0, 1]`, returns `false` to
/// request cancellation.
pub type ProgressFn = Arc<dyn Fn(f64) -> bool + Send + Sync>;

/// Memory hook: receives a signed byte delta and whether the allocation has
/// already happened (`post`); returns `false` to deny a positive delta.
pub type MemoryFn = Arc<dyn Fn(i64, bool) -> bool + Send + Sync>;

/// Operations the harness drives on an acceleration-structure engine.
pub trait Device: Send + Sync {
    /// Creates a scene.
    fn new_scene(&self, flags: SceneFlags) -> Option<SceneId>;

    /// Deletes a scene and every geometry in it.
    fn delete_scene(&self, scene: SceneId);

    /// Creates a geometry with uninitialized buffers of the requested sizes.
    fn create_geometry(&self, scene: SceneId, desc: GeometryDesc) -> Option<GeometryId>;

    /// Checks out a buffer for writing.
    fn map_buffer(&self, scene: SceneId, geometry: GeometryId, kind: BufferKind)
        -> Option<MappedBuffer>;

    /// Returns a buffer obtained from `map_buffer`.
    fn unmap_buffer(&self, scene: SceneId, buffer: MappedBuffer);

    /// Replaces a vertex buffer from a flat `f32` array read with
    /// `stride_bytes` between consecutive vertices.
    fn set_buffer(
        &self,
        scene: SceneId,
        geometry: GeometryId,
        kind: BufferKind,
        data: &[f32],
        stride_bytes: usize,
    );

    /// Includes a geometry in subsequent builds.
    fn enable_geometry(&self, scene: SceneId, geometry: GeometryId);

    /// Excludes a geometry from subsequent builds.
    fn disable_geometry(&self, scene: SceneId, geometry: GeometryId);

    /// Deletes a geometry.
    fn delete_geometry(&self, scene: SceneId, geometry: GeometryId);

    /// Builds the scene on the calling thread.
    fn commit(&self, scene: SceneId);

    /// Joins a collaborative build as participant `thread_index` of
    /// `thread_count`. Returns once the build has finished.
    fn commit_partial(&self, scene: SceneId, thread_index: usize, thread_count: usize);

    /// Nearest-hit query.
    fn intersect(&self, scene: SceneId, batch: RayBatch<'_>, hint: TraversalHint);

    /// Any-hit query.
    fn occluded(&self, scene: SceneId, batch: RayBatch<'_>, hint: TraversalHint);

    /// Query modes this device implements.
    fn supported_query_modes(&self) -> Vec<QueryMode>;

    /// Returns and clears the first error recorded for the calling thread.
    fn take_error(&self) -> Option<EngineError>;

    /// Installs or clears the progress hook of a scene.
    fn set_progress_monitor(&self, scene: SceneId, monitor: Option<ProgressFn>);

    /// Installs or clears the device-wide memory hook.
    fn set_memory_monitor(&self, monitor: Option<MemoryFn>);
}

/// Queries the error status after an engine call.
pub fn check(device: &dyn Device) -> crate::Result<()> {
    match device.take_error() {
        None => Ok(()),
        Some(code) => Err(code.into()),
    }
}

/// Like [`check`], but attaches a description of the failed call.
pub fn check_op(device: &dyn Device, op: &str) -> crate::Result<()> {
    use crate::error::ResultExt;
    check(device).with_context(|| format!("{op} failed"))
}
