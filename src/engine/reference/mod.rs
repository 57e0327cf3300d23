//! In-process reference implementation of [`Device`].
//!
//! Geometry lives in plain vectors, builds produce a two-level chunk
//! hierarchy, and queries are brute force below the chunk level. The device
//! honours the full collaborator contract: per-thread sticky error status,
//! memory accounting through the device hook, cancellation through the
//! scene progress hook, and collaborative commits.

mod build;
mod ledger;
mod query;
mod scene;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, RwLock};

use self::build::{build_share, finalize, BuildControl, BuildPlan, BuildSession};
use self::ledger::{release, Ledger};
use self::scene::{GeometryRecord, SceneCell};
use crate::engine::{
    BufferData, BufferKind, Device, EngineError, GeometryDesc, GeometryFlags, GeometryId,
    MappedBuffer, MemoryFn, ProgressFn, QueryKind, QueryMode, Ray, RayBatch, SceneFlags, SceneId,
    TraversalHint,
};

/// Options for [`RefDevice`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RefDeviceConfig {
    /// Ignore hits on triangles whose front face points away from the ray.
    pub backface_culling: bool,
}

impl RefDeviceConfig {
    /// Sets back-face culling.
    #[must_use]
    pub const fn backface_culling(mut self, enabled: bool) -> Self {
        self.backface_culling = enabled;
        self
    }
}

/// Reference acceleration-structure device.
pub struct RefDevice {
    config: RefDeviceConfig,
    scenes: RwLock<HashMap<SceneId, Arc<SceneCell>>>,
    next_scene: AtomicU32,
    memory: RwLock<Option<MemoryFn>>,
    errors: Mutex<HashMap<ThreadId, EngineError>>,
}

impl std::fmt::Debug for RefDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefDevice")
            .field("config", &self.config)
            .field("scenes", &self.scenes.read().len())
            .finish_non_exhaustive()
    }
}

impl Default for RefDevice {
    fn default() -> Self {
        Self::new(RefDeviceConfig::default())
    }
}

impl RefDevice {
    /// Creates a device.
    #[must_use]
    pub fn new(config: RefDeviceConfig) -> Self {
        Self {
            config,
            scenes: RwLock::new(HashMap::new()),
            next_scene: AtomicU32::new(1),
            memory: RwLock::new(None),
            errors: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the device options.
    #[must_use]
    pub const fn config(&self) -> RefDeviceConfig {
        self.config
    }

    /// Number of scenes not yet deleted.
    #[must_use]
    pub fn live_scenes(&self) -> usize {
        self.scenes.read().len()
    }

    fn scene(&self, id: SceneId) -> Result<Arc<SceneCell>, EngineError> {
        self.scenes
            .read()
            .get(&id)
            .cloned()
            .ok_or(EngineError::InvalidArgument)
    }

    fn memory_monitor(&self) -> Option<MemoryFn> {
        self.memory.read().clone()
    }

    fn record(&self, err: EngineError) {
        let mut errors = self.errors.lock();
        errors.entry(thread::current().id()).or_insert(err);
    }

    fn status<T>(&self, result: Result<T, EngineError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::trace!(?err, "engine call failed");
                self.record(err);
                None
            }
        }
    }

    fn try_delete_scene(&self, id: SceneId) -> Result<(), EngineError> {
        let cell = self
            .scenes
            .write()
            .remove(&id)
            .ok_or(EngineError::InvalidArgument)?;
        let mut data = cell.data.write();
        release(self.memory_monitor().as_ref(), data.held_bytes());
        data.geometries.clear();
        data.built = None;
        Ok(())
    }

    fn try_create_geometry(&self, id: SceneId, desc: GeometryDesc) -> Result<GeometryId, EngineError> {
        let cell = self.scene(id)?;
        let mut data = cell.data.write();
        cell.check_editable(&data)?;
        if !cell.flags.is_dynamic() && desc.flags != GeometryFlags::Static {
            return Err(EngineError::InvalidOperation);
        }
        let mut ledger = Ledger::new(self.memory_monitor());
        match GeometryRecord::allocate(desc, &mut ledger) {
            Ok(record) => {
                let _ = ledger.into_held();
                Ok(data.insert(record))
            }
            Err(err) => {
                ledger.release_all();
                Err(err)
            }
        }
    }

    fn try_map(&self, id: SceneId, geometry: GeometryId, kind: BufferKind) -> Result<MappedBuffer, EngineError> {
        let cell = self.scene(id)?;
        let mut data = cell.data.write();
        cell.check_editable(&data)?;
        let record = data.geometry_mut(geometry)?;
        if !record.has_buffer(kind) {
            return Err(EngineError::InvalidArgument);
        }
        record.check_mutable(kind)?;
        if record.mapped.contains(&kind) {
            return Err(EngineError::InvalidOperation);
        }
        record.mapped.push(kind);
        Ok(MappedBuffer {
            geometry,
            kind,
            data: record.take_buffer(kind),
        })
    }

    fn try_unmap(&self, id: SceneId, buffer: MappedBuffer) -> Result<(), EngineError> {
        let cell = self.scene(id)?;
        let mut data = cell.data.write();
        let record = data.geometry_mut(buffer.geometry)?;
        let Some(pos) = record.mapped.iter().position(|k| *k == buffer.kind) else {
            return Err(EngineError::InvalidOperation);
        };
        record.mapped.swap_remove(pos);

        let expected = record.expected_len(buffer.kind);
        let mut resized = false;
        let contents = match buffer.data {
            BufferData::Vertices(mut v) => {
                resized = v.len() != expected;
                v.resize(expected, [0.0; 4]);
                BufferData::Vertices(v)
            }
            BufferData::Indices(mut i) => {
                resized = i.len() != expected;
                i.resize(expected, 0);
                BufferData::Indices(i)
            }
        };
        record.restore_buffer(buffer.kind, contents)?;
        data.modified = true;
        if resized {
            return Err(EngineError::InvalidArgument);
        }
        Ok(())
    }

    fn try_set_buffer(
        &self,
        id: SceneId,
        geometry: GeometryId,
        kind: BufferKind,
        source: &[f32],
        stride_bytes: usize,
    ) -> Result<(), EngineError> {
        const FLOAT: usize = std::mem::size_of::<f32>();
        if !kind.is_vertex() || stride_bytes % FLOAT != 0 || stride_bytes < 3 * FLOAT {
            return Err(EngineError::InvalidArgument);
        }
        let stride = stride_bytes / FLOAT;
        let cell = self.scene(id)?;
        let mut data = cell.data.write();
        cell.check_editable(&data)?;
        let record = data.geometry_mut(geometry)?;
        if !record.has_buffer(kind) {
            return Err(EngineError::InvalidArgument);
        }
        record.check_mutable(kind)?;
        if record.mapped.contains(&kind) {
            return Err(EngineError::InvalidOperation);
        }
        let count = record.vertex_count;
        if count > 0 && source.len() < (count - 1) * stride + 3 {
            return Err(EngineError::InvalidArgument);
        }
        let Some(target) = record.vertex_buffer_mut(kind) else {
            return Err(EngineError::InvalidArgument);
        };
        for (i, vertex) in target.iter_mut().enumerate() {
            let base = i * stride;
            let radius = if stride > 3 { source.get(base + 3).copied().unwrap_or(0.0) } else { 0.0 };
            *vertex = [source[base], source[base + 1], source[base + 2], radius];
        }
        data.modified = true;
        Ok(())
    }

    fn try_toggle(&self, id: SceneId, geometry: GeometryId, enabled: bool) -> Result<(), EngineError> {
        let cell = self.scene(id)?;
        let mut data = cell.data.write();
        cell.check_editable(&data)?;
        let record = data.geometry_mut(geometry)?;
        if record.enabled != enabled {
            record.enabled = enabled;
            data.modified = true;
        }
        Ok(())
    }

    fn try_delete_geometry(&self, id: SceneId, geometry: GeometryId) -> Result<(), EngineError> {
        let cell = self.scene(id)?;
        let mut data = cell.data.write();
        cell.check_editable(&data)?;
        data.geometry(geometry)?;
        if let Some(record) = data.geometries[geometry.0 as usize].take() {
            release(self.memory_monitor().as_ref(), record.buffer_bytes);
        }
        data.modified = true;
        Ok(())
    }

    fn try_commit(&self, id: SceneId) -> Result<(), EngineError> {
        let cell = self.scene(id)?;
        let _serial = cell.build_lock.lock();
        if cell.session.lock().is_some() {
            return Err(EngineError::InvalidOperation);
        }
        let memory = self.memory_monitor();
        let progress = cell.progress.read().clone();
        let (plan, part, control) = {
            let data = cell.data.read();
            if data.any_mapped() {
                return Err(EngineError::InvalidOperation);
            }
            if !data.modified && data.built.is_some() {
                return Ok(());
            }
            let plan = BuildPlan::new(&data);
            let control = BuildControl::new(plan.total_work, progress);
            let part = build_share(&data, &plan, 0, 1, memory.clone(), &control);
            (plan, part, control)
        };
        let mut data = cell.data.write();
        let outcome = finalize(&mut data, &plan, vec![part], &control, memory.as_ref());
        tracing::debug!(scene = %id, ok = outcome.is_ok(), "commit finished");
        outcome
    }

    fn try_commit_partial(&self, id: SceneId, index: usize, count: usize) -> Result<(), EngineError> {
        if count == 0 || index >= count {
            return Err(EngineError::InvalidArgument);
        }
        let cell = self.scene(id)?;
        let memory = self.memory_monitor();
        let session = {
            let mut slot = cell.session.lock();
            let session = if let Some(active) = slot.as_ref() {
                if active.thread_count != count {
                    return Err(EngineError::InvalidArgument);
                }
                Arc::clone(active)
            } else {
                let data = cell.data.read();
                if data.any_mapped() {
                    return Err(EngineError::InvalidOperation);
                }
                if !data.modified && data.built.is_some() {
                    return Ok(());
                }
                let plan = BuildPlan::new(&data);
                drop(data);
                let fresh = Arc::new(BuildSession::new(count, plan, cell.progress.read().clone()));
                *slot = Some(Arc::clone(&fresh));
                fresh
            };
            session.join(index)?;
            session
        };

        let part = {
            let data = cell.data.read();
            build_share(&data, &session.plan, index, count, memory.clone(), &session.control)
        };

        if let Some(parts) = session.contribute(part) {
            cell.session.lock().take();
            let outcome = {
                let mut data = cell.data.write();
                finalize(&mut data, &session.plan, parts, &session.control, memory.as_ref())
            };
            tracing::debug!(scene = %id, participants = count, ok = outcome.is_ok(), "collaborative commit finished");
            session.publish(outcome);
        }
        session.wait()
    }

    fn try_query(
        &self,
        id: SceneId,
        batch: RayBatch<'_>,
        kind: QueryKind,
    ) -> Result<(), EngineError> {
        let cell = self.scene(id)?;
        let data = cell.data.read();
        let built = match &data.built {
            Some(built) if !data.modified => built,
            _ => return Err(EngineError::InvalidOperation),
        };
        let cull = self.config.backface_culling;
        let trace = |ray: &mut Ray| match kind {
            QueryKind::Intersect => {
                built.intersect(ray, cull);
            }
            QueryKind::Occluded => {
                built.occluded(ray, cull);
            }
        };
        match batch {
            RayBatch::Single(ray) => trace(ray),
            RayBatch::Packet { width, valid, rays } => {
                if valid.len() != width.lanes() || rays.len() != width.lanes() {
                    return Err(EngineError::InvalidArgument);
                }
                rays.iter_mut()
                    .zip(valid)
                    .filter(|(_, on)| **on)
                    .for_each(|(ray, _)| trace(ray));
            }
            RayBatch::Stream { rays, active: None } => rays.iter_mut().for_each(trace),
            RayBatch::Stream {
                rays,
                active: Some(mask),
            } => {
                if mask.len() != rays.len() {
                    return Err(EngineError::InvalidArgument);
                }
                rays.iter_mut()
                    .zip(mask)
                    .filter(|(_, on)| **on)
                    .for_each(|(ray, _)| trace(ray));
            }
        }
        Ok(())
    }
}

impl Device for RefDevice {
    fn new_scene(&self, flags: SceneFlags) -> Option<SceneId> {
        let id = SceneId(self.next_scene.fetch_add(1, Ordering::Relaxed));
        self.scenes.write().insert(id, Arc::new(SceneCell::new(flags)));
        Some(id)
    }

    fn delete_scene(&self, scene: SceneId) {
        let result = self.try_delete_scene(scene);
        self.status(result);
    }

    fn create_geometry(&self, scene: SceneId, desc: GeometryDesc) -> Option<GeometryId> {
        let result = self.try_create_geometry(scene, desc);
        self.status(result)
    }

    fn map_buffer(&self, scene: SceneId, geometry: GeometryId, kind: BufferKind) -> Option<MappedBuffer> {
        let result = self.try_map(scene, geometry, kind);
        self.status(result)
    }

    fn unmap_buffer(&self, scene: SceneId, buffer: MappedBuffer) {
        let result = self.try_unmap(scene, buffer);
        self.status(result);
    }

    fn set_buffer(
        &self,
        scene: SceneId,
        geometry: GeometryId,
        kind: BufferKind,
        data: &[f32],
        stride_bytes: usize,
    ) {
        let result = self.try_set_buffer(scene, geometry, kind, data, stride_bytes);
        self.status(result);
    }

    fn enable_geometry(&self, scene: SceneId, geometry: GeometryId) {
        let result = self.try_toggle(scene, geometry, true);
        self.status(result);
    }

    fn disable_geometry(&self, scene: SceneId, geometry: GeometryId) {
        let result = self.try_toggle(scene, geometry, false);
        self.status(result);
    }

    fn delete_geometry(&self, scene: SceneId, geometry: GeometryId) {
        let result = self.try_delete_geometry(scene, geometry);
        self.status(result);
    }

    fn commit(&self, scene: SceneId) {
        let result = self.try_commit(scene);
        self.status(result);
    }

    fn commit_partial(&self, scene: SceneId, thread_index: usize, thread_count: usize) {
        let result = self.try_commit_partial(scene, thread_index, thread_count);
        self.status(result);
    }

    fn intersect(&self, scene: SceneId, batch: RayBatch<'_>, _hint: TraversalHint) {
        let result = self.try_query(scene, batch, QueryKind::Intersect);
        self.status(result);
    }

    fn occluded(&self, scene: SceneId, batch: RayBatch<'_>, _hint: TraversalHint) {
        let result = self.try_query(scene, batch, QueryKind::Occluded);
        self.status(result);
    }

    fn supported_query_modes(&self) -> Vec<QueryMode> {
        QueryMode::ALL.to_vec()
    }

    fn take_error(&self) -> Option<EngineError> {
        self.errors.lock().remove(&thread::current().id())
    }

    fn set_progress_monitor(&self, scene: SceneId, monitor: Option<ProgressFn>) {
        let result = self.scene(scene).map(|cell| {
            *cell.progress.write() = monitor;
        });
        self.status(result);
    }

    fn set_memory_monitor(&self, monitor: Option<MemoryFn>) {
        *self.memory.write() = monitor;
    }
}
