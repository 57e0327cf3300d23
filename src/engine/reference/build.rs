//! Scene builds: single-caller commits and collaborative sessions.
//!
//! A build is planned once (the list of enabled geometries), then executed
//! by one or more participants. Participant `i` of `n` builds every
//! geometry whose plan position is congruent to `i` modulo `n`. Each
//! participant reports its allocations through its own ledger; the last
//! participant to finish either installs the merged result or, if any
//! participant was denied memory or cancelled, releases every byte the
//! build reported.

use parking_lot::{Condvar, Mutex};

use super::ledger::{release, Ledger};
use super::query::{BuiltGeometry, BuiltPrim, BuiltScene, Chunk, CHUNK_SIZE};
use super::scene::{GeometryRecord, SceneData};
use crate::engine::{Aabb, EngineError, GeometryId, GeometryKind, MemoryFn, ProgressFn};

/// Bytes accounted per built primitive.
const PRIM_BYTES: usize = 48;
/// Bytes accounted per chunk node, reported after the fact.
const NODE_BYTES: usize = 64;
/// Primitives between progress reports.
const PROGRESS_STRIDE: usize = 1024;

/// Immutable description of one build.
#[derive(Debug)]
pub(super) struct BuildPlan {
    pub items: Vec<GeometryId>,
    pub total_work: usize,
}

impl BuildPlan {
    pub fn new(data: &SceneData) -> Self {
        let mut items = Vec::new();
        let mut total_work = 0;
        for (slot, geometry) in data.geometries.iter().enumerate() {
            if let Some(g) = geometry {
                if g.enabled {
                    items.push(GeometryId(u32::try_from(slot).unwrap_or(u32::MAX)));
                    total_work += g.primitive_count.max(1);
                }
            }
        }
        Self { items, total_work }
    }
}

/// Shared abort flag and progress bookkeeping for one build.
pub(super) struct BuildControl {
    abort: Mutex<Option<EngineError>>,
    done_work: Mutex<usize>,
    total_work: usize,
    progress: Option<ProgressFn>,
}

impl BuildControl {
    pub fn new(total_work: usize, progress: Option<ProgressFn>) -> Self {
        Self {
            abort: Mutex::new(None),
            done_work: Mutex::new(0),
            total_work,
            progress,
        }
    }

    pub fn aborted(&self) -> Option<EngineError> {
        *self.abort.lock()
    }

    fn abort(&self, err: EngineError) {
        let mut slot = self.abort.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    /// Reports `work` more units done. Returns false once the build has
    /// been aborted; the hook is not asked again after that.
    fn advance(&self, work: usize) -> bool {
        if self.aborted().is_some() {
            return false;
        }
        let fraction = {
            let mut done = self.done_work.lock();
            *done += work;
            #[allow(clippy::cast_precision_loss)]
            let f = *done as f64 / self.total_work.max(1) as f64;
            f.min(1.0)
        };
        if let Some(progress) = &self.progress {
            if !progress(fraction) {
                self.abort(EngineError::Cancelled);
                return false;
            }
        }
        true
    }
}

/// What one participant produced.
pub(super) struct BuildPart {
    pub geometries: Vec<BuiltGeometry>,
    pub held: i64,
}

fn vertex_at(g: &GeometryRecord, index: u32) -> Option<[f32; 3]> {
    let v = g.vertices.first()?.get(index as usize)?;
    let p = [v[0], v[1], v[2]];
    p.iter().all(|c| c.is_finite()).then_some(p)
}

fn motion_bounds(g: &GeometryRecord, index: u32, bounds: &mut Aabb) -> bool {
    for step in &g.vertices {
        match step.get(index as usize) {
            Some(v) if v[..3].iter().all(|c| c.is_finite()) => bounds.extend([v[0], v[1], v[2]]),
            _ => return false,
        }
    }
    true
}

/// Converts one geometry into primitives, skipping anything invalid.
fn primitives(g: &GeometryRecord) -> Vec<(BuiltPrim, Aabb)> {
    let mut out = Vec::new();
    match &g.kind {
        GeometryKind::Triangles => {
            for (prim, tri) in g.indices.chunks_exact(3).enumerate() {
                let mut bounds = Aabb::EMPTY;
                if !tri.iter().all(|&i| motion_bounds(g, i, &mut bounds)) {
                    continue;
                }
                if let (Some(a), Some(b), Some(c)) =
                    (vertex_at(g, tri[0]), vertex_at(g, tri[1]), vertex_at(g, tri[2]))
                {
                    let prim = u32::try_from(prim).unwrap_or(u32::MAX);
                    out.push((BuiltPrim::Triangle { prim, v: [a, b, c] }, bounds));
                }
            }
        }
        GeometryKind::Subdivision { .. } => {
            let mut offset = 0usize;
            for (face, &count) in g.face_counts.iter().enumerate() {
                let count = count as usize;
                let Some(corners) = g.indices.get(offset..offset + count) else {
                    break;
                };
                offset += count;
                if count < 3 {
                    continue;
                }
                let mut bounds = Aabb::EMPTY;
                if !corners.iter().all(|&i| motion_bounds(g, i, &mut bounds)) {
                    continue;
                }
                let face = u32::try_from(face).unwrap_or(u32::MAX);
                for k in 1..count - 1 {
                    if let (Some(a), Some(b), Some(c)) = (
                        vertex_at(g, corners[0]),
                        vertex_at(g, corners[k]),
                        vertex_at(g, corners[k + 1]),
                    ) {
                        out.push((BuiltPrim::Triangle { prim: face, v: [a, b, c] }, bounds));
                    }
                }
            }
        }
        GeometryKind::Curves => {
            for (prim, &start) in g.indices.iter().enumerate() {
                let mut bounds = Aabb::EMPTY;
                let mut valid = true;
                for k in 0..4u32 {
                    let Some(i) = start.checked_add(k) else {
                        valid = false;
                        break;
                    };
                    if !motion_bounds(g, i, &mut bounds) {
                        valid = false;
                        break;
                    }
                    let radius = g
                        .vertices
                        .first()
                        .and_then(|step| step.get(i as usize))
                        .map_or(f32::NAN, |v| v[3].abs());
                    if !radius.is_finite() {
                        valid = false;
                        break;
                    }
                    bounds.lower.iter_mut().for_each(|c| *c -= radius);
                    bounds.upper.iter_mut().for_each(|c| *c += radius);
                }
                if valid && bounds.is_valid() {
                    let prim = u32::try_from(prim).unwrap_or(u32::MAX);
                    out.push((BuiltPrim::Curve { prim, bounds }, bounds));
                }
            }
        }
        GeometryKind::User(user) => {
            for item in 0..g.primitive_count {
                let item = u32::try_from(item).unwrap_or(u32::MAX);
                let bounds = user.bounds(item);
                if bounds.is_valid() {
                    out.push((BuiltPrim::User { item }, bounds));
                }
            }
        }
    }
    out
}

fn build_geometry(
    id: GeometryId,
    g: &GeometryRecord,
    ledger: &mut Ledger,
    control: &BuildControl,
) -> Result<Option<BuiltGeometry>, EngineError> {
    let prims = primitives(g);
    ledger.allocate(prims.len() * PRIM_BYTES)?;

    let mut chunks = Vec::with_capacity(prims.len().div_ceil(CHUNK_SIZE));
    let mut bounds = Aabb::EMPTY;
    let work = g.primitive_count.max(1);
    let mut reported = 0;
    let mut since_progress = 0;
    for group in prims.chunks(CHUNK_SIZE) {
        let mut chunk_bounds = Aabb::EMPTY;
        for (_, b) in group {
            chunk_bounds.extend(b.lower);
            chunk_bounds.extend(b.upper);
        }
        bounds.extend(chunk_bounds.lower);
        bounds.extend(chunk_bounds.upper);
        ledger.grow(NODE_BYTES)?;
        chunks.push(Chunk {
            bounds: chunk_bounds,
            prims: group.iter().map(|(p, _)| p.clone()).collect(),
        });
        since_progress += group.len();
        if since_progress >= PROGRESS_STRIDE {
            if !control.advance(since_progress) {
                return Err(control.aborted().unwrap_or(EngineError::Cancelled));
            }
            reported += since_progress;
            since_progress = 0;
        }
    }
    if !control.advance(work.saturating_sub(reported).max(1)) {
        return Err(control.aborted().unwrap_or(EngineError::Cancelled));
    }

    if chunks.is_empty() {
        return Ok(None);
    }
    let user = match &g.kind {
        GeometryKind::User(user) => Some(std::sync::Arc::clone(user)),
        _ => None,
    };
    Ok(Some(BuiltGeometry {
        id,
        bounds,
        chunks,
        user,
    }))
}

/// Builds participant `index` of `count`'s share of `plan`.
pub(super) fn build_share(
    data: &SceneData,
    plan: &BuildPlan,
    index: usize,
    count: usize,
    memory: Option<MemoryFn>,
    control: &BuildControl,
) -> BuildPart {
    let mut ledger = Ledger::new(memory);
    let mut geometries = Vec::new();
    for id in plan.items.iter().skip(index).step_by(count.max(1)) {
        if control.aborted().is_some() {
            break;
        }
        let Ok(g) = data.geometry(*id) else {
            continue;
        };
        match build_geometry(*id, g, &mut ledger, control) {
            Ok(Some(built)) => geometries.push(built),
            Ok(None) => {}
            Err(err) => {
                control.abort(err);
                break;
            }
        }
    }
    BuildPart {
        geometries,
        held: ledger.into_held(),
    }
}

/// Installs the merged result, or releases everything on abort.
pub(super) fn finalize(
    data: &mut SceneData,
    plan: &BuildPlan,
    parts: Vec<BuildPart>,
    control: &BuildControl,
    memory: Option<&MemoryFn>,
) -> Result<(), EngineError> {
    let held: i64 = parts.iter().map(|p| p.held).sum();
    if let Some(err) = control.aborted() {
        release(memory, held);
        tracing::debug!(?err, released = held, "build aborted");
        return Err(err);
    }

    if let Some(old) = data.built.take() {
        release(memory, old.bytes);
    }
    let mut geometries: Vec<BuiltGeometry> = parts.into_iter().flat_map(|p| p.geometries).collect();
    geometries.sort_by_key(|g| g.id);
    for id in &plan.items {
        if let Ok(g) = data.geometry_mut(*id) {
            g.committed = true;
        }
    }
    data.built = Some(BuiltScene {
        geometries,
        bytes: held,
    });
    data.modified = false;
    data.committed_once = true;
    Ok(())
}

struct SessionState {
    joined: Vec<bool>,
    finished: usize,
    parts: Vec<BuildPart>,
    outcome: Option<Result<(), EngineError>>,
}

/// A collaborative build shared by `thread_count` participants.
pub(super) struct BuildSession {
    pub thread_count: usize,
    pub plan: BuildPlan,
    pub control: BuildControl,
    state: Mutex<SessionState>,
    done: Condvar,
}

impl BuildSession {
    pub fn new(thread_count: usize, plan: BuildPlan, progress: Option<ProgressFn>) -> Self {
        let control = BuildControl::new(plan.total_work, progress);
        Self {
            thread_count,
            plan,
            control,
            state: Mutex::new(SessionState {
                joined: vec![false; thread_count],
                finished: 0,
                parts: Vec::with_capacity(thread_count),
                outcome: None,
            }),
            done: Condvar::new(),
        }
    }

    /// Registers participant `index`; each index may join once.
    pub fn join(&self, index: usize) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        match state.joined.get_mut(index) {
            Some(joined) if !*joined => {
                *joined = true;
                Ok(())
            }
            Some(_) => Err(EngineError::InvalidOperation),
            None => Err(EngineError::InvalidArgument),
        }
    }

    /// Hands in a finished share. Returns the parts when the caller is the
    /// last participant and must finalize.
    pub fn contribute(&self, part: BuildPart) -> Option<Vec<BuildPart>> {
        let mut state = self.state.lock();
        state.parts.push(part);
        state.finished += 1;
        (state.finished == self.thread_count).then(|| std::mem::take(&mut state.parts))
    }

    /// Publishes the outcome and wakes every participant.
    pub fn publish(&self, outcome: Result<(), EngineError>) {
        let mut state = self.state.lock();
        state.outcome = Some(outcome);
        self.done.notify_all();
    }

    /// Blocks until the outcome is published.
    pub fn wait(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        loop {
            if let Some(outcome) = state.outcome {
                return outcome;
            }
            self.done.wait(&mut state);
        }
    }
}
