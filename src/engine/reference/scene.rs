//! Scene and geometry storage for the reference device.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::build::BuildSession;
use super::ledger::Ledger;
use super::query::BuiltScene;
use crate::engine::{
    BufferData, BufferKind, EngineError, GeometryDesc, GeometryFlags, GeometryId, GeometryKind,
    ProgressFn, SceneFlags, Vertex,
};

pub(super) struct GeometryRecord {
    pub kind: GeometryKind,
    pub flags: GeometryFlags,
    pub enabled: bool,
    /// Part of a successful build at least once.
    pub committed: bool,
    pub primitive_count: usize,
    pub vertex_count: usize,
    pub indices: Vec<u32>,
    pub face_counts: Vec<u32>,
    pub vertices: Vec<Vec<Vertex>>,
    pub mapped: Vec<BufferKind>,
    pub buffer_bytes: i64,
}

fn index_len(desc: &GeometryDesc) -> usize {
    match desc.kind {
        GeometryKind::Triangles => desc.primitive_count * 3,
        GeometryKind::Subdivision { edge_count } => edge_count,
        GeometryKind::Curves => desc.primitive_count,
        GeometryKind::User(_) => 0,
    }
}

impl GeometryRecord {
    /// Allocates buffers for `desc`, reporting each one to the ledger.
    pub fn allocate(desc: GeometryDesc, ledger: &mut Ledger) -> Result<Self, EngineError> {
        if desc.time_steps == 0 || desc.time_steps > 2 {
            return Err(EngineError::InvalidArgument);
        }
        let is_user = matches!(desc.kind, GeometryKind::User(_));
        let vertex_steps = if is_user { 0 } else { desc.time_steps };

        let index_count = index_len(&desc);
        ledger.allocate(index_count * std::mem::size_of::<u32>())?;
        let indices = vec![0; index_count];

        let face_counts = if matches!(desc.kind, GeometryKind::Subdivision { .. }) {
            ledger.allocate(desc.primitive_count * std::mem::size_of::<u32>())?;
            vec![0; desc.primitive_count]
        } else {
            Vec::new()
        };

        let mut vertices = Vec::with_capacity(vertex_steps);
        for _ in 0..vertex_steps {
            ledger.allocate(desc.vertex_count * std::mem::size_of::<Vertex>())?;
            vertices.push(vec![[0.0; 4]; desc.vertex_count]);
        }

        Ok(Self {
            kind: desc.kind,
            flags: desc.flags,
            enabled: true,
            committed: false,
            primitive_count: desc.primitive_count,
            vertex_count: desc.vertex_count,
            indices,
            face_counts,
            vertices,
            mapped: Vec::new(),
            buffer_bytes: ledger.held(),
        })
    }

    pub fn has_buffer(&self, kind: BufferKind) -> bool {
        match kind {
            BufferKind::Index => !matches!(self.kind, GeometryKind::User(_)),
            BufferKind::FaceCounts => matches!(self.kind, GeometryKind::Subdivision { .. }),
            BufferKind::Vertex0 => !self.vertices.is_empty(),
            BufferKind::Vertex1 => self.vertices.len() > 1,
        }
    }

    pub fn expected_len(&self, kind: BufferKind) -> usize {
        match kind {
            BufferKind::Index => match self.kind {
                GeometryKind::Triangles => self.primitive_count * 3,
                GeometryKind::Subdivision { edge_count } => edge_count,
                GeometryKind::Curves => self.primitive_count,
                GeometryKind::User(_) => 0,
            },
            BufferKind::FaceCounts => self.primitive_count,
            BufferKind::Vertex0 | BufferKind::Vertex1 => self.vertex_count,
        }
    }

    /// Rejects edits a committed geometry's flags do not allow.
    pub fn check_mutable(&self, kind: BufferKind) -> Result<(), EngineError> {
        if !self.committed {
            return Ok(());
        }
        match self.flags {
            GeometryFlags::Static => Err(EngineError::InvalidOperation),
            GeometryFlags::Deformable if !kind.is_vertex() => Err(EngineError::InvalidOperation),
            GeometryFlags::Deformable | GeometryFlags::Dynamic => Ok(()),
        }
    }

    pub fn take_buffer(&mut self, kind: BufferKind) -> BufferData {
        match kind {
            BufferKind::Index => BufferData::Indices(std::mem::take(&mut self.indices)),
            BufferKind::FaceCounts => BufferData::Indices(std::mem::take(&mut self.face_counts)),
            BufferKind::Vertex0 => BufferData::Vertices(std::mem::take(&mut self.vertices[0])),
            BufferKind::Vertex1 => BufferData::Vertices(std::mem::take(&mut self.vertices[1])),
        }
    }

    pub fn restore_buffer(&mut self, kind: BufferKind, data: BufferData) -> Result<(), EngineError> {
        match (kind, data) {
            (BufferKind::Index, BufferData::Indices(i)) => self.indices = i,
            (BufferKind::FaceCounts, BufferData::Indices(c)) => self.face_counts = c,
            (BufferKind::Vertex0, BufferData::Vertices(v)) => self.vertices[0] = v,
            (BufferKind::Vertex1, BufferData::Vertices(v)) => self.vertices[1] = v,
            _ => return Err(EngineError::InvalidArgument),
        }
        Ok(())
    }

    pub fn vertex_buffer_mut(&mut self, kind: BufferKind) -> Option<&mut Vec<Vertex>> {
        match kind {
            BufferKind::Vertex0 => self.vertices.get_mut(0),
            BufferKind::Vertex1 => self.vertices.get_mut(1),
            BufferKind::Index | BufferKind::FaceCounts => None,
        }
    }
}

pub(super) struct SceneData {
    pub geometries: Vec<Option<GeometryRecord>>,
    pub modified: bool,
    pub committed_once: bool,
    pub built: Option<BuiltScene>,
}

impl SceneData {
    pub fn geometry(&self, id: GeometryId) -> Result<&GeometryRecord, EngineError> {
        self.geometries
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(EngineError::InvalidArgument)
    }

    pub fn geometry_mut(&mut self, id: GeometryId) -> Result<&mut GeometryRecord, EngineError> {
        self.geometries
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(EngineError::InvalidArgument)
    }

    /// Stores a record in the lowest free slot.
    pub fn insert(&mut self, record: GeometryRecord) -> GeometryId {
        let slot = if let Some(free) = self.geometries.iter().position(Option::is_none) {
            self.geometries[free] = Some(record);
            free
        } else {
            self.geometries.push(Some(record));
            self.geometries.len() - 1
        };
        self.modified = true;
        GeometryId(u32::try_from(slot).unwrap_or(u32::MAX))
    }

    pub fn any_mapped(&self) -> bool {
        self.geometries
            .iter()
            .flatten()
            .any(|g| !g.mapped.is_empty())
    }

    /// Bytes held by geometry buffers and built state.
    pub fn held_bytes(&self) -> i64 {
        let buffers: i64 = self.geometries.iter().flatten().map(|g| g.buffer_bytes).sum();
        buffers + self.built.as_ref().map_or(0, |b| b.bytes)
    }
}

pub(super) struct SceneCell {
    pub flags: SceneFlags,
    pub data: RwLock<SceneData>,
    /// Serializes full commits.
    pub build_lock: Mutex<()>,
    /// Active collaborative build, if any.
    pub session: Mutex<Option<Arc<BuildSession>>>,
    pub progress: RwLock<Option<ProgressFn>>,
}

impl SceneCell {
    pub fn new(flags: SceneFlags) -> Self {
        Self {
            flags,
            data: RwLock::new(SceneData {
                geometries: Vec::new(),
                modified: true,
                committed_once: false,
                built: None,
            }),
            build_lock: Mutex::new(()),
            session: Mutex::new(None),
            progress: RwLock::new(None),
        }
    }

    /// Static scenes are frozen after their first successful commit.
    pub fn check_editable(&self, data: &SceneData) -> Result<(), EngineError> {
        if !self.flags.is_dynamic() && data.committed_once {
            return Err(EngineError::InvalidOperation);
        }
        Ok(())
    }
}
