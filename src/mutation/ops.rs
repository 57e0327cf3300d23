//! Mutation operations and the slot table they act on.

use crate::engine::{GeometryFlags, GeometryId};

/// Geometry shapes the generator creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeKind {
    /// Triangulated sphere.
    Sphere,
    /// Quad-faced sphere.
    SubdivSphere,
    /// Four-point curves.
    Hair,
    /// Procedural sphere.
    UserSphere,
    /// Triangles over random bit patterns.
    GarbageTriangles,
    /// Curves over random bit patterns.
    GarbageHair,
}

/// One edit applied to a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOp {
    /// A geometry was requested for `slot`.
    Create {
        /// Slot index.
        slot: usize,
        /// Shape.
        shape: ShapeKind,
        /// Mutability.
        flags: GeometryFlags,
        /// Two time steps.
        motion: bool,
        /// Tessellation or primitive count.
        size: usize,
    },
    /// The geometry in `slot` was deleted.
    Delete {
        /// Slot index.
        slot: usize,
    },
    /// The vertices of the geometry in `slot` were moved.
    Displace {
        /// Slot index.
        slot: usize,
    },
    /// Every live geometry was deleted.
    Clear {
        /// Geometries removed.
        removed: usize,
    },
}

/// A live geometry tracked by the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotEntry {
    /// Engine id.
    pub geometry: GeometryId,
    /// Shape.
    pub shape: ShapeKind,
    /// Mutability.
    pub flags: GeometryFlags,
    /// Number of vertex time steps.
    pub time_steps: usize,
}

impl SlotEntry {
    /// Static geometry can only be deleted; everything else may also be
    /// displaced.
    #[must_use]
    pub const fn is_displaceable(&self) -> bool {
        self.flags.is_mutable() && !matches!(self.shape, ShapeKind::UserSphere)
    }
}

/// Fixed-size table mapping slots to live geometries.
#[derive(Debug, Clone, Default)]
pub struct SlotTable {
    slots: Vec<Option<SlotEntry>>,
}

impl SlotTable {
    /// Creates an empty table with `len` slots.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            slots: vec![None; len],
        }
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if the table has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn live(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Entry in `slot`.
    #[must_use]
    pub fn get(&self, slot: usize) -> Option<&SlotEntry> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Stores `entry` in `slot`.
    pub fn insert(&mut self, slot: usize, entry: SlotEntry) {
        if let Some(s) = self.slots.get_mut(slot) {
            *s = Some(entry);
        }
    }

    /// Empties `slot`.
    pub fn remove(&mut self, slot: usize) -> Option<SlotEntry> {
        self.slots.get_mut(slot).and_then(Option::take)
    }

    /// Empties every slot and returns the removed entries.
    pub fn drain(&mut self) -> Vec<SlotEntry> {
        self.slots.iter_mut().filter_map(Option::take).collect()
    }

    /// First free slot, used where slot choice is sequential.
    #[must_use]
    pub fn first_free(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u32, flags: GeometryFlags) -> SlotEntry {
        SlotEntry {
            geometry: GeometryId(id),
            shape: ShapeKind::Sphere,
            flags,
            time_steps: 1,
        }
    }

    #[test]
    fn insert_remove_drain() {
        let mut table = SlotTable::new(4);
        assert_eq!(table.len(), 4);
        table.insert(1, entry(7, GeometryFlags::Static));
        table.insert(3, entry(8, GeometryFlags::Dynamic));
        table.insert(9, entry(9, GeometryFlags::Dynamic));
        assert_eq!(table.live(), 2);
        assert_eq!(table.first_free(), Some(0));
        assert_eq!(table.remove(1).map(|e| e.geometry), Some(GeometryId(7)));
        assert!(table.remove(1).is_none());
        assert_eq!(table.drain().len(), 1);
        assert_eq!(table.live(), 0);
    }

    #[test]
    fn only_mutable_meshes_are_displaceable() {
        assert!(!entry(0, GeometryFlags::Static).is_displaceable());
        assert!(entry(0, GeometryFlags::Deformable).is_displaceable());
        let user = SlotEntry {
            shape: ShapeKind::UserSphere,
            ..entry(0, GeometryFlags::Dynamic)
        };
        assert!(!user.is_displaceable());
    }
}
