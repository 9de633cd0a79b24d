//! Ring-addressed cube of chunk slots around an observer.
//!
//! A `ChunkIndex` of extent E covers the `(2E+1)^3` chunk positions
//! centered on a base. Slots are addressed by taking each coordinate
//! modulo the side length, so moving the base by one step along an axis
//! reuses the storage of the departing plane for the arriving one instead
//! of shifting everything.
//!
//! The index stores [`ChunkHandle`]s only; the owning
//! [`crate::store::ChunkStore`] performs the rebase plumbing (it has to
//! look up arriving chunks and maintain reference counts).

use hollow_shared::math::IVec3;

use crate::store::ChunkHandle;

/// Spatial observer over loaded chunks.
#[derive(Debug)]
pub struct ChunkIndex {
    base: IVec3,
    extent: i32,
    side_length: i32,
    slots: Vec<Option<ChunkHandle>>,
    total_indexed: usize,
    last_missing: usize,
}

impl ChunkIndex {
    /// Empty index of the given extent centered on `base`.
    #[must_use]
    pub fn new(base: IVec3, extent: i32) -> Self {
        let side_length = 2 * extent + 1;
        let total = (side_length * side_length * side_length) as usize;
        Self {
            base,
            extent,
            side_length,
            slots: vec![None; total],
            total_indexed: 0,
            last_missing: 0,
        }
    }

    /// Center of the covered cube.
    #[must_use]
    pub const fn base(&self) -> IVec3 {
        self.base
    }

    /// Chebyshev radius of the covered cube.
    #[must_use]
    pub const fn extent(&self) -> i32 {
        self.extent
    }

    /// Lowest covered chunk position.
    #[must_use]
    pub fn coords_begin(&self) -> IVec3 {
        self.base - IVec3::splat(self.extent)
    }

    /// One past the highest covered chunk position.
    #[must_use]
    pub fn coords_end(&self) -> IVec3 {
        self.base + IVec3::splat(self.extent + 1)
    }

    /// Number of covered positions.
    #[must_use]
    pub fn total_chunks(&self) -> usize {
        self.slots.len()
    }

    /// Number of filled slots.
    #[must_use]
    pub const fn indexed_chunks(&self) -> usize {
        self.total_indexed
    }

    /// Number of covered positions without a loaded chunk.
    #[must_use]
    pub fn missing_chunks(&self) -> usize {
        self.slots.len() - self.total_indexed
    }

    /// True while any covered position lacks a chunk.
    #[must_use]
    pub fn has_missing(&self) -> bool {
        self.total_indexed < self.slots.len()
    }

    /// O(1) containment test.
    #[must_use]
    pub fn in_range(&self, pos: IVec3) -> bool {
        (pos - self.base).manhattan_radius() <= self.extent
    }

    /// Ring slot of an in-range position.
    #[must_use]
    pub fn slot_of(&self, pos: IVec3) -> usize {
        let s = self.side_length;
        let x = pos.x.rem_euclid(s);
        let y = pos.y.rem_euclid(s);
        let z = pos.z.rem_euclid(s);
        (x + y * s + z * s * s) as usize
    }

    /// Covered position stored in a ring slot.
    #[must_use]
    pub fn position_of(&self, slot: usize) -> IVec3 {
        let s = self.side_length;
        let slot = slot as i32;
        let ring = IVec3::new(slot % s, (slot / s) % s, slot / (s * s));
        let begin = self.coords_begin();
        let mut pos = IVec3::ZERO;
        for axis in 0..3 {
            pos[axis] = begin[axis] + (ring[axis] - begin[axis].rem_euclid(s)).rem_euclid(s);
        }
        pos
    }

    /// Chunk at a covered position, if any; doubles as a "has" test.
    #[must_use]
    pub fn get(&self, pos: IVec3) -> Option<ChunkHandle> {
        if self.in_range(pos) {
            self.slots[self.slot_of(pos)]
        } else {
            None
        }
    }

    /// Fills the slot for a position. Returns the previous occupant.
    pub(crate) fn set(&mut self, pos: IVec3, handle: ChunkHandle) -> Option<ChunkHandle> {
        let slot = self.slot_of(pos);
        let old = self.slots[slot].replace(handle);
        if old.is_none() {
            self.total_indexed += 1;
        }
        old
    }

    /// Clears the slot for a position. Returns the previous occupant.
    pub(crate) fn unset(&mut self, pos: IVec3) -> Option<ChunkHandle> {
        let slot = self.slot_of(pos);
        let old = self.slots[slot].take();
        if old.is_some() {
            self.total_indexed -= 1;
        }
        old
    }

    /// Clears every slot, returning the evicted handles.
    pub(crate) fn clear(&mut self) -> Vec<ChunkHandle> {
        let evicted = self.slots.iter_mut().filter_map(Option::take).collect();
        self.total_indexed = 0;
        self.last_missing = 0;
        evicted
    }

    /// Moves the base without touching slots; the store re-scans afterwards.
    pub(crate) fn set_base(&mut self, base: IVec3) {
        self.base = base;
    }

    /// Any covered position whose slot is empty.
    ///
    /// Scans from the last result so repeated calls cycle through the
    /// missing set instead of hammering the same hole.
    #[must_use]
    pub fn next_missing(&mut self) -> Option<IVec3> {
        if !self.has_missing() {
            return None;
        }
        let total = self.slots.len();
        for probe in 0..total {
            let slot = (self.last_missing + probe) % total;
            if self.slots[slot].is_none() {
                self.last_missing = slot;
                return Some(self.position_of(slot));
            }
        }
        None
    }
}
