//! Chunk ownership, neighbor links and light propagation.
//!
//! The store owns every loaded chunk in stable slots addressed by
//! [`ChunkHandle`]s; neighbor links and index slots hold handles, never
//! references, so the cyclic chunk graph stays plain data. A handle is
//! valid until the chunk is recycled by [`ChunkStore::clean`], which only
//! happens once no index covers it and its reference count is zero.
//!
//! ## Light maintenance
//!
//! [`ChunkStore::set_block`] keeps the light invariant: a cell's level is
//! its type's luminosity, zero if it blocks light, else one less than its
//! brightest neighbor. Edits run one of two breadth-first passes:
//!
//! - *brighten*: seed the edited cell and flood outward, raising any
//!   transparent cell below `seed - distance`;
//! - *darken*: flood outward zeroing cells strictly darker than the
//!   removed source's level; every cell at or above it re-seeds a brighten
//!   pass so surviving sources fill the shadow back in.
//!
//! Both passes cross chunk borders through neighbor links, and a freshly
//! established link seeds a brighten from both sides of the shared face.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use hollow_shared::constants::CHUNK_SIZE;
use hollow_shared::math::IVec3;

use crate::block::{Block, Face, FaceSet, ALL_FACES};
use crate::block_type::BlockTypeRegistry;
use crate::chunk::Chunk;
use crate::index::ChunkIndex;

/// Stable identifier of a chunk slot in the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChunkHandle(u32);

impl ChunkHandle {
    #[cfg(test)]
    pub(crate) const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Stable identifier of a registered chunk index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IndexHandle(usize);

struct Slot {
    chunk: Chunk,
    neighbors: [Option<ChunkHandle>; 6],
    /// External strong references (transmitters, focus).
    ref_count: u32,
    /// How many registered indices cover this chunk.
    index_refs: u32,
    live: bool,
}

/// Set of loaded chunks plus the spatial indices observing them.
pub struct ChunkStore {
    types: Arc<BlockTypeRegistry>,
    slots: Vec<Slot>,
    free: Vec<ChunkHandle>,
    by_pos: HashMap<IVec3, ChunkHandle>,
    indices: Vec<Option<ChunkIndex>>,
    light_queue: VecDeque<(ChunkHandle, usize)>,
    dark_queue: VecDeque<(ChunkHandle, usize, u8)>,
}

impl ChunkStore {
    /// Empty store over the given type registry.
    #[must_use]
    pub fn new(types: Arc<BlockTypeRegistry>) -> Self {
        Self {
            types,
            slots: Vec::new(),
            free: Vec::new(),
            by_pos: HashMap::new(),
            indices: Vec::new(),
            light_queue: VecDeque::new(),
            dark_queue: VecDeque::new(),
        }
    }

    /// The frozen block type registry.
    #[must_use]
    pub fn types(&self) -> &BlockTypeRegistry {
        &self.types
    }

    /// Shared handle to the registry.
    #[must_use]
    pub fn types_arc(&self) -> Arc<BlockTypeRegistry> {
        Arc::clone(&self.types)
    }

    /// Number of loaded chunks.
    #[must_use]
    pub fn num_loaded(&self) -> usize {
        self.by_pos.len()
    }

    /// Handles of all loaded chunks, in no particular order.
    pub fn loaded(&self) -> impl Iterator<Item = ChunkHandle> + '_ {
        self.by_pos.values().copied()
    }

    /// Chunk behind a handle.
    #[must_use]
    pub fn chunk(&self, handle: ChunkHandle) -> &Chunk {
        let slot = &self.slots[handle.index()];
        debug_assert!(slot.live, "stale chunk handle");
        &slot.chunk
    }

    /// Mutable chunk behind a handle.
    ///
    /// Going through this skips light maintenance; use
    /// [`ChunkStore::set_block`] for gameplay edits.
    pub fn chunk_mut(&mut self, handle: ChunkHandle) -> &mut Chunk {
        &mut self.slots[handle.index()].chunk
    }

    /// Loaded chunk at a position.
    #[must_use]
    pub fn get(&self, pos: IVec3) -> Option<ChunkHandle> {
        self.by_pos.get(&pos).copied()
    }

    /// Takes an external reference on a chunk, pinning it in memory.
    pub fn ref_chunk(&mut self, handle: ChunkHandle) {
        self.slots[handle.index()].ref_count += 1;
    }

    /// Drops an external reference.
    pub fn unref_chunk(&mut self, handle: ChunkHandle) {
        let slot = &mut self.slots[handle.index()];
        debug_assert!(slot.ref_count > 0, "unref without matching ref");
        slot.ref_count = slot.ref_count.saturating_sub(1);
    }

    /// Neighbor of a chunk across a face, if linked.
    #[must_use]
    pub fn neighbor(&self, handle: ChunkHandle, face: Face) -> Option<ChunkHandle> {
        self.slots[handle.index()].neighbors[face as usize]
    }

    // ------------------------------------------------------------------
    // indices

    /// Registers a new observer cube and scans loaded chunks into it.
    pub fn make_index(&mut self, base: IVec3, extent: i32) -> IndexHandle {
        let mut index = ChunkIndex::new(base, extent);
        for (&pos, &handle) in &self.by_pos {
            if index.in_range(pos) && index.set(pos, handle).is_none() {
                self.slots[handle.index()].index_refs += 1;
            }
        }
        let id = self
            .indices
            .iter()
            .position(Option::is_none)
            .unwrap_or(self.indices.len());
        if id == self.indices.len() {
            self.indices.push(Some(index));
        } else {
            self.indices[id] = Some(index);
        }
        IndexHandle(id)
    }

    /// Removes an observer cube, releasing its chunk references.
    pub fn unregister_index(&mut self, handle: IndexHandle) {
        if let Some(mut index) = self.indices[handle.0].take() {
            for chunk in index.clear() {
                self.slots[chunk.index()].index_refs -= 1;
            }
        }
    }

    /// A registered index.
    #[must_use]
    pub fn index(&self, handle: IndexHandle) -> &ChunkIndex {
        self.indices[handle.0].as_ref().expect("index unregistered")
    }

    /// Moves an index's base, shifting planes for small steps and doing a
    /// full rescan when the jump exceeds the extent on any axis.
    pub fn rebase_index(&mut self, handle: IndexHandle, new_base: IVec3) {
        let (base, extent) = {
            let index = self.index(handle);
            (index.base(), index.extent())
        };
        if new_base == base {
            return;
        }

        if (new_base - base).manhattan_radius() > extent {
            let mut index = self.indices[handle.0].take().expect("index unregistered");
            for chunk in index.clear() {
                self.slots[chunk.index()].index_refs -= 1;
            }
            index.set_base(new_base);
            for (&pos, &chunk) in &self.by_pos {
                if index.in_range(pos) && index.set(pos, chunk).is_none() {
                    self.slots[chunk.index()].index_refs += 1;
                }
            }
            self.indices[handle.0] = Some(index);
            return;
        }

        let mut base = base;
        while base != new_base {
            for axis in 0..3 {
                if base[axis] == new_base[axis] {
                    continue;
                }
                let dir = (new_base[axis] - base[axis]).signum();
                self.shift_index(handle, axis, dir);
                base[axis] += dir;
            }
        }
    }

    /// One single-step plane shift along `axis` in direction `dir`.
    fn shift_index(&mut self, handle: IndexHandle, axis: usize, dir: i32) {
        let mut index = self.indices[handle.0].take().expect("index unregistered");
        let extent = index.extent();
        let base = index.base();
        let begin = index.coords_begin();
        let end = index.coords_end();

        // slab leaving on the retro side
        let departing = base[axis] - dir * extent;
        for u in begin[(axis + 1) % 3]..end[(axis + 1) % 3] {
            for v in begin[(axis + 2) % 3]..end[(axis + 2) % 3] {
                let mut pos = IVec3::ZERO;
                pos[axis] = departing;
                pos[(axis + 1) % 3] = u;
                pos[(axis + 2) % 3] = v;
                if let Some(chunk) = index.unset(pos) {
                    self.slots[chunk.index()].index_refs -= 1;
                }
            }
        }

        let mut new_base = base;
        new_base[axis] += dir;
        index.set_base(new_base);

        // slab arriving on the pro side, imported from loaded chunks
        let arriving = new_base[axis] + dir * extent;
        for u in begin[(axis + 1) % 3]..end[(axis + 1) % 3] {
            for v in begin[(axis + 2) % 3]..end[(axis + 2) % 3] {
                let mut pos = IVec3::ZERO;
                pos[axis] = arriving;
                pos[(axis + 1) % 3] = u;
                pos[(axis + 2) % 3] = v;
                if let Some(&chunk) = self.by_pos.get(&pos) {
                    if index.set(pos, chunk).is_none() {
                        self.slots[chunk.index()].index_refs += 1;
                    }
                }
            }
        }

        self.indices[handle.0] = Some(index);
    }

    /// True if any registered index covers the position.
    #[must_use]
    pub fn is_indexed(&self, pos: IVec3) -> bool {
        self.indices
            .iter()
            .flatten()
            .any(|index| index.in_range(pos))
    }

    /// True if any index still has empty slots.
    #[must_use]
    pub fn has_missing(&self) -> bool {
        self.indices.iter().flatten().any(ChunkIndex::has_missing)
    }

    /// Upper bound on missing chunks; overlapping indices count twice.
    #[must_use]
    pub fn estimate_missing(&self) -> usize {
        self.indices.iter().flatten().map(ChunkIndex::missing_chunks).sum()
    }

    /// Position of some missing chunk, if any index wants one.
    #[must_use]
    pub fn next_missing(&mut self) -> Option<IVec3> {
        self.indices
            .iter_mut()
            .flatten()
            .find_map(ChunkIndex::next_missing)
    }

    // ------------------------------------------------------------------
    // allocation

    /// Chunk at `pos`, allocating an empty one if an index covers it.
    ///
    /// Returns `None` for unindexed positions; nothing would keep such a
    /// chunk alive.
    pub fn allocate(&mut self, pos: IVec3) -> Option<ChunkHandle> {
        if let Some(&handle) = self.by_pos.get(&pos) {
            return Some(handle);
        }
        if !self.is_indexed(pos) {
            return None;
        }

        let handle = if let Some(handle) = self.free.pop() {
            let slot = &mut self.slots[handle.index()];
            slot.chunk.reset(pos);
            slot.neighbors = [None; 6];
            slot.ref_count = 0;
            slot.index_refs = 0;
            slot.live = true;
            handle
        } else {
            let handle = ChunkHandle(self.slots.len() as u32);
            self.slots.push(Slot {
                chunk: Chunk::new(pos),
                neighbors: [None; 6],
                ref_count: 0,
                index_refs: 0,
                live: true,
            });
            handle
        };

        self.by_pos.insert(pos, handle);

        for index in self.indices.iter_mut().flatten() {
            if index.in_range(pos) && index.set(pos, handle).is_none() {
                self.slots[handle.index()].index_refs += 1;
            }
        }

        self.link_neighbors(handle);
        Some(handle)
    }

    /// Recycles chunks no index covers and nothing references.
    ///
    /// Chunks still waiting for a save keep their slot until written.
    pub fn clean(&mut self) {
        let candidates: Vec<ChunkHandle> = self
            .by_pos
            .values()
            .copied()
            .filter(|h| {
                let slot = &self.slots[h.index()];
                slot.index_refs == 0 && slot.ref_count == 0 && !slot.chunk.should_update_save()
            })
            .collect();
        for handle in candidates {
            self.remove(handle);
        }
    }

    fn remove(&mut self, handle: ChunkHandle) {
        for face in ALL_FACES {
            if let Some(other) = self.slots[handle.index()].neighbors[face as usize].take() {
                self.slots[other.index()].neighbors[face.opposite() as usize] = None;
            }
        }
        let pos = self.slots[handle.index()].chunk.position();
        self.by_pos.remove(&pos);
        self.slots[handle.index()].live = false;
        self.free.push(handle);
    }

    // ------------------------------------------------------------------
    // cross-chunk lookup

    /// Steps one cell in the given direction, crossing neighbor links.
    #[must_use]
    pub fn step(
        &self,
        handle: ChunkHandle,
        pos: IVec3,
        face: Face,
    ) -> Option<(ChunkHandle, IVec3)> {
        let next = pos + face.normal();
        if Chunk::in_bounds(next) {
            Some((handle, next))
        } else {
            let neighbor = self.slots[handle.index()].neighbors[face as usize]?;
            Some((neighbor, next - face.normal() * CHUNK_SIZE))
        }
    }

    /// Resolves an out-of-bounds grid position by walking neighbor links.
    #[must_use]
    pub fn lookup(
        &self,
        handle: ChunkHandle,
        pos: IVec3,
    ) -> Option<(ChunkHandle, IVec3)> {
        let mut handle = handle;
        let mut pos = pos;
        for (axis, pro, retro) in [
            (0, Face::Right, Face::Left),
            (1, Face::Up, Face::Down),
            (2, Face::Front, Face::Back),
        ] {
            while pos[axis] >= CHUNK_SIZE {
                handle = self.slots[handle.index()].neighbors[pro as usize]?;
                pos[axis] -= CHUNK_SIZE;
            }
            while pos[axis] < 0 {
                handle = self.slots[handle.index()].neighbors[retro as usize]?;
                pos[axis] += CHUNK_SIZE;
            }
        }
        Some((handle, pos))
    }

    /// Faces of the cell whose neighboring block fully covers the shared
    /// face; those faces of the cell are invisible.
    #[must_use]
    pub fn obstructed(&self, handle: ChunkHandle, pos: IVec3) -> FaceSet {
        let mut result = FaceSet::new();
        for face in ALL_FACES {
            if let Some((nh, npos)) = self.step(handle, pos, face) {
                let block = self.slots[nh.index()].chunk.block_at(Chunk::to_index(npos));
                let ty = self.types.get(block.type_id);
                if ty.face_filled(block, face.opposite()) {
                    result.set(face);
                }
            }
        }
        result
    }

    /// True for visible cells with at least one open or unloaded side.
    #[must_use]
    pub fn is_surface(&self, handle: ChunkHandle, pos: IVec3) -> bool {
        let block = self.slots[handle.index()].chunk.block_at(Chunk::to_index(pos));
        if !self.types.get(block.type_id).visible {
            return false;
        }
        for face in ALL_FACES {
            match self.step(handle, pos, face) {
                None => return true,
                Some((nh, npos)) => {
                    let next = self.slots[nh.index()].chunk.block_at(Chunk::to_index(npos));
                    if !self.types.get(next.type_id).visible {
                        return true;
                    }
                }
            }
        }
        false
    }

    // ------------------------------------------------------------------
    // block edits and light propagation

    /// Light level of a cell.
    #[must_use]
    pub fn light_at(&self, handle: ChunkHandle, pos: IVec3) -> u8 {
        self.slots[handle.index()].chunk.light_at(Chunk::to_index(pos))
    }

    /// Writes a block and restores the light invariant around it.
    pub fn set_block(&mut self, handle: ChunkHandle, index: usize, block: Block) {
        let types = Arc::clone(&self.types);
        let old = self.slots[handle.index()].chunk.block_at(index);
        let old_ty = types.get(old.type_id);
        let new_ty = types.get(block.type_id);

        self.slots[handle.index()].chunk.write_block(index, block);

        if old.type_id == block.type_id {
            return;
        }

        let (old_lum, old_blocks) = (old_ty.luminosity, old_ty.block_light);
        let (new_lum, new_blocks) = (new_ty.luminosity, new_ty.block_light);

        if new_lum > old_lum {
            // light added
            self.slots[handle.index()].chunk.set_light(index, new_lum);
            self.light_queue.push_back((handle, index));
            self.work_light();
        } else if new_lum < old_lum {
            // light removed
            let level = self.slots[handle.index()].chunk.light_at(index);
            self.dark_queue.push_back((handle, index, level));
            self.slots[handle.index()].chunk.set_light(index, 0);
            self.work_dark();
            self.slots[handle.index()].chunk.set_light(index, new_lum);
            self.light_queue.push_back((handle, index));
            self.work_light();
        } else if new_blocks && !old_blocks {
            // obstacle added
            let level = self.slots[handle.index()].chunk.light_at(index);
            if level > 0 {
                self.dark_queue.push_back((handle, index, level));
                self.slots[handle.index()].chunk.set_light(index, 0);
                self.work_dark();
                self.work_light();
            }
        } else if !new_blocks && old_blocks {
            // obstacle removed, pull light in from the brightest neighbor
            // that actually transmits (opaque cells may carry incident
            // light but do not pass it on)
            let pos = Chunk::to_pos(index);
            let mut level = 0u8;
            for face in ALL_FACES {
                if let Some((nh, npos)) = self.step(handle, pos, face) {
                    let nidx = Chunk::to_index(npos);
                    let nty = types.get(self.slots[nh.index()].chunk.block_at(nidx).type_id);
                    if !nty.block_light || nty.luminosity > 0 {
                        level = level.max(self.slots[nh.index()].chunk.light_at(nidx));
                    }
                }
            }
            if level > 1 {
                self.slots[handle.index()].chunk.set_light(index, level - 1);
                self.light_queue.push_back((handle, index));
                self.work_light();
            }
        }
    }

    fn work_light(&mut self) {
        let types = Arc::clone(&self.types);
        while let Some((handle, index)) = self.light_queue.pop_front() {
            let chunk = &self.slots[handle.index()].chunk;
            let level = i32::from(chunk.light_at(index)) - 1;
            let ty = types.get(chunk.block_at(index).type_id);
            if ty.block_light && ty.luminosity == 0 {
                // opaque cells swallow light instead of passing it on
                continue;
            }
            let pos = Chunk::to_pos(index);
            for face in ALL_FACES {
                if let Some((nh, npos)) = self.step(handle, pos, face) {
                    let nidx = Chunk::to_index(npos);
                    if i32::from(self.slots[nh.index()].chunk.light_at(nidx)) < level {
                        self.slots[nh.index()].chunk.set_light(nidx, level as u8);
                        self.light_queue.push_back((nh, nidx));
                    }
                }
            }
        }
    }

    fn work_dark(&mut self) {
        while let Some((handle, index, level)) = self.dark_queue.pop_front() {
            let pos = Chunk::to_pos(index);
            for face in ALL_FACES {
                if let Some((nh, npos)) = self.step(handle, pos, face) {
                    let nidx = Chunk::to_index(npos);
                    let nlight = self.slots[nh.index()].chunk.light_at(nidx);
                    if nlight != 0 && nlight < level {
                        // shadowed by the removed source
                        self.slots[nh.index()].chunk.set_light(nidx, 0);
                        self.dark_queue.push_back((nh, nidx, nlight));
                    } else {
                        // at or above the source's level: another source
                        // reaches here, let it refill the shadow
                        self.light_queue.push_back((nh, nidx));
                    }
                }
            }
        }
    }

    /// Rebuilds a chunk's light field after its blocks were replaced
    /// wholesale (disk load, network receive).
    ///
    /// Zeroes the field, seeds every luminous cell and re-imports light
    /// shining in over linked borders, then floods.
    pub fn scan_lights(&mut self, handle: ChunkHandle) {
        let types = Arc::clone(&self.types);
        for index in 0..hollow_shared::constants::BLOCKS_PER_CHUNK {
            self.slots[handle.index()].chunk.set_light(index, 0);
        }
        for index in 0..hollow_shared::constants::BLOCKS_PER_CHUNK {
            let lum = types
                .get(self.slots[handle.index()].chunk.block_at(index).type_id)
                .luminosity;
            if lum > 0 {
                self.slots[handle.index()].chunk.set_light(index, lum);
                self.light_queue.push_back((handle, index));
            }
        }
        for face in ALL_FACES {
            if let Some(other) = self.slots[handle.index()].neighbors[face as usize] {
                let axis = face.axis();
                let other_plane = if face.direction() > 0 { 0 } else { CHUNK_SIZE - 1 };
                for u in 0..CHUNK_SIZE {
                    for v in 0..CHUNK_SIZE {
                        let mut pos = IVec3::ZERO;
                        pos[axis] = other_plane;
                        pos[(axis + 1) % 3] = u;
                        pos[(axis + 2) % 3] = v;
                        let idx = Chunk::to_index(pos);
                        if self.slots[other.index()].chunk.light_at(idx) > 1 {
                            self.light_queue.push_back((other, idx));
                        }
                    }
                }
            }
        }
        self.work_light();
    }

    /// Links the chunk with any loaded neighbors, seeding light across the
    /// fresh borders.
    fn link_neighbors(&mut self, handle: ChunkHandle) {
        let pos = self.slots[handle.index()].chunk.position();
        for face in ALL_FACES {
            if let Some(&other) = self.by_pos.get(&(pos + face.normal())) {
                self.set_neighbor(handle, face, other);
            }
        }
    }

    fn set_neighbor(&mut self, handle: ChunkHandle, face: Face, other: ChunkHandle) {
        if self.slots[handle.index()].neighbors[face as usize] == Some(other) {
            return;
        }
        self.slots[handle.index()].neighbors[face as usize] = Some(other);
        self.slots[other.index()].neighbors[face.opposite() as usize] = Some(handle);

        // seed light across the new border from both sides
        let axis = face.axis();
        let my_plane = if face.direction() > 0 { CHUNK_SIZE - 1 } else { 0 };
        let other_plane = if face.direction() > 0 { 0 } else { CHUNK_SIZE - 1 };
        for u in 0..CHUNK_SIZE {
            for v in 0..CHUNK_SIZE {
                let mut my_pos = IVec3::ZERO;
                my_pos[axis] = my_plane;
                my_pos[(axis + 1) % 3] = u;
                my_pos[(axis + 2) % 3] = v;
                let mut other_pos = IVec3::ZERO;
                other_pos[axis] = other_plane;
                other_pos[(axis + 1) % 3] = u;
                other_pos[(axis + 2) % 3] = v;
                self.edge_light(handle, my_pos, other, other_pos);
                self.edge_light(other, other_pos, handle, my_pos);
            }
        }
        self.work_light();
    }

    /// Queues border cells bright enough to shine into the new neighbor.
    fn edge_light(&mut self, a: ChunkHandle, a_pos: IVec3, b: ChunkHandle, b_pos: IVec3) {
        let a_idx = Chunk::to_index(a_pos);
        if self.slots[a.index()].chunk.light_at(a_idx) > 1 {
            let b_block = self.slots[b.index()].chunk.block_at(Chunk::to_index(b_pos));
            let b_ty = self.types.get(b_block.type_id);
            if !b_ty.block_light {
                self.light_queue.push_back((a, a_idx));
            }
            if b_ty.visible {
                self.slots[b.index()].chunk.invalidate();
            }
        }
    }
}
