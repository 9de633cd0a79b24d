//! Cube of 16x16x16 blocks with a parallel light field.
//!
//! A chunk only knows its own cells. Everything that crosses a chunk
//! boundary (light propagation, neighbor-aware queries) lives in
//! [`crate::store`], which owns the chunks and their neighbor links.
//!
//! ## Cell addressing
//!
//! Cells are stored flat, indexed `x + 16*y + 256*z`. Serialized block
//! data is exactly `4096 * 4 = 16384` bytes of little-endian records.

use hollow_shared::constants::{BLOCKS_PER_CHUNK, CHUNK_SIZE};
use hollow_shared::geometry::{obb_obb, Aabb, Ray, Transform};
use hollow_shared::math::{IVec3, Vec3};

use crate::block::Block;
use crate::block_type::BlockTypeRegistry;

/// Serialized size of a chunk's block array in bytes.
pub const BLOCK_DATA_SIZE: usize = BLOCKS_PER_CHUNK * std::mem::size_of::<Block>();

/// A contact between a box and one block of a chunk.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorldCollision {
    /// Position of the chunk holding the block.
    pub chunk_pos: IVec3,
    /// Cell index of the block within its chunk.
    pub block_index: usize,
    /// Penetration depth along `normal`.
    pub depth: f32,
    /// Contact normal, in the reference frame of the tested box.
    pub normal: Vec3,
    /// Block center, in the reference frame of the tested box.
    pub block_center: Vec3,
    /// Whether the hit block is impenetrable (`collide_block`).
    pub blocks: bool,
}

impl WorldCollision {
    /// True if the hit block actually blocks movement.
    ///
    /// Resolution uses this to filter contacts gathered from `collision`
    /// types that are not `collide_block`.
    #[must_use]
    pub const fn is_blocking(&self) -> bool {
        self.blocks
    }
}

/// 16^3 block volume with per-cell light levels.
pub struct Chunk {
    blocks: Box<[Block; BLOCKS_PER_CHUNK]>,
    light: Box<[u8; BLOCKS_PER_CHUNK]>,
    position: IVec3,
    dirty: bool,
    save_dirty: bool,
}

impl Chunk {
    /// An all-air chunk at the given position.
    #[must_use]
    pub fn new(position: IVec3) -> Self {
        Self {
            blocks: Box::new([Block::AIR; BLOCKS_PER_CHUNK]),
            light: Box::new([0; BLOCKS_PER_CHUNK]),
            position,
            dirty: false,
            save_dirty: false,
        }
    }

    /// Resets the chunk for reuse at a new position.
    pub fn reset(&mut self, position: IVec3) {
        self.blocks.fill(Block::AIR);
        self.light.fill(0);
        self.position = position;
        self.dirty = false;
        self.save_dirty = false;
    }

    /// Chunk position on the chunk grid.
    #[must_use]
    pub const fn position(&self) -> IVec3 {
        self.position
    }

    /// Moves the chunk on the grid; block content is left alone.
    pub fn set_position(&mut self, position: IVec3) {
        self.position = position;
    }

    /// Local chunk bounds.
    #[must_use]
    pub fn bounds() -> Aabb {
        Aabb::new(Vec3::ZERO, Vec3::splat(CHUNK_SIZE as f32))
    }

    /// True if the grid position lies inside a chunk.
    #[must_use]
    pub const fn in_bounds(pos: IVec3) -> bool {
        pos.x >= 0
            && pos.x < CHUNK_SIZE
            && pos.y >= 0
            && pos.y < CHUNK_SIZE
            && pos.z >= 0
            && pos.z < CHUNK_SIZE
    }

    /// Cell index of an in-bounds grid position.
    #[must_use]
    pub const fn to_index(pos: IVec3) -> usize {
        (pos.x + pos.y * CHUNK_SIZE + pos.z * CHUNK_SIZE * CHUNK_SIZE) as usize
    }

    /// Grid position of a cell index.
    #[must_use]
    pub const fn to_pos(index: usize) -> IVec3 {
        let i = index as i32;
        IVec3::new(i % CHUNK_SIZE, (i / CHUNK_SIZE) % CHUNK_SIZE, i / (CHUNK_SIZE * CHUNK_SIZE))
    }

    /// Center of a cell in chunk-local space.
    #[must_use]
    pub fn to_coords(pos: IVec3) -> Vec3 {
        pos.as_vec3() + Vec3::splat(0.5)
    }

    /// True for cells on any chunk face.
    #[must_use]
    pub const fn is_border(pos: IVec3) -> bool {
        pos.x == 0
            || pos.x == CHUNK_SIZE - 1
            || pos.y == 0
            || pos.y == CHUNK_SIZE - 1
            || pos.z == 0
            || pos.z == CHUNK_SIZE - 1
    }

    /// Block record at a cell.
    #[must_use]
    pub fn block_at(&self, index: usize) -> Block {
        self.blocks[index]
    }

    /// Writes a block record without touching light.
    ///
    /// This is the raw store; [`crate::store::ChunkStore::set_block`] is
    /// the operation that maintains the light invariant.
    pub fn write_block(&mut self, index: usize, block: Block) {
        self.blocks[index] = block;
        self.invalidate();
        self.save_dirty = true;
    }

    /// Light level at a cell.
    #[must_use]
    pub fn light_at(&self, index: usize) -> u8 {
        self.light[index]
    }

    /// Sets a cell's light level, invalidating on change.
    pub fn set_light(&mut self, index: usize, level: u8) {
        if self.light[index] != level {
            self.light[index] = level;
            self.invalidate();
        }
    }

    /// Marks derived data (meshes) stale.
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    /// True while derived data is stale.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clears the stale flag after derived data is rebuilt.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// True while the chunk differs from its saved form.
    #[must_use]
    pub const fn should_update_save(&self) -> bool {
        self.save_dirty
    }

    /// Marks the chunk as needing a save.
    pub fn mark_save(&mut self) {
        self.save_dirty = true;
    }

    /// Clears the save flag after a successful write or load.
    pub fn clear_save(&mut self) {
        self.save_dirty = false;
    }

    /// Serialized view of the block array.
    #[must_use]
    pub fn block_data(&self) -> &[u8] {
        bytemuck::cast_slice(self.blocks.as_slice())
    }

    /// Mutable serialized view, for loading and receiving.
    pub fn block_data_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(self.blocks.as_mut_slice())
    }

    /// World transform of the chunk origin relative to a reference chunk.
    #[must_use]
    pub fn transform(&self, reference: IVec3) -> Transform {
        Transform::from_translation(((self.position - reference) * CHUNK_SIZE).as_vec3())
    }

    /// Cheap bounding-box pretest for rays.
    #[must_use]
    pub fn intersects_ray_bounds(&self, ray: &Ray, m: &Transform) -> Option<f32> {
        hollow_shared::geometry::ray_obb(ray, &Self::bounds(), m).map(|(dist, _)| dist)
    }

    /// Nearest visible block hit by the ray.
    ///
    /// `m` places this chunk in the ray's frame. Returns the cell index,
    /// the distance and the world-oriented face normal.
    #[must_use]
    pub fn intersection(
        &self,
        ray: &Ray,
        m: &Transform,
        types: &BlockTypeRegistry,
    ) -> Option<(usize, f32, Vec3)> {
        let mut best_id = None;
        let mut best_dist = f32::INFINITY;
        let mut best_normal = Vec3::ZERO;

        for (idx, block) in self.blocks.iter().enumerate() {
            let ty = types.get(block.type_id);
            if !ty.visible {
                continue;
            }
            let cell = Transform::new(
                *block.transform(),
                m.apply(Self::to_coords(Self::to_pos(idx))),
            );
            if let Some((dist, normal)) = ty.shape.intersect_ray(ray, &cell) {
                if dist < best_dist {
                    best_id = Some(idx);
                    best_dist = dist;
                    best_normal = normal;
                }
            }
        }

        best_id.map(|idx| {
            let oriented = self.blocks[idx].transform().mul_vec3(best_normal);
            (idx, best_dist, oriented)
        })
    }

    /// Collects all contacts between a box and this chunk's cells.
    ///
    /// `box_m` and `m` share one reference frame. A chunk-bounds SAT test
    /// culls before any cell is examined. Returns true if contacts were
    /// appended.
    pub fn intersection_box(
        &self,
        box_: &Aabb,
        box_m: &Transform,
        m: &Transform,
        types: &BlockTypeRegistry,
        out: &mut Vec<WorldCollision>,
    ) -> bool {
        if obb_obb(&Self::bounds(), m, box_, box_m).is_none() {
            return false;
        }

        let mut any = false;
        for (idx, block) in self.blocks.iter().enumerate() {
            let ty = types.get(block.type_id);
            if !ty.collision {
                continue;
            }
            let cell_center = m.apply(Self::to_coords(Self::to_pos(idx)));
            let cell = Transform::new(*block.transform(), cell_center);
            if let Some((depth, normal)) = ty.shape.intersect_box(&cell, box_, box_m) {
                out.push(WorldCollision {
                    chunk_pos: self.position,
                    block_index: idx,
                    depth,
                    normal,
                    block_center: cell_center,
                    blocks: ty.collide_block,
                });
                any = true;
            }
        }
        any
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_type::default_registry;

    #[test]
    fn test_index_round_trip() {
        for z in 0..CHUNK_SIZE {
            for y in 0..CHUNK_SIZE {
                for x in 0..CHUNK_SIZE {
                    let pos = IVec3::new(x, y, z);
                    assert_eq!(Chunk::to_pos(Chunk::to_index(pos)), pos);
                }
            }
        }
    }

    #[test]
    fn test_index_layout_is_x_then_y_then_z() {
        assert_eq!(Chunk::to_index(IVec3::new(1, 0, 0)), 1);
        assert_eq!(Chunk::to_index(IVec3::new(0, 1, 0)), 16);
        assert_eq!(Chunk::to_index(IVec3::new(0, 0, 1)), 256);
    }

    #[test]
    fn test_border_detection() {
        assert!(Chunk::is_border(IVec3::new(0, 8, 8)));
        assert!(Chunk::is_border(IVec3::new(8, 15, 8)));
        assert!(!Chunk::is_border(IVec3::new(8, 8, 8)));
    }

    #[test]
    fn test_block_data_size() {
        let chunk = Chunk::new(IVec3::ZERO);
        assert_eq!(chunk.block_data().len(), 16384);
        assert_eq!(BLOCK_DATA_SIZE, 16384);
    }

    #[test]
    fn test_block_data_round_trip() {
        let mut a = Chunk::new(IVec3::ZERO);
        a.write_block(0, Block::new(3));
        a.write_block(4095, Block::new(7));
        let bytes: Vec<u8> = a.block_data().to_vec();

        let mut b = Chunk::new(IVec3::ZERO);
        b.block_data_mut().copy_from_slice(&bytes);
        assert_eq!(b.block_at(0), Block::new(3));
        assert_eq!(b.block_at(4095), Block::new(7));
        assert_eq!(b.block_at(1), Block::AIR);
    }

    #[test]
    fn test_ray_hits_single_block() {
        let types = default_registry();
        let mut chunk = Chunk::new(IVec3::ZERO);
        let target = IVec3::new(8, 8, 8);
        chunk.write_block(Chunk::to_index(target), Block::new(1));

        // from below the chunk straight up through the block column
        let ray = Ray::new(Vec3::new(8.5, -2.0, 8.5), Vec3::Y);
        let (idx, dist, normal) = chunk
            .intersection(&ray, &Transform::IDENTITY, &types)
            .expect("ray should hit the block");
        assert_eq!(idx, Chunk::to_index(target));
        assert!((dist - 10.0).abs() < 1e-3, "block bottom at y=8, got {dist}");
        assert!((normal - Vec3::new(0.0, -1.0, 0.0)).length() < 1e-4);
    }

    #[test]
    fn test_ray_hits_nearest_of_two() {
        let types = default_registry();
        let mut chunk = Chunk::new(IVec3::ZERO);
        chunk.write_block(Chunk::to_index(IVec3::new(4, 8, 8)), Block::new(1));
        chunk.write_block(Chunk::to_index(IVec3::new(12, 8, 8)), Block::new(1));

        let ray = Ray::new(Vec3::new(-1.0, 8.5, 8.5), Vec3::X);
        let (idx, _, _) = chunk
            .intersection(&ray, &Transform::IDENTITY, &types)
            .expect("hit");
        assert_eq!(idx, Chunk::to_index(IVec3::new(4, 8, 8)));
    }

    #[test]
    fn test_box_intersection_culled_by_bounds() {
        let types = default_registry();
        let mut chunk = Chunk::new(IVec3::ZERO);
        chunk.write_block(0, Block::new(1));

        let mut out = Vec::new();
        let far = Transform::from_translation(Vec3::new(100.0, 0.0, 0.0));
        let any = chunk.intersection_box(
            &Aabb::UNIT_CENTERED,
            &far,
            &Transform::IDENTITY,
            &types,
            &mut out,
        );
        assert!(!any);
        assert!(out.is_empty());
    }

    #[test]
    fn test_box_intersection_reports_contact() {
        let types = default_registry();
        let mut chunk = Chunk::new(IVec3::ZERO);
        let target = IVec3::new(2, 2, 2);
        chunk.write_block(Chunk::to_index(target), Block::new(1));

        let mut out = Vec::new();
        // box centered just above the block's top face
        let box_m = Transform::from_translation(Vec3::new(2.5, 3.4, 2.5));
        let any = chunk.intersection_box(
            &Aabb::UNIT_CENTERED,
            &box_m,
            &Transform::IDENTITY,
            &types,
            &mut out,
        );
        assert!(any);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].block_index, Chunk::to_index(target));
        assert!(out[0].is_blocking());
        assert!(out[0].depth > 0.0 && out[0].depth < 0.2, "depth = {}", out[0].depth);
    }

    #[test]
    fn test_reset_clears_content() {
        let mut chunk = Chunk::new(IVec3::ZERO);
        chunk.write_block(10, Block::new(2));
        chunk.set_light(10, 5);
        chunk.reset(IVec3::new(1, 2, 3));
        assert_eq!(chunk.position(), IVec3::new(1, 2, 3));
        assert_eq!(chunk.block_at(10), Block::AIR);
        assert_eq!(chunk.light_at(10), 0);
        assert!(!chunk.should_update_save());
    }
}
