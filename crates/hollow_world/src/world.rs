//! The world: chunks, entities and the fixed-tick simulation step.
//!
//! ## Simulation order
//!
//! Each tick: reap entities killed last tick, integrate every live
//! entity (control force plus block gravity, four Runge-Kutta substeps),
//! resolve block collisions, separate overlapping entities, rebase every
//! player's chunk index, then let the store recycle chunks nothing
//! observes anymore.
//!
//! The same [`World::step_entity`] the server simulates with is exposed
//! so a predicting client can replay its input history through identical
//! physics.

use std::sync::Arc;

use hollow_shared::geometry::{obb_obb, ray_obb, Ray};
use hollow_shared::math::{IVec3, Quat, Vec3};

use crate::block::Block;
use crate::block_type::BlockTypeRegistry;
use crate::chunk::WorldCollision;
use crate::entity::{Dynamics, Entity, EntityState, Player, PLAYER_INDEX_EXTENT};
use crate::generator::{Generator, GeneratorConfig};
use crate::store::{ChunkHandle, ChunkStore};

/// World-level configuration.
#[derive(Clone, Debug)]
pub struct WorldConfig {
    /// World name; saves and the join handshake carry it.
    pub name: String,
    /// Chunk where new players appear.
    pub spawn: IVec3,
    /// Generator seed.
    pub seed: u64,
    /// Direction facing towards the light.
    pub light_direction: Vec3,
    /// Exponential fog density.
    pub fog_density: f32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            name: String::from("default"),
            spawn: IVec3::ZERO,
            seed: 0,
            light_direction: Vec3::new(-1.0, -3.0, -2.0),
            fog_density: 0.011,
        }
    }
}

/// A ray hit against the block world.
#[derive(Clone, Copy, Debug)]
pub struct RayHit {
    /// Chunk containing the hit block.
    pub chunk: ChunkHandle,
    /// Cell index of the hit block.
    pub block_index: usize,
    /// Distance along the ray.
    pub distance: f32,
    /// World-oriented face normal at the hit.
    pub normal: Vec3,
}

#[derive(Clone, Copy, Default)]
struct Derivative {
    position: Vec3,
    velocity: Vec3,
}

/// The simulated world.
pub struct World {
    config: WorldConfig,
    types: Arc<BlockTypeRegistry>,
    store: ChunkStore,
    generator: Generator,
    entities: Vec<Entity>,
    players: Vec<Player>,
    has_gravity_types: bool,
}

impl World {
    /// Creates a world over a frozen registry.
    #[must_use]
    pub fn new(types: Arc<BlockTypeRegistry>, config: WorldConfig) -> Self {
        let generator = Generator::new(
            GeneratorConfig {
                seed: config.seed,
                ..GeneratorConfig::default()
            },
            &types,
        );
        let has_gravity_types = types.iter().any(|t| t.gravity.is_some());
        Self {
            config,
            store: ChunkStore::new(Arc::clone(&types)),
            types,
            generator,
            entities: Vec::new(),
            players: Vec::new(),
            has_gravity_types,
        }
    }

    /// World name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// World configuration.
    #[must_use]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// The chunk store.
    #[must_use]
    pub fn chunks(&self) -> &ChunkStore {
        &self.store
    }

    /// Mutable chunk store.
    pub fn chunks_mut(&mut self) -> &mut ChunkStore {
        &mut self.store
    }

    /// The terrain generator.
    #[must_use]
    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    /// The block type registry.
    #[must_use]
    pub fn types(&self) -> &BlockTypeRegistry {
        &self.types
    }

    /// Writes a block through the light-maintaining path.
    pub fn set_block(&mut self, chunk: ChunkHandle, index: usize, block: Block) {
        self.store.set_block(chunk, index, block);
    }

    /// Feeds up to `budget` missing chunks from the loader.
    pub fn load_chunks(
        &mut self,
        loader: &crate::loader::ChunkLoader,
        budget: usize,
    ) -> crate::save::SaveResult<usize> {
        loader.load_n(&mut self.store, &self.generator, budget)
    }

    /// Writes up to `budget` edited chunks back through the loader.
    pub fn store_chunks(&mut self, loader: &crate::loader::ChunkLoader, budget: usize) -> usize {
        loader.store_n(&mut self.store, budget)
    }

    /// True while any loaded chunk differs from its saved form.
    #[must_use]
    pub fn has_unsaved_chunks(&self) -> bool {
        self.store
            .loaded()
            .any(|h| self.store.chunk(h).should_update_save())
    }

    // ------------------------------------------------------------------
    // entities

    /// All entities, ascending by id.
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Mutable entity list; ordering by id must be preserved.
    pub fn entities_mut(&mut self) -> &mut [Entity] {
        &mut self.entities
    }

    /// Entity by id.
    #[must_use]
    pub fn entity(&self, id: u32) -> Option<&Entity> {
        self.entities
            .binary_search_by_key(&id, Entity::id)
            .ok()
            .map(|i| &self.entities[i])
    }

    /// Mutable entity by id.
    pub fn entity_mut(&mut self, id: u32) -> Option<&mut Entity> {
        match self.entities.binary_search_by_key(&id, Entity::id) {
            Ok(i) => Some(&mut self.entities[i]),
            Err(_) => None,
        }
    }

    /// Adds an entity under a fresh id.
    pub fn add_entity(&mut self) -> u32 {
        let id = match self.entities.last() {
            None => 1,
            Some(last) if last.id() < u32::MAX => last.id() + 1,
            Some(_) => {
                // id space exhausted at the top, find the first gap
                let mut id = 1u32;
                for e in &self.entities {
                    if e.id() != id {
                        break;
                    }
                    id += 1;
                }
                id
            }
        };
        let idx = self
            .entities
            .binary_search_by_key(&id, Entity::id)
            .unwrap_err();
        self.entities.insert(idx, Entity::new(id));
        id
    }

    /// Adds an entity under a caller-chosen id; `None` if taken.
    pub fn add_entity_with_id(&mut self, id: u32) -> Option<u32> {
        match self.entities.binary_search_by_key(&id, Entity::id) {
            Ok(_) => None,
            Err(idx) => {
                self.entities.insert(idx, Entity::new(id));
                Some(id)
            }
        }
    }

    /// Entity under the given id, creating it if absent. Used by clients
    /// mirroring server spawns.
    pub fn force_add_entity(&mut self, id: u32) -> &mut Entity {
        let idx = match self.entities.binary_search_by_key(&id, Entity::id) {
            Ok(idx) => idx,
            Err(idx) => {
                self.entities.insert(idx, Entity::new(id));
                idx
            }
        };
        &mut self.entities[idx]
    }

    // ------------------------------------------------------------------
    // players

    /// All players.
    #[must_use]
    pub fn players(&self) -> &[Player] {
        &self.players
    }

    /// Player by entity name; names are unique among players.
    #[must_use]
    pub fn player_by_name(&self, name: &str) -> Option<&Player> {
        self.players.iter().find(|p| {
            self.entity(p.entity)
                .is_some_and(|e| e.name() == name)
        })
    }

    /// Mutable player by entity id.
    pub fn player_by_entity_mut(&mut self, entity: u32) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.entity == entity)
    }

    /// Adds a player with a unique name; `None` if the name is taken.
    ///
    /// The player entity spawns at the configured spawn chunk, collides
    /// with the world, and drags a chunk index along.
    pub fn add_player(&mut self, name: &str) -> Option<Player> {
        self.add_player_inner(name, None)
    }

    /// Adds a player bound to a caller-chosen entity id (client mirror).
    pub fn add_player_with_id(&mut self, name: &str, id: u32) -> Option<Player> {
        self.add_player_inner(name, Some(id))
    }

    fn add_player_inner(&mut self, name: &str, id: Option<u32>) -> Option<Player> {
        if self.player_by_name(name).is_some() {
            return None;
        }
        let entity_id = match id {
            None => self.add_entity(),
            Some(id) => self.add_entity_with_id(id)?,
        };
        let spawn = self.config.spawn;
        {
            let entity = self.entity_mut(entity_id).expect("entity just added");
            entity.set_name(name);
            entity.set_world_collidable(true);
            entity.set_position(spawn, Vec3::splat(8.0));
            entity.add_ref();
        }
        let chunks = self.store.make_index(spawn, PLAYER_INDEX_EXTENT);
        let player = Player {
            entity: entity_id,
            chunks,
            inventory_slot: 0,
        };
        self.players.push(player);
        Some(player)
    }

    /// Removes a player, killing its entity and dropping its index.
    pub fn remove_player(&mut self, entity: u32) {
        if let Some(idx) = self.players.iter().position(|p| p.entity == entity) {
            let player = self.players.remove(idx);
            self.store.unregister_index(player.chunks);
            if let Some(e) = self.entity_mut(entity) {
                e.remove_ref();
                e.kill();
            }
        }
    }

    // ------------------------------------------------------------------
    // simulation

    /// One fixed tick of `dt_ms` milliseconds.
    pub fn update(&mut self, dt_ms: i32) {
        self.reap();
        let dt = dt_ms as f32 / 1000.0;

        for i in 0..self.entities.len() {
            if self.entities[i].dead() {
                continue;
            }
            let dynamics = self.entities[i].dynamics();
            let mut state = self.entities[i].state;
            self.step_entity(&dynamics, &mut state, dt);
            self.entities[i].state = state;
        }

        self.separate_entities();

        for i in 0..self.players.len() {
            let player = self.players[i];
            if let Some(entity) = self.entity(player.entity) {
                let base = entity.chunk_coords();
                self.store.rebase_index(player.chunks, base);
            }
        }

        self.store.clean();
    }

    /// Removes entities that died before this tick.
    fn reap(&mut self) {
        let doomed: Vec<u32> = self
            .entities
            .iter()
            .filter(|e| e.can_remove())
            .map(Entity::id)
            .collect();
        for id in doomed {
            if let Some(idx) = self.players.iter().position(|p| p.entity == id) {
                let player = self.players.remove(idx);
                self.store.unregister_index(player.chunks);
            }
            if let Ok(idx) = self.entities.binary_search_by_key(&id, Entity::id) {
                self.entities.remove(idx);
            }
        }
    }

    /// Integrates one entity state through `dt` seconds and resolves its
    /// block collisions. Identical on server and predicting client.
    pub fn step_entity(&self, dynamics: &Dynamics, state: &mut EntityState, dt: f32) {
        let a = self.calculate_step(dynamics, state, 0.0, &Derivative::default());
        let b = self.calculate_step(dynamics, state, dt * 0.5, &a);
        let c = self.calculate_step(dynamics, state, dt * 0.5, &b);
        let d = self.calculate_step(dynamics, state, dt, &c);

        let dpos = (a.position + (b.position + c.position) * 2.0 + d.position) * (1.0 / 6.0);
        let dvel = (a.velocity + (b.velocity + c.velocity) * 2.0 + d.velocity) * (1.0 / 6.0);

        state.pos.block += dpos * dt;
        state.velocity += dvel * dt;
        state.orient = Quat::delta_rotation(state.ang_vel, dt)
            .mul(state.orient)
            .normalized();
        state.adjust();

        if dynamics.world_collidable {
            self.resolve_block_collisions(dynamics, state);
        }
    }

    fn calculate_step(
        &self,
        dynamics: &Dynamics,
        cur: &EntityState,
        dt: f32,
        prev: &Derivative,
    ) -> Derivative {
        let mut next = *cur;
        next.pos.block += prev.position * dt;
        next.velocity += prev.velocity * dt;
        next.adjust();
        Derivative {
            position: next.velocity,
            velocity: self.calculate_force(dynamics, &next),
        }
    }

    fn calculate_force(&self, dynamics: &Dynamics, state: &EntityState) -> Vec3 {
        self.control_force(dynamics, state) + self.gravity(state)
    }

    /// Acceleration that closes the velocity gap over the response time,
    /// capped at the entity's force limit.
    fn control_force(&self, dynamics: &Dynamics, state: &EntityState) -> Vec3 {
        let correction =
            (dynamics.target_velocity - state.velocity) * (1.0 / dynamics.response_time);
        correction.limited(dynamics.max_force)
    }

    /// Summed pull of gravity-emitting blocks in the 3x3x3 neighborhood.
    fn gravity(&self, state: &EntityState) -> Vec3 {
        if !self.has_gravity_types {
            return Vec3::ZERO;
        }
        let reference = state.pos.chunk;
        let mut total = Vec3::ZERO;
        for handle in self.store.loaded() {
            let chunk = self.store.chunk(handle);
            if (chunk.position() - reference).manhattan_radius() > 1 {
                continue;
            }
            let offset = chunk.transform(reference).pos;
            for index in 0..hollow_shared::constants::BLOCKS_PER_CHUNK {
                let block = chunk.block_at(index);
                if let Some(gravity) = self.types.get(block.type_id).gravity {
                    let center = offset + crate::chunk::Chunk::to_coords(crate::chunk::Chunk::to_pos(index));
                    total += gravity.force(state.pos.block - center);
                }
            }
        }
        total
    }

    /// Broad phase over the 27 surrounding chunks, then per-cell narrow
    /// phase, then one combined displacement.
    fn resolve_block_collisions(&self, dynamics: &Dynamics, state: &mut EntityState) {
        let reference = state.pos.chunk;
        let m = state.transform(reference);
        let mut contacts: Vec<WorldCollision> = Vec::new();

        for handle in self.store.loaded() {
            let chunk = self.store.chunk(handle);
            if (chunk.position() - reference).manhattan_radius() > 1 {
                // no entity spans more than 16 blocks, the rest can't touch
                continue;
            }
            chunk.intersection_box(
                &dynamics.bounds,
                &m,
                &chunk.transform(reference),
                &self.types,
                &mut contacts,
            );
        }

        if contacts.is_empty() {
            return;
        }
        let displacement = Self::combined_interpenetration(state, &contacts);
        if !displacement.is_zero() {
            state.pos.block += displacement;
            state.adjust();
        }
    }

    /// Merges contacts into one displacement: per axis the average of the
    /// min and max signed penetrations, after flipping normals that point
    /// away from the entity.
    fn combined_interpenetration(state: &EntityState, contacts: &[WorldCollision]) -> Vec3 {
        let mut min_disp = Vec3::ZERO;
        let mut max_disp = Vec3::ZERO;
        for contact in contacts {
            if !contact.is_blocking() {
                continue;
            }
            let mut local = contact.normal * contact.depth;
            if contact.normal.dot(state.pos.block - contact.block_center) < 0.0 {
                local = -local;
            }
            min_disp = min_disp.min(local);
            max_disp = max_disp.max(local);
        }
        let mut out = Vec3::ZERO;
        for axis in 0..3 {
            let (lo, hi) = (min_disp[axis], max_disp[axis]);
            out[axis] = if lo.abs() > f32::EPSILON {
                if hi.abs() > f32::EPSILON {
                    (lo + hi) * 0.5
                } else {
                    lo
                }
            } else {
                hi
            };
        }
        out
    }

    /// Pushes overlapping collidable entities apart, half the depth each.
    fn separate_entities(&mut self) {
        let mut pushes: Vec<(usize, Vec3)> = Vec::new();
        for i in 0..self.entities.len() {
            for j in (i + 1)..self.entities.len() {
                let (a, b) = (&self.entities[i], &self.entities[j]);
                if a.dead() || b.dead() || !a.world_collidable() || !b.world_collidable() {
                    continue;
                }
                let reference = a.chunk_coords();
                if (b.chunk_coords() - reference).manhattan_radius() > 1 {
                    continue;
                }
                if let Some((depth, normal)) = obb_obb(
                    &a.bounds,
                    &a.state.transform(reference),
                    &b.bounds,
                    &b.state.transform(reference),
                ) {
                    let mut normal = normal;
                    if normal.dot(a.state.diff(&b.state)) < 0.0 {
                        normal = -normal;
                    }
                    pushes.push((i, normal * (depth * 0.5)));
                    pushes.push((j, normal * (-depth * 0.5)));
                }
            }
        }
        for (idx, push) in pushes {
            let state = &mut self.entities[idx].state;
            state.pos.block += push;
            state.adjust();
        }
    }

    // ------------------------------------------------------------------
    // queries

    /// Nearest block hit by a ray expressed relative to `reference`.
    #[must_use]
    pub fn intersection(&self, ray: &Ray, reference: IVec3) -> Option<RayHit> {
        // coarse pass against chunk bounds, near chunks first
        let mut candidates: Vec<(ChunkHandle, f32)> = self
            .store
            .loaded()
            .filter_map(|handle| {
                let chunk = self.store.chunk(handle);
                chunk
                    .intersects_ray_bounds(ray, &chunk.transform(reference))
                    .map(|dist| (handle, dist))
            })
            .collect();
        if candidates.is_empty() {
            return None;
        }
        candidates.sort_by(|a, b| a.1.total_cmp(&b.1));

        let mut best: Option<RayHit> = None;
        for (handle, bounds_dist) in candidates {
            if best.as_ref().is_some_and(|hit| bounds_dist > hit.distance) {
                continue;
            }
            let chunk = self.store.chunk(handle);
            if let Some((block_index, distance, normal)) =
                chunk.intersection(ray, &chunk.transform(reference), &self.types)
            {
                if best.as_ref().map_or(true, |hit| distance < hit.distance) {
                    best = Some(RayHit {
                        chunk: handle,
                        block_index,
                        distance,
                        normal,
                    });
                }
            }
        }
        best
    }

    /// Nearest entity hit by a ray, ignoring `reference_entity`.
    ///
    /// The ray is relative to the reference entity's chunk.
    #[must_use]
    pub fn intersection_entity(
        &self,
        ray: &Ray,
        reference_entity: u32,
    ) -> Option<(u32, f32, Vec3)> {
        let reference = self.entity(reference_entity)?.chunk_coords();
        let mut best: Option<(u32, f32, Vec3)> = None;
        for entity in &self.entities {
            if entity.id() == reference_entity || entity.dead() {
                continue;
            }
            if let Some((dist, normal)) =
                ray_obb(ray, &entity.bounds, &entity.state.transform(reference))
            {
                if best.map_or(true, |(_, d, _)| dist < d) {
                    best = Some((entity.id(), dist, normal));
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_type::default_registry;
    use crate::chunk::Chunk;

    fn world() -> World {
        World::new(Arc::new(default_registry()), WorldConfig::default())
    }

    fn solid(world: &World) -> u16 {
        world.types().get_by_name("white_block").unwrap().id
    }

    #[test]
    fn test_entity_ids_ascend() {
        let mut w = world();
        let a = w.add_entity();
        let b = w.add_entity();
        let c = w.add_entity();
        assert!(a < b && b < c);
        let ids: Vec<u32> = w.entities().iter().map(Entity::id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_add_entity_with_id_conflicts() {
        let mut w = world();
        assert_eq!(w.add_entity_with_id(10), Some(10));
        assert_eq!(w.add_entity_with_id(10), None);
        assert_eq!(w.add_entity_with_id(5), Some(5));
        let ids: Vec<u32> = w.entities().iter().map(Entity::id).collect();
        assert_eq!(ids, vec![5, 10]);
    }

    #[test]
    fn test_force_add_returns_existing() {
        let mut w = world();
        let id = w.add_entity();
        w.entity_mut(id).unwrap().set_name("original");
        let again = w.force_add_entity(id);
        assert_eq!(again.name(), "original");
    }

    #[test]
    fn test_player_names_unique() {
        let mut w = world();
        assert!(w.add_player("alice").is_some());
        assert!(w.add_player("alice").is_none());
        assert!(w.add_player("bob").is_some());
    }

    #[test]
    fn test_dead_entities_reaped_next_tick() {
        let mut w = world();
        let id = w.add_entity();
        w.entity_mut(id).unwrap().kill();
        assert!(w.entity(id).is_some(), "reaping happens at the next step");
        w.update(16);
        assert!(w.entity(id).is_none());
    }

    #[test]
    fn test_control_force_reaches_target_velocity() {
        let mut w = world();
        let id = w.add_entity();
        {
            let e = w.entity_mut(id).unwrap();
            e.target_velocity = Vec3::new(2.0, 0.0, 0.0);
        }
        for _ in 0..200 {
            w.update(16);
        }
        let v = w.entity(id).unwrap().state.velocity;
        assert!((v.x - 2.0).abs() < 0.05, "velocity should settle, got {v:?}");
        assert!(v.y.abs() < 1e-3 && v.z.abs() < 1e-3);
    }

    #[test]
    fn test_block_collision_pushes_out() {
        let mut w = world();
        let solid_id = solid(&w);
        let index = w.chunks_mut().make_index(IVec3::ZERO, 1);
        let chunk = w.chunks_mut().allocate(IVec3::ZERO).unwrap();
        let cell = IVec3::new(8, 8, 8);
        w.set_block(chunk, Chunk::to_index(cell), Block::new(solid_id));

        let id = w.add_entity();
        {
            let e = w.entity_mut(id).unwrap();
            e.set_world_collidable(true);
            // slightly overlapping the block's top face
            e.set_position(IVec3::ZERO, Vec3::new(8.5, 9.3, 8.5));
        }
        w.update(16);
        let pos = w.entity(id).unwrap().state.pos;
        assert!(
            pos.block.y >= 9.45,
            "entity should be pushed up out of the block, got {:?}",
            pos.block
        );
        let _ = index;
    }

    #[test]
    fn test_entities_separate() {
        let mut w = world();
        let a = w.add_entity();
        let b = w.add_entity();
        for (id, x) in [(a, 8.0f32), (b, 8.4f32)] {
            let e = w.entity_mut(id).unwrap();
            e.set_world_collidable(true);
            e.set_position(IVec3::ZERO, Vec3::new(x, 8.0, 8.0));
        }
        w.update(16);
        let pa = w.entity(a).unwrap().state.absolute_position();
        let pb = w.entity(b).unwrap().state.absolute_position();
        assert!(
            (pb.x - pa.x) > 0.5,
            "overlapping entities should separate: {} vs {}",
            pa.x,
            pb.x
        );
    }

    #[test]
    fn test_player_index_follows_entity() {
        let mut w = world();
        let player = w.add_player("mover").unwrap();
        {
            let e = w.entity_mut(player.entity).unwrap();
            e.set_world_collidable(false);
            e.set_position(IVec3::new(3, 0, 0), Vec3::splat(8.0));
        }
        w.update(16);
        assert_eq!(w.chunks().index(player.chunks).base(), IVec3::new(3, 0, 0));
    }

    #[test]
    fn test_ray_intersection_across_chunks() {
        let mut w = world();
        let solid_id = solid(&w);
        let _index = w.chunks_mut().make_index(IVec3::ZERO, 1);
        let near = w.chunks_mut().allocate(IVec3::ZERO).unwrap();
        let far = w.chunks_mut().allocate(IVec3::new(1, 0, 0)).unwrap();
        // block in the far chunk along the ray, none in the near one
        w.set_block(far, Chunk::to_index(IVec3::new(2, 8, 8)), Block::new(solid_id));
        let _ = near;

        let ray = Ray::new(Vec3::new(0.0, 8.5, 8.5), Vec3::X);
        let hit = w.intersection(&ray, IVec3::ZERO).expect("hit in far chunk");
        assert_eq!(hit.block_index, Chunk::to_index(IVec3::new(2, 8, 8)));
        assert!((hit.distance - 18.0).abs() < 1e-3, "got {}", hit.distance);
    }

    #[test]
    fn test_entity_spanning_three_chunks_collides_with_all() {
        let mut w = world();
        let solid_id = solid(&w);
        let _index = w.chunks_mut().make_index(IVec3::ZERO, 2);
        let left = w.chunks_mut().allocate(IVec3::new(-1, 0, 0)).unwrap();
        let mid = w.chunks_mut().allocate(IVec3::ZERO).unwrap();
        let right = w.chunks_mut().allocate(IVec3::new(1, 0, 0)).unwrap();

        // floor row under the whole span
        for (chunk, x) in [(left, 15), (mid, 0), (mid, 15), (right, 0)] {
            w.set_block(chunk, Chunk::to_index(IVec3::new(x, 7, 8)), Block::new(solid_id));
        }

        let id = w.add_entity();
        {
            let e = w.entity_mut(id).unwrap();
            e.set_world_collidable(true);
            // 18 blocks tall on x, overlapping the floor row slightly
            e.bounds = hollow_shared::geometry::Aabb::new(
                Vec3::new(-9.0, -0.5, -0.5),
                Vec3::new(9.0, 0.5, 0.5),
            );
            e.set_position(IVec3::ZERO, Vec3::new(8.0, 8.3, 8.5));
        }

        let dynamics = w.entity(id).unwrap().dynamics();
        let mut state = w.entity(id).unwrap().state;
        let reference = state.pos.chunk;
        let m = state.transform(reference);
        let mut contacts = Vec::new();
        for handle in w.chunks().loaded() {
            let chunk = w.chunks().chunk(handle);
            if (chunk.position() - reference).manhattan_radius() > 1 {
                continue;
            }
            chunk.intersection_box(
                &dynamics.bounds,
                &m,
                &chunk.transform(reference),
                w.types(),
                &mut contacts,
            );
        }
        let chunks_hit: std::collections::HashSet<IVec3> =
            contacts.iter().map(|c| c.chunk_pos).collect();
        assert_eq!(chunks_hit.len(), 3, "all three spanned chunks must report contacts");
        let _ = state;
    }
}
