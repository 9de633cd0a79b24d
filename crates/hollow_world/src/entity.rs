//! Entities and players.
//!
//! An entity is anything simulated: players, critters, test dummies. Its
//! state splits position into chunk and block parts so the world can be
//! unbounded; everything else is plain data. Entities are owned by the
//! world's id-sorted list and referenced by id, never by pointer.

use hollow_shared::constants::CHUNK_SIZE;
use hollow_shared::geometry::{Aabb, Ray, Transform};
use hollow_shared::location::ExactLocation;
use hollow_shared::math::{IVec3, Quat, Vec3};

use crate::store::IndexHandle;

/// Motion state of an entity.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EntityState {
    /// Position, sanitized after every integration step.
    pub pos: ExactLocation,
    /// Velocity in blocks per second.
    pub velocity: Vec3,
    /// Orientation.
    pub orient: Quat,
    /// Angular velocity; axis scaled by radians per second.
    pub ang_vel: Vec3,
    /// Look pitch in [-pi/2, pi/2].
    pub pitch: f32,
    /// Look yaw in [-pi, pi].
    pub yaw: f32,
}

impl EntityState {
    /// Advances position and orientation by `dt` seconds.
    pub fn update(&mut self, dt: f32) {
        self.pos.block += self.velocity * dt;
        self.orient = Quat::delta_rotation(self.ang_vel, dt).mul(self.orient).normalized();
        self.adjust();
    }

    /// Restores the canonical block range after position changes.
    pub fn adjust(&mut self) {
        self.pos = self.pos.sanitize();
    }

    /// Position relative to chunk (0,0,0).
    #[must_use]
    pub fn absolute_position(&self) -> Vec3 {
        self.pos.absolute()
    }

    /// Position relative to a reference chunk.
    #[must_use]
    pub fn relative_position(&self, reference: IVec3) -> Vec3 {
        self.pos.relative_position(reference)
    }

    /// Offset from another state's position, pointing from `other` here.
    #[must_use]
    pub fn diff(&self, other: &EntityState) -> Vec3 {
        self.relative_position(other.pos.chunk) - other.pos.block
    }

    /// Rotation-and-translation transform relative to a reference chunk.
    #[must_use]
    pub fn transform(&self, reference: IVec3) -> Transform {
        Transform::new(self.orient.to_mat3(), self.relative_position(reference))
    }
}

/// Control and collision parameters sampled by the integrator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Dynamics {
    /// Velocity the controller wants.
    pub target_velocity: Vec3,
    /// Cap on control force magnitude.
    pub max_force: f32,
    /// Seconds over which control tries to reach the target velocity.
    pub response_time: f32,
    /// Local collision bounds.
    pub bounds: Aabb,
    /// Whether the entity collides with blocks at all.
    pub world_collidable: bool,
}

/// A simulated object in the world.
#[derive(Clone, Debug)]
pub struct Entity {
    id: u32,
    name: String,
    /// Local collision bounds.
    pub bounds: Aabb,
    /// Motion state.
    pub state: EntityState,
    /// Velocity the entity's controller steers towards.
    pub target_velocity: Vec3,
    /// Cap on control force magnitude.
    pub max_force: f32,
    /// Seconds over which control tries to reach the target velocity.
    pub response_time: f32,
    /// Model instance id; 0 for none. Rendering reads it, the server
    /// forwards it in spawn packets.
    pub model_id: u32,
    ref_count: u32,
    world_collision: bool,
    dead: bool,
}

impl Entity {
    /// Fresh entity with the given id.
    #[must_use]
    pub fn new(id: u32) -> Self {
        Self {
            id,
            name: String::from("anonymous"),
            bounds: Aabb::UNIT_CENTERED,
            state: EntityState::default(),
            target_velocity: Vec3::ZERO,
            max_force: 10.0,
            response_time: 0.25,
            model_id: 0,
            ref_count: 0,
            world_collision: false,
            dead: false,
        }
    }

    /// World-unique id.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renames the entity.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Whether the entity collides with blocks.
    #[must_use]
    pub const fn world_collidable(&self) -> bool {
        self.world_collision
    }

    /// Enables or disables block collision.
    pub fn set_world_collidable(&mut self, on: bool) {
        self.world_collision = on;
    }

    /// Chunk the entity currently occupies.
    #[must_use]
    pub const fn chunk_coords(&self) -> IVec3 {
        self.state.pos.chunk
    }

    /// Places the entity, sanitizing the position.
    pub fn set_position(&mut self, chunk: IVec3, block: Vec3) {
        self.state.pos = ExactLocation::new(chunk, block).sanitize();
    }

    /// Parameters the integrator needs, decoupled from the entity list.
    #[must_use]
    pub fn dynamics(&self) -> Dynamics {
        Dynamics {
            target_velocity: self.target_velocity,
            max_force: self.max_force,
            response_time: self.response_time,
            bounds: self.bounds,
            world_collidable: self.world_collision,
        }
    }

    /// View ray from the entity's eye along its look direction.
    #[must_use]
    pub fn aim(&self, reference: IVec3) -> Ray {
        let transform = self.state.transform(reference);
        let orig = transform.pos;
        let dir = transform.rot.mul_vec3(Vec3::new(0.0, 0.0, -1.0)).normalized();
        Ray::new(orig, dir)
    }

    /// Takes a keep-alive reference.
    pub fn add_ref(&mut self) {
        self.ref_count += 1;
    }

    /// Drops a keep-alive reference.
    pub fn remove_ref(&mut self) {
        self.ref_count = self.ref_count.saturating_sub(1);
    }

    /// Marks the entity for removal.
    pub fn kill(&mut self) {
        self.dead = true;
    }

    /// True while anything holds a reference.
    #[must_use]
    pub const fn referenced(&self) -> bool {
        self.ref_count > 0
    }

    /// True once killed.
    #[must_use]
    pub const fn dead(&self) -> bool {
        self.dead
    }

    /// Dead and unreferenced; the reaper may take it.
    #[must_use]
    pub const fn can_remove(&self) -> bool {
        self.dead && self.ref_count == 0
    }
}

/// A player: an entity plus the chunk index that follows it around.
#[derive(Clone, Copy, Debug)]
pub struct Player {
    /// Id of the player's entity.
    pub entity: u32,
    /// The interest region streaming and visibility work from.
    pub chunks: IndexHandle,
    /// Selected inventory slot.
    pub inventory_slot: u8,
}

/// Chebyshev chunk extent of a player's interest region.
pub const PLAYER_INDEX_EXTENT: i32 = 6;

/// Blocks spanned by a player's interest region edge, for sanity checks.
pub const PLAYER_INDEX_SPAN: i32 = (2 * PLAYER_INDEX_EXTENT + 1) * CHUNK_SIZE;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_update_advances_position() {
        let mut state = EntityState {
            velocity: Vec3::new(2.0, 0.0, 0.0),
            ..EntityState::default()
        };
        state.update(0.5);
        assert!((state.pos.block.x - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_state_update_carries_into_next_chunk() {
        let mut state = EntityState {
            pos: ExactLocation::new(IVec3::ZERO, Vec3::new(15.5, 0.0, 0.0)),
            velocity: Vec3::new(2.0, 0.0, 0.0),
            ..EntityState::default()
        };
        state.update(0.5);
        assert_eq!(state.pos.chunk, IVec3::new(1, 0, 0));
        assert!((state.pos.block.x - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_state_update_rotates() {
        let mut state = EntityState {
            ang_vel: Vec3::new(0.0, std::f32::consts::PI, 0.0),
            ..EntityState::default()
        };
        state.update(1.0);
        let forward = state.orient.rotate(Vec3::new(0.0, 0.0, -1.0));
        assert!((forward - Vec3::new(0.0, 0.0, 1.0)).length() < 1e-4, "half turn, got {forward:?}");
    }

    #[test]
    fn test_diff_across_chunks() {
        let a = EntityState {
            pos: ExactLocation::new(IVec3::new(1, 0, 0), Vec3::new(1.0, 0.0, 0.0)),
            ..EntityState::default()
        };
        let b = EntityState {
            pos: ExactLocation::new(IVec3::ZERO, Vec3::new(15.0, 0.0, 0.0)),
            ..EntityState::default()
        };
        let d = a.diff(&b);
        assert!((d - Vec3::new(2.0, 0.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_entity_lifecycle() {
        let mut e = Entity::new(7);
        assert!(!e.dead());
        assert!(!e.can_remove());
        e.add_ref();
        e.kill();
        assert!(e.dead());
        assert!(!e.can_remove(), "still referenced");
        e.remove_ref();
        assert!(e.can_remove());
    }

    #[test]
    fn test_aim_follows_orientation() {
        let mut e = Entity::new(1);
        e.state.orient = Quat::from_yaw(std::f32::consts::FRAC_PI_2);
        let ray = e.aim(IVec3::ZERO);
        // yaw 90 degrees turns -Z into -X
        assert!((ray.dir - Vec3::new(-1.0, 0.0, 0.0)).length() < 1e-4, "got {:?}", ray.dir);
    }
}
