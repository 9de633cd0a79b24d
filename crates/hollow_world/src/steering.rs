//! Steering controllers: target forces from composable behaviours.
//!
//! A controller is attached to one entity (by id, looked up on use) and
//! mixes the enabled behaviours into a single force each frame. Forces
//! accumulate in priority order under a magnitude cap; once the cap is
//! reached, lower-priority behaviours are ignored for the frame.

use rand::Rng;

use hollow_shared::geometry::Ray;
use hollow_shared::location::ExactLocation;
use hollow_shared::math::Vec3;

use crate::entity::EntityState;
use crate::world::World;

/// Slow down to a stop.
pub const HALT: u32 = 0x0001;
/// Drift on a slowly wandering heading.
pub const WANDER: u32 = 0x0002;
/// Steer away from blocks ahead.
pub const OBSTACLE_AVOIDANCE: u32 = 0x0004;
/// Accelerate towards a configured velocity.
pub const TARGET_VELOCITY: u32 = 0x0008;
/// Flee the target entity's predicted position.
pub const EVADE_TARGET: u32 = 0x0010;
/// Seek the target entity's predicted position.
pub const PURSUE_TARGET: u32 = 0x0020;

/// Behaviour-driven force source for one entity.
#[derive(Clone, Debug)]
pub struct Steering {
    entity: u32,
    enabled: u32,
    target_entity: Option<u32>,
    target_velocity: Vec3,
    /// Seconds in which steering tries to arrive at a behaviour's velocity.
    accel: f32,
    /// Maximum speed behaviours steer towards.
    speed: f32,
    wander_radius: f32,
    wander_dist: f32,
    wander_disp: f32,
    wander_pos: Vec3,
    obstacle_dir: Vec3,
}

impl Steering {
    /// Controller for the given entity id.
    #[must_use]
    pub fn new(entity: u32) -> Self {
        Self {
            entity,
            enabled: 0,
            target_entity: None,
            target_velocity: Vec3::ZERO,
            accel: 0.5,
            speed: 4.0,
            wander_radius: 2.0,
            wander_dist: 1.0,
            wander_disp: 1.0,
            wander_pos: Vec3::Z,
            obstacle_dir: Vec3::ZERO,
        }
    }

    /// The controlled entity's id.
    #[must_use]
    pub const fn entity(&self) -> u32 {
        self.entity
    }

    /// Enables behaviours by mask.
    pub fn enable(&mut self, behaviours: u32) -> &mut Self {
        self.enabled |= behaviours;
        self
    }

    /// Disables behaviours by mask.
    pub fn disable(&mut self, behaviours: u32) -> &mut Self {
        self.enabled &= !behaviours;
        self
    }

    /// True if any of the given behaviours is enabled.
    #[must_use]
    pub const fn any_enabled(&self, behaviours: u32) -> bool {
        self.enabled & behaviours != 0
    }

    /// Sets the pursued/evaded entity.
    pub fn set_target_entity(&mut self, id: u32) -> &mut Self {
        self.target_entity = Some(id);
        self
    }

    /// Clears the pursued/evaded entity.
    pub fn clear_target_entity(&mut self) -> &mut Self {
        self.target_entity = None;
        self
    }

    /// Sets the velocity for [`TARGET_VELOCITY`].
    pub fn set_target_velocity(&mut self, v: Vec3) -> &mut Self {
        self.target_velocity = v;
        self
    }

    /// Sets the arrival time for behaviour velocities.
    pub fn set_acceleration(&mut self, accel: f32) -> &mut Self {
        self.accel = accel;
        self
    }

    /// Sets the maximum behaviour speed.
    pub fn set_speed(&mut self, speed: f32) -> &mut Self {
        self.speed = speed;
        self
    }

    /// Configures wandering: sphere radius, distance ahead, and the
    /// maximum drift of the point on the sphere in units per second.
    pub fn set_wander_params(&mut self, radius: f32, dist: f32, disp: f32) -> &mut Self {
        self.wander_radius = radius;
        self.wander_dist = dist;
        self.wander_disp = disp;
        self
    }

    /// Per-frame state updates: wander drift and the obstacle probe.
    pub fn update(&mut self, world: &World, dt: f32, rng: &mut impl Rng) {
        if self.any_enabled(WANDER) {
            self.update_wander(dt, rng);
        }
        if self.any_enabled(OBSTACLE_AVOIDANCE) {
            self.update_obstacle(world);
        }
    }

    fn update_wander(&mut self, dt: f32, rng: &mut impl Rng) {
        let jitter = Vec3::new(
            rng.gen_range(-1.0..=1.0),
            rng.gen_range(-1.0..=1.0),
            rng.gen_range(-1.0..=1.0),
        ) * (self.wander_disp * dt);
        let moved = self.wander_pos + jitter;
        self.wander_pos = if moved.is_zero() {
            Vec3::Z * self.wander_radius
        } else {
            moved.normalized() * self.wander_radius
        };
    }

    fn update_obstacle(&mut self, world: &World) {
        self.obstacle_dir = Vec3::ZERO;
        let Some(entity) = world.entity(self.entity) else {
            return;
        };
        let state = entity.state;
        if state.velocity.is_zero() {
            return;
        }
        // probe one second of travel ahead
        let reach = state.velocity.length();
        let ray = Ray::new(
            state.relative_position(state.pos.chunk),
            state.velocity.normalized(),
        );
        if let Some(hit) = world.intersection(&ray, state.pos.chunk) {
            if hit.distance <= reach {
                self.obstacle_dir = hit.normal;
            }
        }
    }

    /// Mixes the enabled behaviours into one force for the given state.
    #[must_use]
    pub fn force(&self, world: &World, state: &EntityState) -> Vec3 {
        let mut out = Vec3::ZERO;
        let max = self.accel_cap();

        if self.any_enabled(HALT) && Self::sum_force(&mut out, self.halt(state), max) {
            return out;
        }
        if self.any_enabled(OBSTACLE_AVOIDANCE)
            && Self::sum_force(&mut out, self.avoid_obstacle(state), max)
        {
            return out;
        }
        if let Some(target) = self.target_entity.and_then(|id| world.entity(id)) {
            if self.any_enabled(EVADE_TARGET)
                && Self::sum_force(&mut out, self.evade(state, &target.state), max)
            {
                return out;
            }
            if self.any_enabled(PURSUE_TARGET)
                && Self::sum_force(&mut out, self.pursue(state, &target.state), max)
            {
                return out;
            }
        }
        if self.any_enabled(WANDER) && Self::sum_force(&mut out, self.wander(state), max) {
            return out;
        }
        if self.any_enabled(TARGET_VELOCITY)
            && Self::sum_force(&mut out, self.to_velocity(state, self.target_velocity), max)
        {
            return out;
        }
        out
    }

    fn accel_cap(&self) -> f32 {
        self.speed / self.accel
    }

    /// Adds as much of `add` to `out` as the cap allows; true when maxed.
    fn sum_force(out: &mut Vec3, add: Vec3, max: f32) -> bool {
        let remaining = max - out.length();
        if remaining <= 0.0 {
            return true;
        }
        let len = add.length();
        if len <= remaining {
            *out += add;
            false
        } else {
            *out += add.normalized() * remaining;
            true
        }
    }

    /// Accelerate so velocity matches `v` within the arrival time.
    fn to_velocity(&self, state: &EntityState, v: Vec3) -> Vec3 {
        (v - state.velocity) * (1.0 / self.accel)
    }

    fn halt(&self, state: &EntityState) -> Vec3 {
        self.to_velocity(state, Vec3::ZERO)
    }

    fn seek(&self, state: &EntityState, to: ExactLocation) -> Vec3 {
        let dir = to.difference(ExactLocation::new(state.pos.chunk, state.pos.block));
        self.to_velocity(state, dir.normalized() * self.speed)
    }

    fn flee(&self, state: &EntityState, from: ExactLocation) -> Vec3 {
        let dir = ExactLocation::new(state.pos.chunk, state.pos.block).difference(from);
        self.to_velocity(state, dir.normalized() * self.speed)
    }

    /// Where the target will be after a lead time that grows with range.
    fn predicted(&self, state: &EntityState, target: &EntityState) -> ExactLocation {
        let dist = target.diff(state).length();
        let lead = if self.speed > f32::EPSILON {
            dist / self.speed
        } else {
            0.0
        };
        ExactLocation::new(target.pos.chunk, target.pos.block + target.velocity * lead).sanitize()
    }

    fn pursue(&self, state: &EntityState, target: &EntityState) -> Vec3 {
        self.seek(state, self.predicted(state, target))
    }

    fn evade(&self, state: &EntityState, target: &EntityState) -> Vec3 {
        self.flee(state, self.predicted(state, target))
    }

    fn wander(&self, state: &EntityState) -> Vec3 {
        let heading = if state.velocity.is_zero() {
            state.orient.rotate(Vec3::new(0.0, 0.0, -1.0))
        } else {
            state.velocity.normalized()
        };
        let point = state.pos.block + heading * self.wander_dist + self.wander_pos;
        self.seek(state, ExactLocation::new(state.pos.chunk, point).sanitize())
    }

    fn avoid_obstacle(&self, state: &EntityState) -> Vec3 {
        if self.obstacle_dir.is_zero() {
            return Vec3::ZERO;
        }
        self.to_velocity(state, self.obstacle_dir * self.speed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_type::default_registry;
    use crate::world::WorldConfig;
    use hollow_shared::math::IVec3;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::sync::Arc;

    fn world() -> World {
        World::new(Arc::new(default_registry()), WorldConfig::default())
    }

    #[test]
    fn test_halt_opposes_velocity() {
        let w = world();
        let mut s = Steering::new(1);
        s.enable(HALT);
        let state = EntityState {
            velocity: Vec3::new(3.0, 0.0, 0.0),
            ..EntityState::default()
        };
        let f = s.force(&w, &state);
        assert!(f.x < 0.0, "halt must brake, got {f:?}");
    }

    #[test]
    fn test_target_velocity_accelerates() {
        let w = world();
        let mut s = Steering::new(1);
        s.enable(TARGET_VELOCITY).set_target_velocity(Vec3::new(2.0, 0.0, 0.0));
        let f = s.force(&w, &EntityState::default());
        assert!(f.x > 0.0);
    }

    #[test]
    fn test_force_respects_cap() {
        let w = world();
        let mut s = Steering::new(1);
        s.enable(HALT | TARGET_VELOCITY)
            .set_target_velocity(Vec3::new(100.0, 0.0, 0.0))
            .set_speed(4.0)
            .set_acceleration(0.5);
        let state = EntityState {
            velocity: Vec3::new(-50.0, 0.0, 0.0),
            ..EntityState::default()
        };
        let f = s.force(&w, &state);
        let cap = 4.0 / 0.5;
        assert!(f.length() <= cap + 1e-3, "force {} over cap {cap}", f.length());
    }

    #[test]
    fn test_pursue_leads_moving_target() {
        let mut w = world();
        let hunter = w.add_entity();
        let prey = w.add_entity();
        w.entity_mut(prey).unwrap().state.velocity = Vec3::new(0.0, 0.0, 2.0);
        w.entity_mut(prey).unwrap().state.pos.block = Vec3::new(5.0, 0.0, 0.0);

        let mut s = Steering::new(hunter);
        s.enable(PURSUE_TARGET).set_target_entity(prey);
        let f = s.force(&w, &w.entity(hunter).unwrap().state);
        assert!(f.x > 0.0, "pursue moves towards the target");
        assert!(f.z > 0.0, "pursue leads along the target's velocity, got {f:?}");
    }

    #[test]
    fn test_evade_runs_away() {
        let mut w = world();
        let runner = w.add_entity();
        let threat = w.add_entity();
        w.entity_mut(threat).unwrap().state.pos.block = Vec3::new(3.0, 0.0, 0.0);

        let mut s = Steering::new(runner);
        s.enable(EVADE_TARGET).set_target_entity(threat);
        let f = s.force(&w, &w.entity(runner).unwrap().state);
        assert!(f.x < 0.0, "evade moves away from the target, got {f:?}");
    }

    #[test]
    fn test_wander_drifts_with_dt() {
        let w = world();
        let mut s = Steering::new(1);
        s.enable(WANDER);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let before = s.wander_pos;
        s.update(&w, 0.016, &mut rng);
        let small_step = (s.wander_pos - before).length();

        let mut s2 = Steering::new(1);
        s2.enable(WANDER);
        let mut rng2 = ChaCha8Rng::seed_from_u64(7);
        s2.update(&w, 0.5, &mut rng2);
        let big_step = (s2.wander_pos - before).length();
        assert!(
            big_step >= small_step,
            "jitter scales with dt: {small_step} vs {big_step}"
        );
    }

    #[test]
    fn test_priority_stops_at_cap() {
        let w = world();
        let mut s = Steering::new(1);
        // a huge halt demand saturates the cap, leaving no room for wander
        s.enable(HALT | WANDER).set_speed(1.0).set_acceleration(0.1);
        let state = EntityState {
            velocity: Vec3::new(-100.0, 0.0, 0.0),
            ..EntityState::default()
        };
        let f = s.force(&w, &state);
        let dir = f.normalized();
        assert!(dir.x > 0.99, "saturated halt leaves no budget for wander: {f:?}");
    }
}
