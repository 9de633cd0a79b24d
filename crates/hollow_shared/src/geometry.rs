//! Geometric primitives and the intersection tests the engine relies on.
//!
//! ## Conventions
//!
//! - Transforms are rotation + translation only; the three rotation columns
//!   must have unit length. Nothing in the engine scales or shears.
//! - Ray tests return the entry distance along the ray, never negative.
//! - Box tests report penetration depth along the least-overlap axis.

use crate::math::{Mat3, Vec3};

/// Axis-aligned box given by two corners.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    /// Corner with the smallest coordinates.
    pub min: Vec3,
    /// Corner with the largest coordinates.
    pub max: Vec3,
}

impl Aabb {
    /// Creates a box from corners; call [`Aabb::adjusted`] if they may be swapped.
    #[inline]
    #[must_use]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Unit cube centered on the origin, the default entity and block bound.
    pub const UNIT_CENTERED: Self =
        Self::new(Vec3::new(-0.5, -0.5, -0.5), Vec3::new(0.5, 0.5, 0.5));

    /// Swaps corner components so min <= max holds on every axis.
    #[must_use]
    pub fn adjusted(self) -> Self {
        Self {
            min: self.min.min(self.max),
            max: self.min.max(self.max),
        }
    }

    /// Center point.
    #[must_use]
    pub fn center(self) -> Vec3 {
        self.min + (self.max - self.min) * 0.5
    }

    /// Distance between the origin and the farthest vertex.
    #[must_use]
    pub fn origin_radius(self) -> f32 {
        self.min.abs().max(self.max.abs()).length()
    }

    /// The eight corner points.
    #[must_use]
    pub fn corners(self) -> [Vec3; 8] {
        let (lo, hi) = (self.min, self.max);
        [
            Vec3::new(lo.x, lo.y, lo.z),
            Vec3::new(lo.x, lo.y, hi.z),
            Vec3::new(lo.x, hi.y, lo.z),
            Vec3::new(lo.x, hi.y, hi.z),
            Vec3::new(hi.x, lo.y, lo.z),
            Vec3::new(hi.x, lo.y, hi.z),
            Vec3::new(hi.x, hi.y, lo.z),
            Vec3::new(hi.x, hi.y, hi.z),
        ]
    }
}

/// Half-line from an origin along a direction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    /// Starting point.
    pub orig: Vec3,
    /// Direction; unit length expected.
    pub dir: Vec3,
}

impl Ray {
    /// Creates a ray.
    #[inline]
    #[must_use]
    pub const fn new(orig: Vec3, dir: Vec3) -> Self {
        Self { orig, dir }
    }
}

/// Rotation plus translation; the only transforms the engine applies.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    /// Rotation part; columns are the local axes.
    pub rot: Mat3,
    /// Translation part.
    pub pos: Vec3,
}

impl Transform {
    /// Creates a transform from parts.
    #[inline]
    #[must_use]
    pub const fn new(rot: Mat3, pos: Vec3) -> Self {
        Self { rot, pos }
    }

    /// Pure translation.
    #[inline]
    #[must_use]
    pub const fn from_translation(pos: Vec3) -> Self {
        Self::new(Mat3::IDENTITY, pos)
    }

    /// Identity transform.
    pub const IDENTITY: Self = Self::from_translation(Vec3::ZERO);

    /// Applies the transform to a point.
    #[must_use]
    pub fn apply(&self, v: Vec3) -> Vec3 {
        self.rot.mul_vec3(v) + self.pos
    }

    /// Composes `self * rhs` (applies `rhs` first).
    #[must_use]
    pub fn then(&self, rhs: &Self) -> Self {
        Self::new(self.rot.mul_mat3(&rhs.rot), self.apply(rhs.pos))
    }
}

/// Intersects a ray with a plain axis-aligned box.
///
/// Returns the entry distance, clamped to zero for origins inside the box.
#[must_use]
pub fn ray_aabb(ray: &Ray, aabb: &Aabb) -> Option<f32> {
    let mut t_min = 0.0f32;
    let mut t_max = f32::INFINITY;
    for axis in 0..3 {
        let inv = 1.0 / ray.dir[axis];
        let t1 = (aabb.min[axis] - ray.orig[axis]) * inv;
        let t2 = (aabb.max[axis] - ray.orig[axis]) * inv;
        t_min = t_min.max(t1.min(t2));
        t_max = t_max.min(t1.max(t2));
    }
    (t_max >= t_min).then_some(t_min)
}

/// Intersects a ray with a transformed box.
///
/// On hit returns `(distance, normal)`; the normal is axis-aligned in the
/// box's local frame and points against the ray.
#[must_use]
pub fn ray_obb(ray: &Ray, aabb: &Aabb, m: &Transform) -> Option<(f32, Vec3)> {
    let mut t_min = 0.0f32;
    let mut t_max = f32::INFINITY;
    let delta = m.pos - ray.orig;

    let mut t1 = Vec3::ZERO;
    let mut t2 = Vec3::splat(f32::INFINITY);

    for axis in 0..3 {
        let world_axis = m.rot.col(axis);
        let e = world_axis.dot(delta);
        let f = world_axis.dot(ray.dir);

        if f.abs() > f32::EPSILON {
            t1[axis] = (e + aabb.min[axis]) / f;
            t2[axis] = (e + aabb.max[axis]) / f;

            t_min = t_min.max(t1[axis].min(t2[axis]));
            t_max = t_max.min(t1[axis].max(t2[axis]));

            if t_max < t_min {
                return None;
            }
        } else if aabb.min[axis] - e > 0.0 || aabb.max[axis] - e < 0.0 {
            // ray parallel to this slab and outside it
            return None;
        }
    }

    let min_all = t1.min(t2);
    let normal = if min_all.x > min_all.y {
        if min_all.x > min_all.z {
            Vec3::new(if t2.x < t1.x { 1.0 } else { -1.0 }, 0.0, 0.0)
        } else {
            Vec3::new(0.0, 0.0, if t2.z < t1.z { 1.0 } else { -1.0 })
        }
    } else if min_all.y > min_all.z {
        Vec3::new(0.0, if t2.y < t1.y { 1.0 } else { -1.0 }, 0.0)
    } else {
        Vec3::new(0.0, 0.0, if t2.z < t1.z { 1.0 } else { -1.0 })
    };
    Some((t_min, normal))
}

/// Separating-axis test of two oriented boxes.
///
/// Tests the six face normals and the nine edge cross products. On overlap
/// returns the penetration depth and the axis of least overlap.
#[must_use]
pub fn obb_obb(a_box: &Aabb, a_m: &Transform, b_box: &Aabb, b_m: &Transform) -> Option<(f32, Vec3)> {
    let a_corners = a_box.corners().map(|c| a_m.apply(c));
    let b_corners = b_box.corners().map(|c| b_m.apply(c));

    let mut axes = [Vec3::ZERO; 15];
    for i in 0..3 {
        axes[i] = a_m.rot.col(i);
        axes[3 + i] = b_m.rot.col(i);
    }
    let mut n = 6;
    for i in 0..3 {
        for j in 0..3 {
            axes[n] = a_m.rot.col(i).cross(b_m.rot.col(j)).normalized();
            n += 1;
        }
    }

    let mut depth = f32::INFINITY;
    let mut min_axis = Vec3::ZERO;

    for axis in axes {
        if axis.is_zero() {
            // degenerate cross product of parallel edges
            continue;
        }
        let mut a_min = f32::INFINITY;
        let mut a_max = f32::NEG_INFINITY;
        for corner in &a_corners {
            let val = corner.dot(axis);
            a_min = a_min.min(val);
            a_max = a_max.max(val);
        }
        let mut b_min = f32::INFINITY;
        let mut b_max = f32::NEG_INFINITY;
        for corner in &b_corners {
            let val = corner.dot(axis);
            b_min = b_min.min(val);
            b_max = b_max.max(val);
        }

        if a_max < b_min || b_max < a_min {
            return None;
        }

        let overlap = a_max.min(b_max) - a_min.max(b_min);
        if overlap < depth {
            depth = overlap;
            min_axis = axis;
        }
    }

    Some((depth, min_axis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Quat;

    #[test]
    fn test_ray_hits_box_ahead() {
        let ray = Ray::new(Vec3::new(-5.0, 0.0, 0.0), Vec3::X);
        let hit = ray_obb(&ray, &Aabb::UNIT_CENTERED, &Transform::IDENTITY);
        let (dist, normal) = hit.expect("ray should hit the box");
        assert!((dist - 4.5).abs() < 1e-5, "dist = {dist}");
        assert_eq!(normal, Vec3::new(-1.0, 0.0, 0.0));
    }

    #[test]
    fn test_ray_misses_box_behind() {
        let ray = Ray::new(Vec3::new(5.0, 0.0, 0.0), Vec3::X);
        assert!(ray_obb(&ray, &Aabb::UNIT_CENTERED, &Transform::IDENTITY).is_none());
    }

    #[test]
    fn test_ray_from_inside_clamps_to_zero() {
        let ray = Ray::new(Vec3::ZERO, Vec3::X);
        let (dist, _) = ray_obb(&ray, &Aabb::UNIT_CENTERED, &Transform::IDENTITY)
            .expect("origin inside the box must hit");
        assert!(dist >= 0.0, "distance must never be negative, got {dist}");
    }

    #[test]
    fn test_ray_tangent_face_never_negative() {
        // grazing along the top face
        let ray = Ray::new(Vec3::new(-5.0, 0.5, 0.0), Vec3::X);
        if let Some((dist, _)) = ray_obb(&ray, &Aabb::UNIT_CENTERED, &Transform::IDENTITY) {
            assert!(dist >= 0.0);
            assert!((dist - 4.5).abs() < 1e-4, "tangent hit at face entry, got {dist}");
        }
    }

    #[test]
    fn test_ray_translated_box() {
        let ray = Ray::new(Vec3::ZERO, Vec3::Z);
        let m = Transform::from_translation(Vec3::new(0.0, 0.0, 10.0));
        let (dist, _) = ray_obb(&ray, &Aabb::UNIT_CENTERED, &m).expect("hit");
        assert!((dist - 9.5).abs() < 1e-5);
    }

    #[test]
    fn test_obb_aligned_overlap() {
        let a = Aabb::UNIT_CENTERED;
        let b = Transform::from_translation(Vec3::new(0.75, 0.0, 0.0));
        let (depth, normal) = obb_obb(&a, &Transform::IDENTITY, &a, &b).expect("overlap");
        assert!((depth - 0.25).abs() < 1e-5, "depth = {depth}");
        assert!(normal.x.abs() > 0.99, "least overlap is on X, got {normal:?}");
    }

    #[test]
    fn test_obb_aligned_separated() {
        let a = Aabb::UNIT_CENTERED;
        let b = Transform::from_translation(Vec3::new(1.5, 0.0, 0.0));
        assert!(obb_obb(&a, &Transform::IDENTITY, &a, &b).is_none());
    }

    #[test]
    fn test_obb_rotated_corner_overlap() {
        // a 45 degree yaw turns the unit box's X extent into sqrt(2)/2
        let rot = Quat::from_yaw(std::f32::consts::FRAC_PI_4).to_mat3();
        let a = Aabb::UNIT_CENTERED;
        let near = Transform::new(rot, Vec3::new(1.1, 0.0, 0.0));
        assert!(obb_obb(&a, &Transform::IDENTITY, &a, &near).is_some());
        let far = Transform::new(rot, Vec3::new(1.3, 0.0, 0.0));
        assert!(obb_obb(&a, &Transform::IDENTITY, &a, &far).is_none());
    }

    #[test]
    fn test_aabb_adjusted() {
        let b = Aabb::new(Vec3::new(1.0, -1.0, 3.0), Vec3::new(0.0, 2.0, -3.0)).adjusted();
        assert_eq!(b.min, Vec3::new(0.0, -1.0, -3.0));
        assert_eq!(b.max, Vec3::new(1.0, 2.0, 3.0));
    }
}
