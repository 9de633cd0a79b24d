//! Mathematical types shared between client and server.
//!
//! These are the canonical representations used in the network protocol.
//! Only the operations the engine actually performs are provided; this is
//! not a general linear algebra library.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// 3D vector - position, velocity, direction
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Vec3 {
    /// X component
    pub x: f32,
    /// Y component
    pub y: f32,
    /// Z component
    pub z: f32,
}

impl Vec3 {
    /// Creates a new Vec3
    #[inline]
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Zero vector
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    /// Unit X vector
    pub const X: Self = Self::new(1.0, 0.0, 0.0);

    /// Unit Y vector
    pub const Y: Self = Self::new(0.0, 1.0, 0.0);

    /// Unit Z vector
    pub const Z: Self = Self::new(0.0, 0.0, 1.0);

    /// All components set to the same value
    #[inline]
    #[must_use]
    pub const fn splat(v: f32) -> Self {
        Self::new(v, v, v)
    }

    /// Converts to array
    #[must_use]
    pub const fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    /// Creates from array
    #[must_use]
    pub const fn from_array(arr: [f32; 3]) -> Self {
        Self::new(arr[0], arr[1], arr[2])
    }

    /// Dot product
    #[must_use]
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Cross product
    #[must_use]
    pub fn cross(self, other: Self) -> Self {
        Self::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    /// Length squared (avoids sqrt)
    #[must_use]
    pub fn length_squared(self) -> f32 {
        self.dot(self)
    }

    /// Length
    #[must_use]
    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    /// Distance to another point
    #[must_use]
    pub fn distance(self, other: Self) -> f32 {
        (self - other).length()
    }

    /// Distance squared (avoids sqrt)
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f32 {
        (self - other).length_squared()
    }

    /// True if the squared length is below epsilon
    #[must_use]
    pub fn is_zero(self) -> bool {
        self.length_squared() < f32::EPSILON
    }

    /// Unit vector, or zero when the input is (near) zero
    #[must_use]
    pub fn normalized(self) -> Self {
        let len = self.length();
        if len > f32::EPSILON {
            self * (1.0 / len)
        } else {
            Self::ZERO
        }
    }

    /// Caps the magnitude at `max`
    #[must_use]
    pub fn limited(self, max: f32) -> Self {
        let len2 = self.length_squared();
        if len2 > max * max {
            self.normalized() * max
        } else {
            self
        }
    }

    /// Component-wise minimum
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        Self::new(self.x.min(other.x), self.y.min(other.y), self.z.min(other.z))
    }

    /// Component-wise maximum
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        Self::new(self.x.max(other.x), self.y.max(other.y), self.z.max(other.z))
    }

    /// Component-wise absolute value
    #[must_use]
    pub fn abs(self) -> Self {
        Self::new(self.x.abs(), self.y.abs(), self.z.abs())
    }

    /// Component-wise floor
    #[must_use]
    pub fn floor(self) -> Self {
        Self::new(self.x.floor(), self.y.floor(), self.z.floor())
    }

    /// Truncating conversion to integer coordinates
    #[must_use]
    pub fn as_ivec3(self) -> IVec3 {
        IVec3::new(self.x as i32, self.y as i32, self.z as i32)
    }
}

impl std::ops::Add for Vec3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::ops::AddAssign for Vec3 {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl std::ops::Sub for Vec3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl std::ops::SubAssign for Vec3 {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl std::ops::Neg for Vec3 {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

impl std::ops::Mul<f32> for Vec3 {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl std::ops::MulAssign<f32> for Vec3 {
    fn mul_assign(&mut self, rhs: f32) {
        *self = *self * rhs;
    }
}

impl std::ops::Index<usize> for Vec3 {
    type Output = f32;
    fn index(&self, axis: usize) -> &f32 {
        match axis {
            0 => &self.x,
            1 => &self.y,
            2 => &self.z,
            _ => panic!("vector axis out of range: {axis}"),
        }
    }
}

impl std::ops::IndexMut<usize> for Vec3 {
    fn index_mut(&mut self, axis: usize) -> &mut f32 {
        match axis {
            0 => &mut self.x,
            1 => &mut self.y,
            2 => &mut self.z,
            _ => panic!("vector axis out of range: {axis}"),
        }
    }
}

/// 3D integer vector - chunk coordinates, block grid positions
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable, Serialize, Deserialize)]
pub struct IVec3 {
    /// X component
    pub x: i32,
    /// Y component
    pub y: i32,
    /// Z component
    pub z: i32,
}

impl IVec3 {
    /// Creates a new IVec3
    #[inline]
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Zero vector
    pub const ZERO: Self = Self::new(0, 0, 0);

    /// All components set to the same value
    #[inline]
    #[must_use]
    pub const fn splat(v: i32) -> Self {
        Self::new(v, v, v)
    }

    /// Component-wise absolute value
    #[must_use]
    pub const fn abs(self) -> Self {
        Self::new(self.x.abs(), self.y.abs(), self.z.abs())
    }

    /// Chebyshev radius: the largest absolute component.
    ///
    /// Historically called "manhattan radius"; the spawn range and the
    /// collision broad phase are defined in terms of it.
    #[must_use]
    pub const fn manhattan_radius(self) -> i32 {
        let a = self.abs();
        let mut m = a.x;
        if a.y > m {
            m = a.y;
        }
        if a.z > m {
            m = a.z;
        }
        m
    }

    /// Sum of absolute component differences
    #[must_use]
    pub const fn manhattan_distance(self, other: Self) -> i32 {
        let d = Self::new(self.x - other.x, self.y - other.y, self.z - other.z).abs();
        d.x + d.y + d.z
    }

    /// Conversion to float coordinates
    #[must_use]
    pub fn as_vec3(self) -> Vec3 {
        Vec3::new(self.x as f32, self.y as f32, self.z as f32)
    }
}

impl std::ops::Add for IVec3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::ops::AddAssign for IVec3 {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl std::ops::Sub for IVec3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl std::ops::SubAssign for IVec3 {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl std::ops::Neg for IVec3 {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

impl std::ops::Mul<i32> for IVec3 {
    type Output = Self;
    fn mul(self, rhs: i32) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl std::ops::Index<usize> for IVec3 {
    type Output = i32;
    fn index(&self, axis: usize) -> &i32 {
        match axis {
            0 => &self.x,
            1 => &self.y,
            2 => &self.z,
            _ => panic!("vector axis out of range: {axis}"),
        }
    }
}

impl std::ops::IndexMut<usize> for IVec3 {
    fn index_mut(&mut self, axis: usize) -> &mut i32 {
        match axis {
            0 => &mut self.x,
            1 => &mut self.y,
            2 => &mut self.z,
            _ => panic!("vector axis out of range: {axis}"),
        }
    }
}

/// Quaternion for rotations
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Quat {
    /// X component
    pub x: f32,
    /// Y component
    pub y: f32,
    /// Z component
    pub z: f32,
    /// W component
    pub w: f32,
}

impl Quat {
    /// Creates a new quaternion
    #[inline]
    #[must_use]
    pub const fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z, w }
    }

    /// Identity rotation
    pub const IDENTITY: Self = Self::new(1.0, 0.0, 0.0, 0.0);

    /// Hamilton product `self * rhs` (applies `rhs` first)
    #[must_use]
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Unit quaternion; identity when the input is (near) zero
    #[must_use]
    pub fn normalized(self) -> Self {
        let len = (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt();
        if len > f32::EPSILON {
            let inv = 1.0 / len;
            Self::new(self.w * inv, self.x * inv, self.y * inv, self.z * inv)
        } else {
            Self::IDENTITY
        }
    }

    /// Rotation accumulated over `dt` seconds of angular velocity `av`.
    ///
    /// The closed form of `exp(av * dt / 2)`: for a nonzero half-angle
    /// vector h, the result is (cos|h|, h * sin|h| / |h|).
    #[must_use]
    pub fn delta_rotation(av: Vec3, dt: f32) -> Self {
        let half = av * (dt * 0.5);
        let mag = half.length();
        if mag > 0.0 {
            let smag = mag.sin() / mag;
            Self::new(mag.cos(), half.x * smag, half.y * smag, half.z * smag)
        } else {
            Self::IDENTITY
        }
    }

    /// Rotation of `angle` radians about the Y axis
    #[must_use]
    pub fn from_yaw(angle: f32) -> Self {
        let half = angle * 0.5;
        Self::new(half.cos(), 0.0, half.sin(), 0.0)
    }

    /// Rotation of `angle` radians about the X axis
    #[must_use]
    pub fn from_pitch(angle: f32) -> Self {
        let half = angle * 0.5;
        Self::new(half.cos(), half.sin(), 0.0, 0.0)
    }

    /// Rotates a vector by this quaternion
    #[must_use]
    pub fn rotate(self, v: Vec3) -> Vec3 {
        // q v q* expanded via the cross product form
        let u = Vec3::new(self.x, self.y, self.z);
        let uv = u.cross(v);
        let uuv = u.cross(uv);
        v + (uv * self.w + uuv) * 2.0
    }

    /// Rotation matrix equivalent
    #[must_use]
    pub fn to_mat3(self) -> Mat3 {
        let Self { x, y, z, w } = self;
        let (x2, y2, z2) = (x + x, y + y, z + z);
        let (xx, yy, zz) = (x * x2, y * y2, z * z2);
        let (xy, xz, yz) = (x * y2, x * z2, y * z2);
        let (wx, wy, wz) = (w * x2, w * y2, w * z2);
        Mat3::from_cols(
            Vec3::new(1.0 - (yy + zz), xy + wz, xz - wy),
            Vec3::new(xy - wz, 1.0 - (xx + zz), yz + wx),
            Vec3::new(xz + wy, yz - wx, 1.0 - (xx + yy)),
        )
    }
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Column-major 3x3 matrix - rotations only
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Mat3 {
    /// The three column vectors
    pub cols: [Vec3; 3],
}

impl Mat3 {
    /// Identity matrix
    pub const IDENTITY: Self = Self::from_cols(Vec3::X, Vec3::Y, Vec3::Z);

    /// Builds from column vectors
    #[inline]
    #[must_use]
    pub const fn from_cols(x: Vec3, y: Vec3, z: Vec3) -> Self {
        Self { cols: [x, y, z] }
    }

    /// Column accessor; columns of a rotation matrix are the local axes
    #[inline]
    #[must_use]
    pub const fn col(&self, i: usize) -> Vec3 {
        self.cols[i]
    }

    /// Matrix * vector
    #[must_use]
    pub fn mul_vec3(&self, v: Vec3) -> Vec3 {
        self.cols[0] * v.x + self.cols[1] * v.y + self.cols[2] * v.z
    }

    /// Matrix * matrix
    #[must_use]
    pub fn mul_mat3(&self, rhs: &Self) -> Self {
        Self::from_cols(
            self.mul_vec3(rhs.cols[0]),
            self.mul_vec3(rhs.cols[1]),
            self.mul_vec3(rhs.cols[2]),
        )
    }

    /// Transpose; the inverse for pure rotations
    #[must_use]
    pub fn transposed(&self) -> Self {
        Self::from_cols(
            Vec3::new(self.cols[0].x, self.cols[1].x, self.cols[2].x),
            Vec3::new(self.cols[0].y, self.cols[1].y, self.cols[2].y),
            Vec3::new(self.cols[0].z, self.cols[1].z, self.cols[2].z),
        )
    }
}

impl Default for Mat3 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec3_operations() {
        let a = Vec3::new(1.0, 2.0, 3.0);
        let b = Vec3::new(4.0, 5.0, 6.0);

        let sum = a + b;
        assert_eq!(sum.x, 5.0);
        assert_eq!(sum.y, 7.0);
        assert_eq!(sum.z, 9.0);

        let dot = a.dot(b);
        assert_eq!(dot, 32.0); // 1*4 + 2*5 + 3*6
    }

    #[test]
    fn test_vec3_cross() {
        let c = Vec3::X.cross(Vec3::Y);
        assert_eq!(c, Vec3::Z);
        let c = Vec3::Y.cross(Vec3::X);
        assert_eq!(c, -Vec3::Z);
    }

    #[test]
    fn test_vec3_normalize_zero_safe() {
        assert_eq!(Vec3::ZERO.normalized(), Vec3::ZERO);
        let n = Vec3::new(3.0, 0.0, 4.0).normalized();
        assert!((n.length() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_vec3_limited() {
        let v = Vec3::new(10.0, 0.0, 0.0).limited(3.0);
        assert!((v.length() - 3.0).abs() < 1e-6);
        let v = Vec3::new(1.0, 0.0, 0.0).limited(3.0);
        assert_eq!(v, Vec3::X);
    }

    #[test]
    fn test_vec3_bytemuck() {
        let v = Vec3::new(1.0, 2.0, 3.0);
        let bytes: &[u8] = bytemuck::bytes_of(&v);
        assert_eq!(bytes.len(), 12); // 3 * 4 bytes
    }

    #[test]
    fn test_ivec3_manhattan_radius() {
        assert_eq!(IVec3::new(3, -5, 1).manhattan_radius(), 5);
        assert_eq!(IVec3::ZERO.manhattan_radius(), 0);
    }

    #[test]
    fn test_quat_identity_rotation() {
        let v = Vec3::new(1.0, 2.0, 3.0);
        let r = Quat::IDENTITY.rotate(v);
        assert!((r - v).length() < 1e-6);
    }

    #[test]
    fn test_quat_yaw_quarter_turn() {
        let q = Quat::from_yaw(std::f32::consts::FRAC_PI_2);
        let r = q.rotate(Vec3::X);
        // quarter turn about Y sends +X to -Z
        assert!((r - Vec3::new(0.0, 0.0, -1.0)).length() < 1e-5, "got {r:?}");
    }

    #[test]
    fn test_quat_matrix_agrees_with_rotate() {
        let q = Quat::from_yaw(0.7).mul(Quat::from_pitch(-0.3)).normalized();
        let v = Vec3::new(0.2, -1.5, 3.0);
        let a = q.rotate(v);
        let b = q.to_mat3().mul_vec3(v);
        assert!((a - b).length() < 1e-5, "{a:?} vs {b:?}");
    }

    #[test]
    fn test_delta_rotation_zero_velocity() {
        let q = Quat::delta_rotation(Vec3::ZERO, 1.0);
        assert_eq!(q, Quat::IDENTITY);
    }

    #[test]
    fn test_delta_rotation_half_turn() {
        // pi rad/s about Y for one second is a half turn
        let q = Quat::delta_rotation(Vec3::new(0.0, std::f32::consts::PI, 0.0), 1.0);
        let r = q.rotate(Vec3::X);
        assert!((r - Vec3::new(-1.0, 0.0, 0.0)).length() < 1e-5, "got {r:?}");
    }

    #[test]
    fn test_mat3_transpose_inverts_rotation() {
        let m = Quat::from_yaw(1.1).to_mat3();
        let v = Vec3::new(1.0, 2.0, 3.0);
        let back = m.transposed().mul_vec3(m.mul_vec3(v));
        assert!((back - v).length() < 1e-5);
    }
}
