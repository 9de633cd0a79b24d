//! Block records and the orientation group.
//!
//! A block is a 32-bit record: a type index into the registry and an
//! orientation, one of 24 rotations given by (face, turn). The face names
//! where the block's local up points; the turn rolls about that axis.
//!
//! ## Face numbering
//!
//! Faces are numbered so that `opposite(f) == f ^ 1`. Light propagation,
//! neighbor links and the face-fill tables all rely on that involution.

use bytemuck::{Pod, Zeroable};
use std::sync::OnceLock;

use hollow_shared::math::{IVec3, Mat3, Vec3};

/// One of the six axis-aligned directions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Face {
    /// +Y
    Up = 0,
    /// -Y
    Down = 1,
    /// +X
    Right = 2,
    /// -X
    Left = 3,
    /// +Z
    Front = 4,
    /// -Z
    Back = 5,
}

/// Number of faces.
pub const FACE_COUNT: usize = 6;

/// All faces in numbering order.
pub const ALL_FACES: [Face; FACE_COUNT] = [
    Face::Up,
    Face::Down,
    Face::Right,
    Face::Left,
    Face::Front,
    Face::Back,
];

impl Face {
    /// Face from its numeric value; values must be < 6.
    #[inline]
    #[must_use]
    pub const fn from_index(i: usize) -> Self {
        ALL_FACES[i]
    }

    /// The face on the other side.
    #[inline]
    #[must_use]
    pub const fn opposite(self) -> Self {
        Self::from_index((self as usize) ^ 1)
    }

    /// Axis index: 0 for X, 1 for Y, 2 for Z.
    #[must_use]
    pub const fn axis(self) -> usize {
        match self {
            Self::Up | Self::Down => 1,
            Self::Right | Self::Left => 0,
            Self::Front | Self::Back => 2,
        }
    }

    /// 1 for pro-axis faces, -1 for retro-axis faces.
    #[must_use]
    pub const fn direction(self) -> i32 {
        match self {
            Self::Up | Self::Right | Self::Front => 1,
            Self::Down | Self::Left | Self::Back => -1,
        }
    }

    /// Outward unit normal on the block grid.
    #[must_use]
    pub const fn normal(self) -> IVec3 {
        match self {
            Self::Up => IVec3::new(0, 1, 0),
            Self::Down => IVec3::new(0, -1, 0),
            Self::Right => IVec3::new(1, 0, 0),
            Self::Left => IVec3::new(-1, 0, 0),
            Self::Front => IVec3::new(0, 0, 1),
            Self::Back => IVec3::new(0, 0, -1),
        }
    }

    /// The face whose normal is closest to the given vector.
    #[must_use]
    pub fn from_vector(norm: Vec3) -> Self {
        let anorm = norm.abs();
        if anorm.x > anorm.y {
            if anorm.x > anorm.z {
                if norm.x > 0.0 {
                    Self::Right
                } else {
                    Self::Left
                }
            } else if norm.z > 0.0 {
                Self::Front
            } else {
                Self::Back
            }
        } else if anorm.y > anorm.z {
            if norm.y > 0.0 {
                Self::Up
            } else {
                Self::Down
            }
        } else if norm.z > 0.0 {
            Self::Front
        } else {
            Self::Back
        }
    }
}

/// Roll about the oriented up axis, in quarter turns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum Turn {
    /// No roll.
    #[default]
    None = 0,
    /// Quarter turn counter-clockwise.
    Left = 1,
    /// Half turn.
    Around = 2,
    /// Quarter turn clockwise.
    Right = 3,
}

/// Number of turns.
pub const TURN_COUNT: usize = 4;

/// Number of distinct orientations (6 faces x 4 turns).
pub const ORIENT_COUNT: usize = FACE_COUNT * TURN_COUNT;

impl Turn {
    /// Turn from its numeric value; values must be < 4.
    #[inline]
    #[must_use]
    pub const fn from_index(i: usize) -> Self {
        match i {
            0 => Self::None,
            1 => Self::Left,
            2 => Self::Around,
            _ => Self::Right,
        }
    }
}

/// A single cell: type index plus orientation. Four bytes on disk and wire.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Block {
    /// Index into the block type registry; 0 is air.
    pub type_id: u16,
    /// Orientation, `face * 4 + turn`, in [0, 24).
    pub orient: u8,
    /// Reserved; keeps the record at 32 bits.
    pub _pad: u8,
}

impl Block {
    /// The air block.
    pub const AIR: Self = Self::new(0);

    /// Block of the given type in default orientation (up, no turn).
    #[inline]
    #[must_use]
    pub const fn new(type_id: u16) -> Self {
        Self {
            type_id,
            orient: 0,
            _pad: 0,
        }
    }

    /// Block with explicit orientation.
    #[inline]
    #[must_use]
    pub const fn with_orientation(type_id: u16, face: Face, turn: Turn) -> Self {
        Self {
            type_id,
            orient: (face as u8) * (TURN_COUNT as u8) + turn as u8,
            _pad: 0,
        }
    }

    /// The orientation's face part.
    #[must_use]
    pub const fn face(self) -> Face {
        Face::from_index(self.orient as usize / TURN_COUNT)
    }

    /// The orientation's turn part.
    #[must_use]
    pub const fn turn(self) -> Turn {
        Turn::from_index(self.orient as usize % TURN_COUNT)
    }

    /// Replaces the face part, keeping the turn.
    pub fn set_face(&mut self, face: Face) {
        self.orient = (face as u8) * (TURN_COUNT as u8) + self.turn() as u8;
    }

    /// Replaces the turn part, keeping the face.
    pub fn set_turn(&mut self, turn: Turn) {
        self.orient = (self.face() as u8) * (TURN_COUNT as u8) + turn as u8;
    }

    /// Rotation matrix of this block's orientation.
    #[must_use]
    pub fn transform(self) -> &'static Mat3 {
        &tables().matrices[self.orient as usize]
    }

    /// Maps a world-space face to the block-local face occupying it.
    ///
    /// Shapes store their fill flags in local space; this is the lookup
    /// that lets an oriented stair answer which of its faces is against a
    /// given world direction.
    #[must_use]
    pub fn oriented_face(self, world_face: Face) -> Face {
        tables().orient_to_face[self.orient as usize][world_face as usize]
    }
}

/// Set of faces as a bitmask.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FaceSet(pub u8);

impl FaceSet {
    /// Empty set.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// True if the face is in the set.
    #[must_use]
    pub const fn is_set(self, f: Face) -> bool {
        self.0 & (1 << f as u8) != 0
    }

    /// Adds a face.
    pub fn set(&mut self, f: Face) {
        self.0 |= 1 << f as u8;
    }

    /// Removes a face.
    pub fn unset(&mut self, f: Face) {
        self.0 &= !(1 << f as u8);
    }

    /// Removes every face.
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Adds every face.
    pub fn fill(&mut self) {
        self.0 = (1 << FACE_COUNT) - 1;
    }

    /// True if no face is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if all six faces are set.
    #[must_use]
    pub const fn is_all(self) -> bool {
        self.0 == (1 << FACE_COUNT) - 1
    }
}

/// Integer rotation matrix; entries are -1, 0 or 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct IMat3 {
    cols: [IVec3; 3],
}

impl IMat3 {
    const IDENTITY: Self = Self {
        cols: [IVec3::new(1, 0, 0), IVec3::new(0, 1, 0), IVec3::new(0, 0, 1)],
    };

    fn mul_vec(&self, v: IVec3) -> IVec3 {
        self.cols[0] * v.x + self.cols[1] * v.y + self.cols[2] * v.z
    }

    fn mul(&self, rhs: &Self) -> Self {
        Self {
            cols: [
                self.mul_vec(rhs.cols[0]),
                self.mul_vec(rhs.cols[1]),
                self.mul_vec(rhs.cols[2]),
            ],
        }
    }

    fn transposed(&self) -> Self {
        let c = &self.cols;
        Self {
            cols: [
                IVec3::new(c[0].x, c[1].x, c[2].x),
                IVec3::new(c[0].y, c[1].y, c[2].y),
                IVec3::new(c[0].z, c[1].z, c[2].z),
            ],
        }
    }

    fn to_mat3(self) -> Mat3 {
        Mat3::from_cols(
            self.cols[0].as_vec3(),
            self.cols[1].as_vec3(),
            self.cols[2].as_vec3(),
        )
    }
}

/// Rotation taking local +Y onto the given face's direction.
fn face_rotation(face: Face) -> IMat3 {
    let cols = match face {
        Face::Up => [(1, 0, 0), (0, 1, 0), (0, 0, 1)],
        Face::Down => [(1, 0, 0), (0, -1, 0), (0, 0, -1)],
        Face::Right => [(0, -1, 0), (1, 0, 0), (0, 0, 1)],
        Face::Left => [(0, 1, 0), (-1, 0, 0), (0, 0, 1)],
        Face::Front => [(1, 0, 0), (0, 0, 1), (0, -1, 0)],
        Face::Back => [(1, 0, 0), (0, 0, -1), (0, 1, 0)],
    };
    IMat3 {
        cols: cols.map(|(x, y, z)| IVec3::new(x, y, z)),
    }
}

/// Roll about +Y by the given number of quarter turns.
fn turn_rotation(turn: Turn) -> IMat3 {
    let cols = match turn {
        Turn::None => [(1, 0, 0), (0, 1, 0), (0, 0, 1)],
        Turn::Left => [(0, 0, -1), (0, 1, 0), (1, 0, 0)],
        Turn::Around => [(-1, 0, 0), (0, 1, 0), (0, 0, -1)],
        Turn::Right => [(0, 0, 1), (0, 1, 0), (-1, 0, 0)],
    };
    IMat3 {
        cols: cols.map(|(x, y, z)| IVec3::new(x, y, z)),
    }
}

struct OrientTables {
    matrices: [Mat3; ORIENT_COUNT],
    int_matrices: [IMat3; ORIENT_COUNT],
    orient_to_face: [[Face; FACE_COUNT]; ORIENT_COUNT],
}

fn face_from_normal(n: IVec3) -> Face {
    for face in ALL_FACES {
        if face.normal() == n {
            return face;
        }
    }
    // rotation matrices permute signed axes, so this cannot be reached
    unreachable!("non-axis normal {n:?}")
}

fn build_tables() -> OrientTables {
    let mut int_matrices = [IMat3::IDENTITY; ORIENT_COUNT];
    let mut matrices = [Mat3::IDENTITY; ORIENT_COUNT];
    let mut orient_to_face = [[Face::Up; FACE_COUNT]; ORIENT_COUNT];

    for face in ALL_FACES {
        for turn_i in 0..TURN_COUNT {
            let orient = face as usize * TURN_COUNT + turn_i;
            let m = face_rotation(face).mul(&turn_rotation(Turn::from_index(turn_i)));
            int_matrices[orient] = m;
            matrices[orient] = m.to_mat3();
            let inv = m.transposed();
            for world_face in ALL_FACES {
                orient_to_face[orient][world_face as usize] =
                    face_from_normal(inv.mul_vec(world_face.normal()));
            }
        }
    }

    OrientTables {
        matrices,
        int_matrices,
        orient_to_face,
    }
}

fn tables() -> &'static OrientTables {
    static TABLES: OnceLock<OrientTables> = OnceLock::new();
    TABLES.get_or_init(build_tables)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opposite_is_involution() {
        for face in ALL_FACES {
            assert_eq!(face.opposite().opposite(), face);
            assert_ne!(face.opposite(), face);
        }
    }

    #[test]
    fn test_opposite_is_xor_one() {
        assert_eq!(Face::Up.opposite(), Face::Down);
        assert_eq!(Face::Right.opposite(), Face::Left);
        assert_eq!(Face::Front.opposite(), Face::Back);
    }

    #[test]
    fn test_face_normal_axis_direction_agree() {
        for face in ALL_FACES {
            let n = face.normal();
            assert_eq!(n[face.axis()], face.direction());
            assert_eq!(n.manhattan_radius(), 1);
        }
    }

    #[test]
    fn test_face_from_vector_round_trip() {
        for face in ALL_FACES {
            assert_eq!(Face::from_vector(face.normal().as_vec3()), face);
        }
    }

    #[test]
    fn test_block_is_four_bytes() {
        assert_eq!(std::mem::size_of::<Block>(), 4);
    }

    #[test]
    fn test_block_face_turn_round_trip() {
        for face in ALL_FACES {
            for turn_i in 0..TURN_COUNT {
                let turn = Turn::from_index(turn_i);
                let b = Block::with_orientation(7, face, turn);
                assert_eq!(b.face(), face);
                assert_eq!(b.turn(), turn);
            }
        }
    }

    #[test]
    fn test_orientations_are_distinct() {
        let t = tables();
        for a in 0..ORIENT_COUNT {
            for b in (a + 1)..ORIENT_COUNT {
                assert_ne!(t.int_matrices[a], t.int_matrices[b], "orients {a} and {b} collide");
            }
        }
    }

    #[test]
    fn test_orientations_closed_under_composition() {
        // the 24 rotations form a group: composing any two must land on a
        // member of the table
        let t = tables();
        for a in 0..ORIENT_COUNT {
            for b in 0..ORIENT_COUNT {
                let composed = t.int_matrices[a].mul(&t.int_matrices[b]);
                assert!(
                    t.int_matrices.iter().any(|m| *m == composed),
                    "composition of {a} and {b} left the group"
                );
            }
        }
    }

    #[test]
    fn test_default_orientation_maps_faces_identically() {
        let b = Block::new(1);
        for face in ALL_FACES {
            assert_eq!(b.oriented_face(face), face);
        }
    }

    #[test]
    fn test_down_orientation_flips_up() {
        let b = Block::with_orientation(1, Face::Down, Turn::None);
        assert_eq!(b.oriented_face(Face::Up), Face::Down);
        assert_eq!(b.oriented_face(Face::Down), Face::Up);
    }

    #[test]
    fn test_face_set() {
        let mut set = FaceSet::new();
        assert!(set.is_empty());
        set.set(Face::Up);
        set.set(Face::Back);
        assert!(set.is_set(Face::Up));
        assert!(!set.is_set(Face::Down));
        set.unset(Face::Up);
        assert!(!set.is_set(Face::Up));
        set.fill();
        assert!(set.is_all());
    }
}
