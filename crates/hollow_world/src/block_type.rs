//! Block types and the registry that freezes them at startup.
//!
//! Dispatch on block behaviour is a table lookup by id; nothing here is
//! virtual. Shapes are a closed set of variants with exactly the two
//! operations the engine needs of them: ray tests and box tests.

use hollow_shared::geometry::{obb_obb, ray_obb, Aabb, Ray, Transform};
use hollow_shared::math::Vec3;

use crate::block::{Block, Face};

/// Collision and render volume of a block type, in block-local space
/// (the block occupies [-0.5, 0.5] around its cell center).
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Shape {
    /// No volume at all (air).
    #[default]
    Null,
    /// The full cell.
    Cuboid(Aabb),
    /// Lower half of the cell.
    Slab(Aabb),
    /// Two stacked cuboids forming a step.
    Stair {
        /// Bottom part, spanning the full footprint.
        base: Aabb,
        /// Upper part, covering the back half.
        top: Aabb,
    },
}

impl Shape {
    /// The standard full block.
    #[must_use]
    pub const fn cuboid() -> Self {
        Self::Cuboid(Aabb::UNIT_CENTERED)
    }

    /// The standard lower-half slab.
    #[must_use]
    pub const fn slab() -> Self {
        Self::Slab(Aabb::new(Vec3::new(-0.5, -0.5, -0.5), Vec3::new(0.5, 0.0, 0.5)))
    }

    /// The standard stair: full lower half plus the back upper quarter.
    #[must_use]
    pub const fn stair() -> Self {
        Self::Stair {
            base: Aabb::new(Vec3::new(-0.5, -0.5, -0.5), Vec3::new(0.5, 0.0, 0.5)),
            top: Aabb::new(Vec3::new(-0.5, 0.0, -0.5), Vec3::new(0.5, 0.5, 0.0)),
        }
    }

    /// Whether the given local face is completely covered by the shape.
    ///
    /// Used to cull hidden faces of neighboring blocks; only a fully
    /// covered face obstructs.
    #[must_use]
    pub fn face_filled(&self, face: Face) -> bool {
        match self {
            Self::Null => false,
            Self::Cuboid(_) => true,
            Self::Slab(_) => face == Face::Down,
            Self::Stair { .. } => matches!(face, Face::Down | Face::Back),
        }
    }

    /// Component boxes of the shape.
    fn parts(&self) -> [Option<&Aabb>; 2] {
        match self {
            Self::Null => [None, None],
            Self::Cuboid(b) | Self::Slab(b) => [Some(b), None],
            Self::Stair { base, top } => [Some(base), Some(top)],
        }
    }

    /// Nearest ray hit against the transformed shape.
    ///
    /// The returned normal is in the shape's local frame; the caller
    /// rotates it by the block orientation.
    #[must_use]
    pub fn intersect_ray(&self, ray: &Ray, m: &Transform) -> Option<(f32, Vec3)> {
        let mut best: Option<(f32, Vec3)> = None;
        for part in self.parts().into_iter().flatten() {
            if let Some((dist, normal)) = ray_obb(ray, part, m) {
                if best.map_or(true, |(d, _)| dist < d) {
                    best = Some((dist, normal));
                }
            }
        }
        best
    }

    /// Deepest box penetration against the transformed shape.
    ///
    /// Both transforms are world-space; the returned normal is world-space.
    #[must_use]
    pub fn intersect_box(&self, m: &Transform, box_: &Aabb, box_m: &Transform) -> Option<(f32, Vec3)> {
        let mut best: Option<(f32, Vec3)> = None;
        for part in self.parts().into_iter().flatten() {
            if let Some((depth, normal)) = obb_obb(part, m, box_, box_m) {
                if best.map_or(true, |(d, _)| depth > d) {
                    best = Some((depth, normal));
                }
            }
        }
        best
    }
}

/// One min/mid/max response curve over a generation field.
///
/// `map` remaps [min, mid, max] linearly onto [-1, 0, 1] and then smooths
/// with `(1 - x^2)^2`, so the response peaks at `mid` and falls to zero at
/// the bounds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Distribution {
    min: f32,
    mid: f32,
    max: f32,
    inv_neg: f32,
    inv_pos: f32,
}

impl Distribution {
    /// Creates a curve; `min <= mid <= max` expected.
    #[must_use]
    pub fn new(min: f32, mid: f32, max: f32) -> Self {
        let abs_min = (min - mid).abs();
        let abs_max = (max - mid).abs();
        Self {
            min,
            mid,
            max,
            inv_neg: if abs_min < f32::EPSILON { 0.0 } else { 1.0 / abs_min },
            inv_pos: if abs_max < f32::EPSILON { 0.0 } else { 1.0 / abs_max },
        }
    }

    /// The wide-open curve accepting the whole field range.
    #[must_use]
    pub fn open() -> Self {
        Self::new(-1.0, 0.0, 1.0)
    }

    /// True if `x` lies within [min, max].
    #[must_use]
    pub fn valid(&self, x: f32) -> bool {
        x >= self.min && x <= self.max
    }

    /// Lower bound of the accepted range.
    #[must_use]
    pub const fn min(&self) -> f32 {
        self.min
    }

    /// Peak of the response curve.
    #[must_use]
    pub const fn mid(&self) -> f32 {
        self.mid
    }

    /// Upper bound of the accepted range.
    #[must_use]
    pub const fn max(&self) -> f32 {
        self.max
    }

    /// Smoothed response in [0, 1], peaking at `mid`.
    #[must_use]
    pub fn map(&self, x: f32) -> f32 {
        let mut x = x - self.mid;
        x *= if x < 0.0 { self.inv_neg } else { self.inv_pos };
        // smoothing: x^4 - 2x^2 + 1
        x *= x;
        x * x - 2.0 * x + 1.0
    }
}

/// Gravity emitted by a block type.
///
/// The returned force is world absolute, for a unit mass at relative
/// position `diff` (pointing from the block towards the target).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlockGravity {
    /// Strength at unit distance; falls off with the square of distance.
    pub strength: f32,
}

impl BlockGravity {
    /// Radial pull of the given strength.
    #[must_use]
    pub const fn radial(strength: f32) -> Self {
        Self { strength }
    }

    /// Force on a unit mass at `diff`.
    #[must_use]
    pub fn force(&self, diff: Vec3) -> Vec3 {
        let dist2 = diff.length_squared();
        if dist2 < f32::EPSILON {
            return Vec3::ZERO;
        }
        diff.normalized() * (-self.strength / dist2)
    }
}

/// Generation parameters of a block type.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenParams {
    /// Whether the generator considers this type at all.
    pub generate: bool,
    /// Response to the solidity field.
    pub solidity: Distribution,
    /// Response to the humidity field.
    pub humidity: Distribution,
    /// Response to the temperature field.
    pub temperature: Distribution,
    /// Response to the richness field.
    pub richness: Distribution,
    /// Weight multiplier against other candidates.
    pub commonness: f32,
}

impl Default for GenParams {
    fn default() -> Self {
        Self {
            generate: false,
            solidity: Distribution::new(0.5, 0.75, 1.0),
            humidity: Distribution::open(),
            temperature: Distribution::open(),
            richness: Distribution::open(),
            commonness: 1.0,
        }
    }
}

/// Registry entry describing one kind of block.
#[derive(Clone, Debug)]
pub struct BlockType {
    /// Unique name, for saves and commands.
    pub name: String,
    /// Display string.
    pub label: String,
    /// Id assigned at registration.
    pub id: u16,
    /// Collision and render volume.
    pub shape: Shape,
    /// Texture indices, one per shape part.
    pub textures: Vec<u16>,
    /// Color modifier applied at render time.
    pub rgb_mod: [u8; 3],
    /// Block outline color for the focus highlight.
    pub outline_color: [u8; 3],
    /// Sound id played on placement.
    pub place_sound: i16,
    /// Sound id played on removal.
    pub remove_sound: i16,
    /// Light level emitted, 0..15.
    pub luminosity: u8,
    /// Whether the block is drawn at all.
    pub visible: bool,
    /// If true, stops light and fixes the cell's level to `luminosity`.
    pub block_light: bool,
    /// Whether to check for collisions at all.
    pub collision: bool,
    /// If the block is impenetrable to entities.
    pub collide_block: bool,
    /// Gravity emitted, if any.
    pub gravity: Option<BlockGravity>,
    /// Terrain generation parameters.
    pub gen: GenParams,
}

impl Default for BlockType {
    fn default() -> Self {
        Self {
            name: String::new(),
            label: String::from("some block"),
            id: 0,
            shape: Shape::cuboid(),
            textures: Vec::new(),
            rgb_mod: [255, 255, 255],
            outline_color: [0, 0, 0],
            place_sound: -1,
            remove_sound: -1,
            luminosity: 0,
            visible: true,
            block_light: true,
            collision: true,
            collide_block: true,
            gravity: None,
            gen: GenParams::default(),
        }
    }
}

impl BlockType {
    /// Whether the world-space `face` of an oriented block of this type is
    /// completely filled.
    #[must_use]
    pub fn face_filled(&self, block: Block, face: Face) -> bool {
        self.shape.face_filled(block.oriented_face(face))
    }
}

/// The frozen table of block types, indexed by id.
///
/// Id 0 is always "air": invisible, non-collidable, transparent to light.
#[derive(Debug)]
pub struct BlockTypeRegistry {
    types: Vec<BlockType>,
}

impl BlockTypeRegistry {
    /// Registry with only air.
    #[must_use]
    pub fn new() -> Self {
        let air = BlockType {
            name: String::from("air"),
            label: String::from("air"),
            shape: Shape::Null,
            visible: false,
            block_light: false,
            collision: false,
            collide_block: false,
            ..BlockType::default()
        };
        Self { types: vec![air] }
    }

    /// Adds a type, assigning and returning its id.
    pub fn add(&mut self, mut block_type: BlockType) -> u16 {
        let id = self.types.len() as u16;
        block_type.id = id;
        self.types.push(block_type);
        id
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// There is always at least air.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Type by id; out-of-range ids resolve to air.
    #[must_use]
    pub fn get(&self, id: u16) -> &BlockType {
        self.types.get(id as usize).unwrap_or(&self.types[0])
    }

    /// Type of a block record.
    #[must_use]
    pub fn get_block(&self, block: Block) -> &BlockType {
        self.get(block.type_id)
    }

    /// Type by unique name.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<&BlockType> {
        self.types.iter().find(|t| t.name == name)
    }

    /// Iterates all types in id order.
    pub fn iter(&self) -> impl Iterator<Item = &BlockType> {
        self.types.iter()
    }

    /// True if the id names a registered type.
    #[must_use]
    pub fn contains(&self, id: u16) -> bool {
        (id as usize) < self.types.len()
    }
}

impl Default for BlockTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The built-in type set: colored blocks, slabs and stairs plus one glowing
/// block, mirroring the engine's bootstrap world.
#[must_use]
pub fn default_registry() -> BlockTypeRegistry {
    let mut reg = BlockTypeRegistry::new();

    let colors: [(&str, [u8; 3]); 4] = [
        ("white", [255, 255, 255]),
        ("red", [255, 0, 0]),
        ("green", [0, 255, 0]),
        ("blue", [0, 0, 255]),
    ];

    for (i, (color, rgb)) in colors.iter().enumerate() {
        let gen = GenParams {
            generate: true,
            solidity: Distribution::new(0.4, 0.55 + 0.1 * i as f32, 1.0),
            commonness: 1.0 - 0.15 * i as f32,
            ..GenParams::default()
        };
        reg.add(BlockType {
            name: format!("{color}_block"),
            label: format!("{color} block"),
            shape: Shape::cuboid(),
            rgb_mod: *rgb,
            gen,
            ..BlockType::default()
        });
        reg.add(BlockType {
            name: format!("{color}_slab"),
            label: format!("{color} slab"),
            shape: Shape::slab(),
            rgb_mod: *rgb,
            ..BlockType::default()
        });
        reg.add(BlockType {
            name: format!("{color}_stair"),
            label: format!("{color} stair"),
            shape: Shape::stair(),
            rgb_mod: *rgb,
            ..BlockType::default()
        });
    }

    reg.add(BlockType {
        name: String::from("glow_block"),
        label: String::from("glowing block"),
        shape: Shape::cuboid(),
        rgb_mod: [255, 255, 0],
        luminosity: 15,
        ..BlockType::default()
    });

    reg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_air_is_id_zero() {
        let reg = BlockTypeRegistry::new();
        let air = reg.get(0);
        assert_eq!(air.name, "air");
        assert!(!air.visible);
        assert!(!air.block_light);
        assert!(!air.collision);
    }

    #[test]
    fn test_registration_assigns_sequential_ids() {
        let mut reg = BlockTypeRegistry::new();
        let a = reg.add(BlockType {
            name: "a".into(),
            ..BlockType::default()
        });
        let b = reg.add(BlockType {
            name: "b".into(),
            ..BlockType::default()
        });
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(reg.get(b).name, "b");
        assert_eq!(reg.get_by_name("a").map(|t| t.id), Some(1));
    }

    #[test]
    fn test_out_of_range_id_is_air() {
        let reg = BlockTypeRegistry::new();
        assert_eq!(reg.get(999).name, "air");
    }

    #[test]
    fn test_distribution_peaks_at_mid() {
        let d = Distribution::new(0.0, 0.5, 1.0);
        assert!((d.map(0.5) - 1.0).abs() < 1e-6);
        assert!(d.map(0.0).abs() < 1e-6);
        assert!(d.map(1.0).abs() < 1e-6);
        assert!(d.map(0.25) > 0.0 && d.map(0.25) < 1.0);
    }

    #[test]
    fn test_distribution_asymmetric() {
        let d = Distribution::new(-1.0, 0.8, 1.0);
        assert!((d.map(0.8) - 1.0).abs() < 1e-6);
        assert!(d.map(0.9) > 0.0);
        assert!(d.map(-0.99) < 0.02);
    }

    #[test]
    fn test_shape_face_fill() {
        assert!(Shape::cuboid().face_filled(Face::Up));
        assert!(!Shape::slab().face_filled(Face::Up));
        assert!(Shape::slab().face_filled(Face::Down));
        assert!(Shape::stair().face_filled(Face::Back));
        assert!(!Shape::stair().face_filled(Face::Front));
        assert!(!Shape::Null.face_filled(Face::Down));
    }

    #[test]
    fn test_slab_ray_passes_over() {
        use hollow_shared::geometry::{Ray, Transform};
        // ray through the upper half of the cell misses a slab
        let ray = Ray::new(Vec3::new(-5.0, 0.25, 0.0), Vec3::X);
        assert!(Shape::slab().intersect_ray(&ray, &Transform::IDENTITY).is_none());
        let low = Ray::new(Vec3::new(-5.0, -0.25, 0.0), Vec3::X);
        assert!(Shape::slab().intersect_ray(&low, &Transform::IDENTITY).is_some());
    }

    #[test]
    fn test_stair_ray_hits_nearest_part() {
        use hollow_shared::geometry::{Ray, Transform};
        // from the front, the upper ray only reaches the back-top part
        let ray = Ray::new(Vec3::new(0.0, 0.25, 5.0), Vec3::new(0.0, 0.0, -1.0));
        let (dist, _) = Shape::stair()
            .intersect_ray(&ray, &Transform::IDENTITY)
            .expect("stair top should be hit");
        assert!((dist - 5.0).abs() < 1e-4, "hit back half at z=0, got {dist}");
    }

    #[test]
    fn test_gravity_points_at_block() {
        let g = BlockGravity::radial(9.8);
        let f = g.force(Vec3::new(2.0, 0.0, 0.0));
        assert!(f.x < 0.0, "pull towards the emitter");
        assert!(f.y.abs() < 1e-6);
        let near = g.force(Vec3::new(1.0, 0.0, 0.0)).length();
        let far = g.force(Vec3::new(2.0, 0.0, 0.0)).length();
        assert!(near > far, "inverse-square falloff");
    }

    #[test]
    fn test_default_registry_contents() {
        let reg = default_registry();
        // air + 4 colors x 3 shapes + glow
        assert_eq!(reg.len(), 14);
        let glow = reg.get_by_name("glow_block").expect("glow block registered");
        assert_eq!(glow.luminosity, 15);
        assert!(reg.iter().filter(|t| t.gen.generate).count() >= 4);
    }
}
