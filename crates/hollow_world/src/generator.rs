//! Deterministic chunk content from seed and coordinates.
//!
//! The generator is a pure function: the block array it produces depends
//! only on the world seed and the chunk position. A solidity field
//! (octaved simplex) and a type field (worley) are combined with three
//! more derived climate fields; every candidate type scores the fields
//! through its distribution curves and the best positive score wins.
//! Cells nothing claims become the space type.
//!
//! A final pass sprinkles luminous blocks over surface cells using an
//! integer LCG of the chunk position, so even the decoration is
//! bit-identical across runs.

use hollow_shared::constants::{BLOCKS_PER_CHUNK, CHUNK_SIZE};
use hollow_shared::math::{IVec3, Vec3};

use crate::block::Block;
use crate::block_type::{BlockTypeRegistry, GenParams, Shape};
use crate::chunk::Chunk;
use crate::noise::{octave_noise, SimplexNoise, WorldSeed, WorleyNoise};

/// Generator tuning.
#[derive(Clone, Copy, Debug)]
pub struct GeneratorConfig {
    /// World seed.
    pub seed: u64,
    /// Feature size in blocks; larger stretches the terrain out.
    pub stretch: f32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            stretch: 64.0,
        }
    }
}

struct Candidate {
    id: u16,
    gen: GenParams,
}

/// Deterministic terrain source.
pub struct Generator {
    solid_noise: SimplexNoise,
    type_noise: WorleyNoise,
    humidity_noise: SimplexNoise,
    temperature_noise: SimplexNoise,
    richness_noise: SimplexNoise,
    stretch_inv: f32,
    space_id: u16,
    light_id: u16,
    candidates: Vec<Candidate>,
    /// Below the lowest candidate's solidity floor nothing can win; the
    /// expensive type and climate fields are skipped entirely.
    solidity_floor: f32,
}

impl Generator {
    /// Builds a generator over the registry's generation candidates.
    #[must_use]
    pub fn new(config: GeneratorConfig, types: &BlockTypeRegistry) -> Self {
        let seed = WorldSeed::new(config.seed);
        let candidates: Vec<Candidate> = types
            .iter()
            .filter(|t| t.gen.generate)
            .map(|t| Candidate { id: t.id, gen: t.gen })
            .collect();
        let solidity_floor = candidates
            .iter()
            .map(|c| c.gen.solidity.min())
            .fold(f32::INFINITY, f32::min);
        let light_id = types
            .iter()
            .find(|t| t.luminosity > 0 && !matches!(t.shape, Shape::Null))
            .map_or(0, |t| t.id);
        Self {
            solid_noise: SimplexNoise::new(seed),
            type_noise: WorleyNoise::new(seed.derive(1)),
            humidity_noise: SimplexNoise::new(seed.derive(2)),
            temperature_noise: SimplexNoise::new(seed.derive(3)),
            richness_noise: SimplexNoise::new(seed.derive(4)),
            stretch_inv: 1.0 / config.stretch,
            space_id: 0,
            light_id,
            candidates,
            solidity_floor,
        }
    }

    /// Overrides the type used for empty cells.
    pub fn set_space(&mut self, id: u16) {
        self.space_id = id;
    }

    /// Overrides the type used for sprinkled light sources.
    pub fn set_light(&mut self, id: u16) {
        self.light_id = id;
    }

    /// Produces the block array for a chunk position.
    #[must_use]
    pub fn generate(&self, pos: IVec3) -> Box<[Block; BLOCKS_PER_CHUNK]> {
        let mut blocks = Box::new([Block::AIR; BLOCKS_PER_CHUNK]);
        let origin = (pos * CHUNK_SIZE).as_vec3();

        for z in 0..CHUNK_SIZE {
            for y in 0..CHUNK_SIZE {
                for x in 0..CHUNK_SIZE {
                    let cell = IVec3::new(x, y, z);
                    let world = origin + cell.as_vec3();
                    blocks[Chunk::to_index(cell)] = Block::new(self.pick_type(world));
                }
            }
        }

        self.sprinkle_lights(pos, &mut blocks);
        blocks
    }

    /// Scores every candidate at a world position.
    fn pick_type(&self, world: Vec3) -> u16 {
        let solidity = octave_noise(&self.solid_noise, world, 3, 0.5, self.stretch_inv, 2.0);
        if solidity < self.solidity_floor {
            return self.space_id;
        }
        let scaled = world * self.stretch_inv;
        let type_val = self.type_noise.sample(scaled);
        let humidity = self.humidity_noise.sample(scaled * 0.5);
        let temperature = self.temperature_noise.sample(scaled * 0.5);
        let richness = self.richness_noise.sample(scaled * 0.5);

        let mut best = self.space_id;
        let mut best_weight = 0.0f32;
        for candidate in &self.candidates {
            let gen = &candidate.gen;
            if !gen.solidity.valid(solidity)
                || !gen.humidity.valid(humidity)
                || !gen.temperature.valid(temperature)
                || !gen.richness.valid(richness)
            {
                continue;
            }
            // the worley field perturbs commonness so equally-suited types
            // interleave instead of the first candidate painting everything
            let weight = gen.commonness
                * (1.0 + 0.5 * type_val)
                * gen.solidity.map(solidity)
                * gen.humidity.map(humidity)
                * gen.temperature.map(temperature)
                * gen.richness.map(richness);
            if weight > best_weight {
                best_weight = weight;
                best = candidate.id;
            }
        }
        best
    }

    /// Replaces roughly one in 32 surface cells with the light type.
    fn sprinkle_lights(&self, pos: IVec3, blocks: &mut [Block; BLOCKS_PER_CHUNK]) {
        if self.light_id == 0 {
            return;
        }
        let mut random = (263_167i64
            .wrapping_mul(i64::from(pos.x))
            .wrapping_add(2_097_593i64.wrapping_mul(i64::from(pos.y)))
            .wrapping_add(426_389i64.wrapping_mul(i64::from(pos.z)))) as u32;
        for index in 0..BLOCKS_PER_CHUNK {
            if Self::is_local_surface(blocks, index) {
                random = random.wrapping_mul(666_649).wrapping_add(7_778_777);
                if random % 32 == 0 {
                    blocks[index] = Block::new(self.light_id);
                }
            }
        }
    }

    /// Surface test confined to one chunk: a non-air cell with an open or
    /// out-of-chunk side.
    fn is_local_surface(blocks: &[Block; BLOCKS_PER_CHUNK], index: usize) -> bool {
        if blocks[index] == Block::AIR {
            return false;
        }
        let pos = Chunk::to_pos(index);
        for face in crate::block::ALL_FACES {
            let next = pos + face.normal();
            if !Chunk::in_bounds(next) {
                return true;
            }
            if blocks[Chunk::to_index(next)] == Block::AIR {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_type::default_registry;

    fn generator(seed: u64) -> Generator {
        let types = default_registry();
        Generator::new(
            GeneratorConfig {
                seed,
                ..GeneratorConfig::default()
            },
            &types,
        )
    }

    #[test]
    fn test_same_seed_same_chunk() {
        let a = generator(42);
        let b = generator(42);
        let pos = IVec3::new(3, -1, 7);
        assert_eq!(*a.generate(pos), *b.generate(pos), "generation must be deterministic");
    }

    #[test]
    fn test_different_seeds_differ() {
        let a = generator(1);
        let b = generator(2);
        let pos = IVec3::new(0, 0, 0);
        assert_ne!(*a.generate(pos), *b.generate(pos));
    }

    #[test]
    fn test_different_positions_differ() {
        let gen = generator(42);
        assert_ne!(*gen.generate(IVec3::ZERO), *gen.generate(IVec3::new(1, 0, 0)));
    }

    #[test]
    fn test_produces_solid_and_space() {
        let gen = generator(42);
        let mut solids = 0usize;
        let mut space = 0usize;
        for x in -2..2 {
            for y in -2..2 {
                let blocks = gen.generate(IVec3::new(x, y, 0));
                for block in blocks.iter() {
                    if *block == Block::AIR {
                        space += 1;
                    } else {
                        solids += 1;
                    }
                }
            }
        }
        assert!(solids > 0, "some terrain should be solid");
        assert!(space > 0, "some terrain should be open");
    }

    #[test]
    fn test_only_registered_candidates_appear() {
        let types = default_registry();
        let gen = Generator::new(GeneratorConfig::default(), &types);
        let allowed: Vec<u16> = types
            .iter()
            .filter(|t| t.gen.generate || t.luminosity > 0 || t.id == 0)
            .map(|t| t.id)
            .collect();
        let blocks = gen.generate(IVec3::new(5, 5, 5));
        for block in blocks.iter() {
            assert!(
                allowed.contains(&block.type_id),
                "unexpected type {} in generated chunk",
                block.type_id
            );
        }
    }
}
