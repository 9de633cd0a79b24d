//! # HOLLOW World
//!
//! The authoritative voxel world: chunked block storage with per-block
//! light levels maintained incrementally under edits, deterministic
//! procedural generation, disk persistence, and entity simulation with
//! collision resolution and steering.
//!
//! ## Structure
//!
//! - [`block`] - block records and the 24-element orientation group
//! - [`block_type`] - the frozen type registry and block shapes
//! - [`chunk`] - 16^3 block + light storage and per-chunk queries
//! - [`store`] - chunk ownership, neighbor links, light propagation
//! - [`index`] - ring-addressed observer cubes used for streaming
//! - [`noise`] - seeded simplex and worley noise
//! - [`generator`] - (seed, chunk position) -> blocks
//! - [`save`] - the on-disk world format
//! - [`loader`] - budgeted load-from-disk-or-generate
//! - [`entity`] - entities, players and their state
//! - [`world`] - simulation step: forces, integration, collision
//! - [`steering`] - behaviour-driven target velocities

pub mod block;
pub mod block_type;
pub mod chunk;
pub mod entity;
pub mod generator;
pub mod index;
pub mod loader;
pub mod noise;
pub mod save;
pub mod steering;
pub mod store;
pub mod world;

pub use block::{Block, Face, FaceSet, Turn};
pub use block_type::{BlockType, BlockTypeRegistry, Shape};
pub use chunk::{Chunk, WorldCollision};
pub use entity::{Entity, EntityState, Player};
pub use generator::Generator;
pub use index::ChunkIndex;
pub use loader::ChunkLoader;
pub use save::{SaveError, WorldSave};
pub use store::{ChunkHandle, ChunkStore};
pub use world::World;
