//! Sizes and limits shared between the world, the protocol and the loops.

/// Edge length of a chunk in blocks.
pub const CHUNK_SIZE: i32 = 16;

/// Edge length as a float, for block-space arithmetic.
pub const CHUNK_FSIZE: f32 = 16.0;

/// Blocks per chunk (16^3).
pub const BLOCKS_PER_CHUNK: usize = 4096;

/// Simulation tick length in milliseconds.
pub const TICK_MS: i32 = 16;

/// Default UDP port for the game protocol.
pub const DEFAULT_PORT: u16 = 12354;

/// Default TCP port for the operational command console.
pub const DEFAULT_CMD_PORT: u16 = 12355;

/// Hard upper bound on a datagram, header included.
pub const MAX_PACKET_SIZE: usize = 500;

/// Chebyshev chunk radius within which entities are spawned on clients.
pub const SPAWN_RADIUS: i32 = 7;

/// Ring size of the client's prediction history.
pub const PREDICTION_HISTORY: usize = 16;

/// Chunk disk operations allowed per tick.
pub const CHUNK_IO_BUDGET: usize = 64;

/// Pi as the protocol uses it for angle quantization.
pub const PI: f32 = std::f32::consts::PI;

/// Half pi, the pitch range bound.
pub const PI_0P5: f32 = PI * 0.5;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_volume() {
        assert_eq!((CHUNK_SIZE * CHUNK_SIZE * CHUNK_SIZE) as usize, BLOCKS_PER_CHUNK);
    }
}
