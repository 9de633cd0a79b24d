//! Split coordinates: an integer chunk position plus a block offset.
//!
//! Positions in an unbounded world do not fit a single float vector, so
//! everything that names a place carries a coarse chunk coordinate and a
//! fine in-chunk part. A location is *canonical* when the fine part lies in
//! [0, 16) on every axis; [`ExactLocation::sanitize`] restores that form.

use serde::{Deserialize, Serialize};

use crate::constants::{CHUNK_FSIZE, CHUNK_SIZE};
use crate::math::{IVec3, Vec3};

/// Location with a fractional in-chunk part - entities, rays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExactLocation {
    /// Chunk coordinate.
    pub chunk: IVec3,
    /// Block offset within the chunk, canonical range [0, 16).
    pub block: Vec3,
}

impl ExactLocation {
    /// Creates a location from parts; not sanitized.
    #[inline]
    #[must_use]
    pub const fn new(chunk: IVec3, block: Vec3) -> Self {
        Self { chunk, block }
    }

    /// Location at the origin of chunk (0,0,0).
    pub const ZERO: Self = Self::new(IVec3::ZERO, Vec3::ZERO);

    /// Interprets an absolute position as a location in chunk (0,0,0);
    /// not sanitized.
    #[inline]
    #[must_use]
    pub const fn from_absolute(block: Vec3) -> Self {
        Self::new(IVec3::ZERO, block)
    }

    /// Step-wise correction for block parts that are just out of range.
    #[must_use]
    pub fn correct(mut self) -> Self {
        for axis in 0..3 {
            while self.block[axis] >= CHUNK_FSIZE {
                self.block[axis] -= CHUNK_FSIZE;
                self.chunk[axis] += 1;
            }
            while self.block[axis] < 0.0 {
                self.block[axis] += CHUNK_FSIZE;
                self.chunk[axis] -= 1;
            }
        }
        self
    }

    /// Carries block overflow into the chunk coordinate and wraps the block
    /// part into [0, 16). Idempotent.
    #[must_use]
    pub fn sanitize(self) -> Self {
        let diff = IVec3::new(
            (self.block.x / CHUNK_FSIZE) as i32,
            (self.block.y / CHUNK_FSIZE) as i32,
            (self.block.z / CHUNK_FSIZE) as i32,
        );
        let shifted = Self {
            chunk: self.chunk + diff,
            block: self.block - (diff * CHUNK_SIZE).as_vec3(),
        };
        // the truncating division may leave negative block coordinates
        shifted.correct()
    }

    /// Single fractional vector in world space, relative to chunk (0,0,0).
    #[must_use]
    pub fn absolute(self) -> Vec3 {
        (self.chunk * CHUNK_SIZE).as_vec3() + self.block
    }

    /// The same place expressed with its chunk coordinate zeroed at `reference`.
    #[must_use]
    pub fn relative(self, reference: IVec3) -> Self {
        Self::new(self.chunk - reference, self.block)
    }

    /// Position as a plain vector relative to `reference`'s chunk origin.
    #[must_use]
    pub fn relative_position(self, reference: IVec3) -> Vec3 {
        ((self.chunk - reference) * CHUNK_SIZE).as_vec3() + self.block
    }

    /// Difference `self - other`, pointing from `other` to `self`.
    /// The result is not sanitized.
    #[must_use]
    pub fn difference(self, other: Self) -> Vec3 {
        self.relative_position(other.chunk) - other.block
    }
}

/// Location with an integer in-chunk part - grid operations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoughLocation {
    /// Chunk coordinate.
    pub chunk: IVec3,
    /// Block grid position within the chunk, canonical range [0, 16).
    pub block: IVec3,
}

impl RoughLocation {
    /// Creates a location from parts; not sanitized.
    #[inline]
    #[must_use]
    pub const fn new(chunk: IVec3, block: IVec3) -> Self {
        Self { chunk, block }
    }

    /// Carries overflow into the chunk coordinate and wraps the block part
    /// into [0, 16). Idempotent.
    #[must_use]
    pub fn sanitize(mut self) -> Self {
        for axis in 0..3 {
            let c = self.block[axis].div_euclid(CHUNK_SIZE);
            self.chunk[axis] += c;
            self.block[axis] -= c * CHUNK_SIZE;
        }
        self
    }

    /// Single vector in world block space, relative to chunk (0,0,0).
    #[must_use]
    pub const fn absolute(self) -> IVec3 {
        IVec3::new(
            self.chunk.x * CHUNK_SIZE + self.block.x,
            self.chunk.y * CHUNK_SIZE + self.block.y,
            self.chunk.z * CHUNK_SIZE + self.block.z,
        )
    }

    /// Center of the named block as an exact location.
    #[must_use]
    pub fn center(self) -> ExactLocation {
        ExactLocation::new(self.chunk, self.block.as_vec3() + Vec3::splat(0.5))
    }
}
