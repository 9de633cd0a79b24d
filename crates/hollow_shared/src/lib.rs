//! # HOLLOW Shared Types
//!
//! The canonical representations used by the world, the network protocol
//! and the application glue.
//!
//! ## Contents
//!
//! - [`math`] - vectors, quaternions and the few matrix ops physics needs
//! - [`location`] - split chunk/block coordinates with sanitization
//! - [`geometry`] - AABB/ray primitives and separating-axis tests
//! - [`timer`] - millisecond interval timers for the fixed-tick loops
//! - [`constants`] - sizes and limits both ends of the wire agree on

pub mod constants;
pub mod geometry;
pub mod location;
pub mod math;
pub mod timer;

pub use constants::*;
pub use geometry::{Aabb, Ray};
pub use location::{ExactLocation, RoughLocation};
pub use math::{IVec3, Mat3, Quat, Vec3};
pub use timer::IntervalTimer;
