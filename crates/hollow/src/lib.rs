//! # HOLLOW
//!
//! Application glue over the world, net and shared crates: the process
//! state machine, command-line parsing, runtime settings and the
//! in-world command interpreter.
//!
//! The engine itself is single-threaded cooperative. One main loop per
//! process reads all pending datagrams, runs timers and the fixed-tick
//! accumulator, writes outbound datagrams and sleeps out the rest of the
//! tick. Disk work is budgeted per tick, never unbounded.

pub mod app;
pub mod command;
pub mod runtime;
pub mod settings;
pub mod states;

pub use runtime::{Config, Mode};
