//! # HOLLOW Net
//!
//! The datagram protocol and both session halves.
//!
//! ## Layers
//!
//! - [`protocol`] - fixed-layout packets with quantized state encoding
//! - [`connection`] - per-peer sequencing, ack bitfields, timeouts and
//!   congestion hints
//! - [`transfer`] - fragmenting, ack-tracked, compressed chunk transfer
//! - [`server`] - connection lifecycle, entity visibility, authoritative
//!   updates and chunk streaming
//! - [`client`] - input prediction, server reconciliation and the
//!   mirrored world
//!
//! Packets above the reliability signal are fire-and-forget; anything
//! that must arrive (spawns, chunk fragments, login) is retransmitted by
//! the layer that cares when the connection reports the loss.

pub mod client;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod transfer;

use thiserror::Error;

/// Errors surfaced by the networking layer.
#[derive(Debug, Error)]
pub enum NetError {
    /// Socket creation or send/receive trouble.
    #[error("socket: {0}")]
    Socket(#[from] std::io::Error),
    /// The remote address could not be resolved.
    #[error("cannot resolve host {0}")]
    Resolve(String),
}

/// Result alias for the networking layer.
pub type NetResult<T> = Result<T, NetError>;
