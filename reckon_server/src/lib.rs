//! `reckon_server`
//!
//! Server-side systems:
//! - Authoritative movers (circle, square)
//! - Drift-gated replication of their kinematic state
//! - Fixed timestep loop that publishes frames into a link
//!
//! The true motion is simulated every tick; what reaches clients is only the
//! snapshot the replication gate lets through.

pub mod motion;
pub mod server;

pub use motion::{CircularMover, ReplicationGate, SquareMover};
pub use server::ReplicationServer;
