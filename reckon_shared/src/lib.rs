//! `reckon_shared`
//!
//! Shared libraries used by both client and server.
//!
//! Design goals:
//! - Deterministic and modular where practical.
//! - Clear separation of concerns (math, kinematics, collectors, config, net).
//! - Server and client never share state; snapshots cross as bytes.
//! - No `unsafe`.

pub mod collector;
pub mod config;
pub mod kinematics;
pub mod math;
pub mod net;
