//! `reckon_client`
//!
//! Client-side systems:
//! - Dead-reckoning estimator (extrapolate and blend toward the server)
//! - Arrival-time statistics for the expected update interval
//! - Replica driver that drains the link every tick
//! - HUD text for the overlay

pub mod client;
pub mod estimator;
pub mod hud;

pub use client::ReplicaClient;
pub use estimator::DeadReckoningEstimator;
