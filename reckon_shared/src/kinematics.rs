//! Kinematic state and its wire encoding.
//!
//! A `KinematicState` is one snapshot of motion. The server owns its
//! authoritative copy, the client owns its predicted copy, and the two only
//! ever meet as bytes.
//!
//! Wire layout (36 bytes, no header, no compression):
//!
//! | offset | field          |
//! |--------|----------------|
//! | 0      | position x,y,z |
//! | 12     | velocity x,y,z |
//! | 24     | accel x,y,z    |
//!
//! Each component is a little-endian IEEE-754 `f32`.

use std::fmt;

use anyhow::{bail, ensure};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::math::Vec3;

/// Encoded size of a [`KinematicState`] in bytes.
pub const ENCODED_LEN: usize = 9 * 4;

/// Position, velocity and acceleration of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct KinematicState {
    pub position: Vec3,
    pub velocity: Vec3,
    pub acceleration: Vec3,
}

impl KinematicState {
    pub const fn new(position: Vec3, velocity: Vec3, acceleration: Vec3) -> Self {
        Self {
            position,
            velocity,
            acceleration,
        }
    }

    /// State of an entity that was just spawned at `position`.
    pub const fn at_rest(position: Vec3) -> Self {
        Self::new(position, Vec3::ZERO, Vec3::ZERO)
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.velocity.is_finite() && self.acceleration.is_finite()
    }

    /// Constant-acceleration position after `dt` seconds.
    pub fn extrapolated_position(&self, dt: f32) -> Vec3 {
        self.position + self.velocity * dt + self.acceleration * (0.5 * dt * dt)
    }

    /// Integrates position and velocity forward by `dt` in place.
    pub fn integrate(&mut self, dt: f32) {
        self.position = self.extrapolated_position(dt);
        self.velocity += self.acceleration * dt;
    }
}

impl fmt::Display for KinematicState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Acceleration is reported as a signed magnitude, sign taken from X.
        let accel = self.acceleration.length() * sign(self.acceleration.x);
        write!(
            f,
            "Position: {} Velocity: {} [{:.2}] Acceleration: {:.2}",
            self.position,
            self.velocity,
            self.velocity.length(),
            accel
        )
    }
}

fn sign(v: f32) -> f32 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Encodes a state into its fixed 36-byte layout.
pub fn encode(state: &KinematicState) -> Bytes {
    let mut buf = BytesMut::with_capacity(ENCODED_LEN);
    for v in [state.position, state.velocity, state.acceleration] {
        buf.put_f32_le(v.x);
        buf.put_f32_le(v.y);
        buf.put_f32_le(v.z);
    }
    buf.freeze()
}

/// Decodes a state previously produced by [`encode`].
///
/// Fails on a length mismatch or on any non-finite component.
pub fn decode(mut b: &[u8]) -> anyhow::Result<KinematicState> {
    if b.len() != ENCODED_LEN {
        bail!(
            "kinematic state must be {ENCODED_LEN} bytes, got {}",
            b.len()
        );
    }
    let mut read_vec = || Vec3::new(b.get_f32_le(), b.get_f32_le(), b.get_f32_le());
    let position = read_vec();
    let velocity = read_vec();
    let acceleration = read_vec();
    let state = KinematicState::new(position, velocity, acceleration);
    ensure!(state.is_finite(), "kinematic state has non-finite component");
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_is_fixed_little_endian_layout() {
        let state = KinematicState::new(
            Vec3::new(1.0, 2.0, 3.0),
            Vec3::new(-4.0, 0.5, 0.0),
            Vec3::new(0.0, 0.0, -9.81),
        );
        let bytes = encode(&state);
        assert_eq!(bytes.len(), ENCODED_LEN);
        assert_eq!(&bytes[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[12..16], &(-4.0f32).to_le_bytes());
        assert_eq!(&bytes[32..36], &(-9.81f32).to_le_bytes());
        assert_eq!(decode(&bytes).unwrap(), state);
    }

    #[test]
    fn decode_rejects_short_buffer() {
        let bytes = encode(&KinematicState::default());
        let err = decode(&bytes[..20]).unwrap_err();
        assert!(err.to_string().contains("36 bytes"));
    }

    #[test]
    fn decode_rejects_nan() {
        let mut raw = encode(&KinematicState::default()).to_vec();
        raw[4..8].copy_from_slice(&f32::NAN.to_le_bytes());
        assert!(decode(&raw).is_err());
    }

    #[test]
    fn integrate_applies_constant_acceleration() {
        let mut s =
            KinematicState::new(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), Vec3::new(2.0, 0.0, 0.0));
        s.integrate(1.0);
        assert_eq!(s.position, Vec3::new(2.0, 0.0, 0.0));
        assert_eq!(s.velocity, Vec3::new(3.0, 0.0, 0.0));
    }

    #[test]
    fn display_reports_signed_acceleration() {
        let s =
            KinematicState::new(Vec3::ZERO, Vec3::new(3.0, 4.0, 0.0), Vec3::new(-2.0, 0.0, 0.0));
        let text = s.to_string();
        assert!(text.contains("[5.00]"), "{text}");
        assert!(text.ends_with("Acceleration: -2.00"), "{text}");
    }
}
