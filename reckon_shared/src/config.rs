//! Configuration system.
//!
//! Loads simulation configuration from JSON strings/files (file IO left to
//! app). Everything the core divides by is checked here, at the boundary;
//! the core itself assumes validated input.

use anyhow::{ensure, Context};
use serde::{Deserialize, Serialize};

/// Which path the server-side mover follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionShape {
    Circle,
    Square,
}

/// Motion and replication settings for one world.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorldSettings {
    /// Seconds of motion the server lets accumulate before replicating.
    #[serde(default = "default_replication_time")]
    pub replication_time: f32,
    #[serde(default = "default_shape")]
    pub shape: MotionShape,
    /// Circle radius.
    #[serde(default = "default_radius")]
    pub radius: f32,
    /// Yaw rate of the circular mover, degrees per second.
    #[serde(default = "default_angular_speed")]
    pub angular_speed_deg: f32,
    /// Side length of the square path.
    #[serde(default = "default_side_length")]
    pub side_length: f32,
    /// Linear speed of the square mover.
    #[serde(default = "default_speed")]
    pub speed: f32,
    /// Arc-length threshold; derived from `replication_time` when unset.
    #[serde(default)]
    pub circle_replication_dist: Option<f32>,
    /// Straight-line threshold; derived from `replication_time` when unset.
    #[serde(default)]
    pub square_replication_dist: Option<f32>,
}

fn default_replication_time() -> f32 {
    0.5
}

fn default_shape() -> MotionShape {
    MotionShape::Circle
}

fn default_radius() -> f32 {
    300.0
}

fn default_angular_speed() -> f32 {
    90.0
}

fn default_side_length() -> f32 {
    300.0
}

fn default_speed() -> f32 {
    200.0
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            replication_time: default_replication_time(),
            shape: default_shape(),
            radius: default_radius(),
            angular_speed_deg: default_angular_speed(),
            side_length: default_side_length(),
            speed: default_speed(),
            circle_replication_dist: None,
            square_replication_dist: None,
        }
    }
}

impl WorldSettings {
    /// Parses settings from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Arc length the circular mover may drift before replicating.
    pub fn circle_replication_dist(&self) -> f32 {
        self.circle_replication_dist.unwrap_or_else(|| {
            self.replication_time * self.angular_speed_deg.to_radians() * self.radius
        })
    }

    /// Distance the square mover may drift before replicating.
    pub fn square_replication_dist(&self) -> f32 {
        self.square_replication_dist
            .unwrap_or(self.speed * self.replication_time)
    }

    /// Seconds for one full lap of the configured shape.
    pub fn lap_time(&self) -> f32 {
        match self.shape {
            MotionShape::Circle => 360.0 / self.angular_speed_deg,
            MotionShape::Square => 4.0 * self.side_length / self.speed,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.replication_time > 0.0,
            "replication_time must be positive, got {}",
            self.replication_time
        );
        match self.shape {
            MotionShape::Circle => {
                ensure!(self.radius > 0.0, "radius must be positive, got {}", self.radius);
                ensure!(
                    self.angular_speed_deg > 0.0,
                    "angular_speed_deg must be positive, got {}",
                    self.angular_speed_deg
                );
            }
            MotionShape::Square => {
                ensure!(
                    self.side_length > 0.0,
                    "side_length must be positive, got {}",
                    self.side_length
                );
                ensure!(self.speed > 0.0, "speed must be positive, got {}", self.speed);
            }
        }
        for (name, dist) in [
            ("circle_replication_dist", self.circle_replication_dist),
            ("square_replication_dist", self.square_replication_dist),
        ] {
            if let Some(d) = dist {
                ensure!(d > 0.0, "{name} must be positive, got {d}");
            }
        }
        Ok(())
    }
}

/// Client-side dead-reckoning tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EstimatorConfig {
    /// Ceiling for the blend factor. Values above 1 allow overshoot past the
    /// expected next update.
    #[serde(default = "default_max_blend")]
    pub max_blend: f32,
    /// Update interval assumed until the collector has measured one.
    #[serde(default = "default_update_interval")]
    pub default_update_interval: f32,
    /// Span of the arrival-time window, seconds.
    #[serde(default = "default_window_span")]
    pub window_span: f64,
    /// Arrival gap that restarts the window, seconds.
    #[serde(default = "default_drop_threshold")]
    pub drop_threshold: f64,
}

fn default_max_blend() -> f32 {
    1.2
}

fn default_update_interval() -> f32 {
    // 100 Hz net update frequency.
    0.01
}

fn default_window_span() -> f64 {
    1.0
}

fn default_drop_threshold() -> f64 {
    1.0
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            max_blend: default_max_blend(),
            default_update_interval: default_update_interval(),
            window_span: default_window_span(),
            drop_threshold: default_drop_threshold(),
        }
    }
}

impl EstimatorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.max_blend > 0.0, "max_blend must be positive, got {}", self.max_blend);
        ensure!(
            self.default_update_interval > 0.0,
            "default_update_interval must be positive, got {}",
            self.default_update_interval
        );
        ensure!(self.window_span > 0.0, "window_span must be positive");
        ensure!(self.drop_threshold > 0.0, "drop_threshold must be positive");
        Ok(())
    }
}

/// Simulated link between the server and client tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkConfig {
    /// One-way delay, milliseconds.
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,
    /// Uniform jitter added to or taken from the delay, milliseconds.
    #[serde(default)]
    pub jitter_ms: u64,
    /// Seed for the jitter generator.
    #[serde(default)]
    pub seed: u64,
}

fn default_latency_ms() -> u64 {
    50
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            latency_ms: default_latency_ms(),
            jitter_ms: 0,
            seed: 0,
        }
    }
}

/// Root configuration for a loopback run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimConfig {
    /// Server simulation tick rate.
    #[serde(default = "default_server_tick_hz")]
    pub server_tick_hz: u32,
    /// Client render tick rate.
    #[serde(default = "default_client_tick_hz")]
    pub client_tick_hz: u32,
    /// Run length in seconds.
    #[serde(default = "default_duration_secs")]
    pub duration_secs: f32,
    #[serde(default)]
    pub world: WorldSettings,
    #[serde(default)]
    pub estimator: EstimatorConfig,
    #[serde(default)]
    pub link: LinkConfig,
}

fn default_server_tick_hz() -> u32 {
    64
}

fn default_client_tick_hz() -> u32 {
    60
}

fn default_duration_secs() -> f32 {
    5.0
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            server_tick_hz: default_server_tick_hz(),
            client_tick_hz: default_client_tick_hz(),
            duration_secs: default_duration_secs(),
            world: WorldSettings::default(),
            estimator: EstimatorConfig::default(),
            link: LinkConfig::default(),
        }
    }
}

impl SimConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.server_tick_hz > 0, "server_tick_hz must be positive");
        ensure!(self.client_tick_hz > 0, "client_tick_hz must be positive");
        ensure!(
            self.duration_secs > 0.0,
            "duration_secs must be positive, got {}",
            self.duration_secs
        );
        ensure!(
            self.link.jitter_ms <= self.link.latency_ms,
            "jitter_ms ({}) cannot exceed latency_ms ({})",
            self.link.jitter_ms,
            self.link.latency_ms
        );
        self.world.validate().context("world settings")?;
        self.estimator.validate().context("estimator config")?;
        Ok(())
    }

    pub fn server_dt(&self) -> f32 {
        1.0 / self.server_tick_hz as f32
    }

    pub fn client_dt(&self) -> f32 {
        1.0 / self.client_tick_hz as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_derive_from_replication_time() {
        let w = WorldSettings::default();
        assert!((w.square_replication_dist() - 100.0).abs() < 1e-4);
        let arc = 0.5 * std::f32::consts::FRAC_PI_2 * 300.0;
        assert!((w.circle_replication_dist() - arc).abs() < 1e-3);
        assert!((w.lap_time() - 4.0).abs() < 1e-6);
    }

    #[test]
    fn explicit_threshold_overrides_derived() {
        let w = WorldSettings {
            square_replication_dist: Some(50.0),
            ..WorldSettings::default()
        };
        assert_eq!(w.square_replication_dist(), 50.0);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = SimConfig::from_json_str(
            r#"{ "server_tick_hz": 30, "world": { "shape": "square", "speed": 150.0 } }"#,
        )
        .unwrap();
        assert_eq!(cfg.server_tick_hz, 30);
        assert_eq!(cfg.client_tick_hz, 60);
        assert_eq!(cfg.world.shape, MotionShape::Square);
        assert_eq!(cfg.world.speed, 150.0);
        assert_eq!(cfg.world.side_length, 300.0);
        assert_eq!(cfg.estimator, EstimatorConfig::default());
        cfg.validate().unwrap();
    }

    #[test]
    fn zero_speed_is_rejected_for_square() {
        let cfg = SimConfig {
            world: WorldSettings {
                shape: MotionShape::Square,
                speed: 0.0,
                ..WorldSettings::default()
            },
            ..SimConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(format!("{err:#}").contains("speed must be positive"));
    }

    #[test]
    fn jitter_bounded_by_latency() {
        let cfg = SimConfig {
            link: LinkConfig {
                latency_ms: 10,
                jitter_ms: 20,
                seed: 1,
            },
            ..SimConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
