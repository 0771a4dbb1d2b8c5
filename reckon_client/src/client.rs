//! Client implementation.
//!
//! The client maintains:
//! - The receiving end of the replication link
//! - A dead-reckoning estimator for the replicated entity
//! - Sequence tracking so stale or duplicated frames are dropped
//! - A short window of rendered travel for the HUD speed readout

use chrono::{DateTime, Utc};
use reckon_shared::{
    collector::{ChangeCollector, Stamp},
    config::{EstimatorConfig, WorldSettings},
    kinematics::KinematicState,
    net::{LinkReceiver, ReplicationFrame},
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    estimator::{DeadReckoningEstimator, UpdateOutcome},
    hud,
};

/// Seconds of rendered motion behind the speed readout.
const SPEED_WINDOW_SECS: f64 = 1.0;

/// Counters for what arrived over the link.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClientStats {
    pub frames: u32,
    pub accepted: u32,
    /// Sequence number not newer than the last accepted one.
    pub stale: u32,
    /// Failed to decode.
    pub malformed: u32,
    /// Decoded but refused by the estimator.
    pub rejected: u32,
}

/// High-level replica of one server-driven entity.
pub struct ReplicaClient<S = DateTime<Utc>> {
    settings: WorldSettings,
    estimator: DeadReckoningEstimator<S>,
    link: LinkReceiver,
    last_seq: Option<u32>,
    tick: u32,
    odometer: f64,
    speed: ChangeCollector<S>,
    stats: ClientStats,
}

impl<S: Stamp> ReplicaClient<S> {
    pub fn new(
        settings: WorldSettings,
        config: EstimatorConfig,
        link: LinkReceiver,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        info!(hud = %hud::motion_info_text(&settings), "Client created");
        Ok(Self {
            settings,
            estimator: DeadReckoningEstimator::new(config),
            link,
            last_seq: None,
            tick: 0,
            odometer: 0.0,
            speed: ChangeCollector::difference(SPEED_WINDOW_SECS),
            stats: ClientStats::default(),
        })
    }

    /// Places the entity at its spawn state.
    pub fn on_spawn(&mut self, state: KinematicState, now: S) {
        self.estimator.on_spawn(state);
        self.odometer = 0.0;
        self.speed.clear();
        self.speed.add(now, self.odometer);
        info!(position = %state.position, "Replica spawned");
    }

    /// Handles one datagram that arrived at `arrival`.
    pub fn receive(&mut self, datagram: &[u8], arrival: S) -> Option<UpdateOutcome> {
        self.stats.frames += 1;
        let frame = match ReplicationFrame::from_bytes(datagram) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "Dropping malformed frame");
                self.stats.malformed += 1;
                return None;
            }
        };

        if self.last_seq.is_some_and(|last| frame.seq <= last) {
            debug!(seq = frame.seq, last = ?self.last_seq, "Dropping stale frame");
            self.stats.stale += 1;
            return None;
        }

        let outcome = self.estimator.on_authoritative_update(frame.state, arrival);
        match outcome {
            UpdateOutcome::Accepted => {
                self.last_seq = Some(frame.seq);
                self.stats.accepted += 1;
                debug!(
                    seq = frame.seq,
                    server_time = frame.server_time,
                    hud = %hud::average_update_time_text(self.estimator.average_update_interval()),
                    "Frame applied"
                );
            }
            UpdateOutcome::OutOfOrder | UpdateOutcome::NonFinite => {
                self.stats.rejected += 1;
            }
        }
        Some(outcome)
    }

    /// Drains every datagram the link has delivered by `now`.
    pub fn pump(&mut self, now: Instant, arrival: S) -> usize {
        let ready = self.link.poll(now);
        for datagram in &ready {
            self.receive(datagram, arrival);
        }
        ready.len()
    }

    /// Receives whatever the link has delivered by `deliver_by`, then advances
    /// the prediction by `dt`. `now` stamps both the arrivals and the tick.
    pub fn on_tick(&mut self, dt: f32, deliver_by: Instant, now: S) -> KinematicState {
        self.pump(deliver_by, now);
        self.advance(dt, now)
    }

    /// Advances the prediction by `dt` without touching the link.
    pub fn advance(&mut self, dt: f32, now: S) -> KinematicState {
        let before = self.estimator.predicted().position;
        let state = self.estimator.on_tick(dt);
        self.odometer += state.position.distance(before) as f64;
        self.speed.add(now, self.odometer);
        self.tick += 1;
        state
    }

    /// Lines for the on-screen overlay.
    pub fn hud_lines(&self) -> Vec<String> {
        vec![
            hud::motion_info_text(&self.settings),
            hud::average_update_time_text(self.estimator.average_update_interval()),
            hud::rendered_speed_text(self.rendered_speed()),
        ]
    }

    /// Rendered distance per second over the last second of ticks.
    pub fn rendered_speed(&self) -> f64 {
        self.speed.rate()
    }

    pub fn estimator(&self) -> &DeadReckoningEstimator<S> {
        &self.estimator
    }

    pub fn predicted(&self) -> &KinematicState {
        self.estimator.predicted()
    }

    pub fn stats(&self) -> ClientStats {
        self.stats
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    /// True once the server side is gone and nothing is left in flight.
    pub fn link_drained(&mut self) -> bool {
        self.link.is_drained()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reckon_shared::{config::LinkConfig, math::Vec3, net::loopback};
    use tokio::time::Duration;

    fn frame(seq: u32, x: f32) -> bytes::Bytes {
        ReplicationFrame {
            seq,
            server_time: seq as f64,
            state: KinematicState::new(
                Vec3::new(x, 0.0, 0.0),
                Vec3::new(10.0, 0.0, 0.0),
                Vec3::ZERO,
            ),
        }
        .to_bytes()
    }

    fn client() -> (reckon_shared::net::LinkSender, ReplicaClient<f64>) {
        let (tx, rx) = loopback(&LinkConfig {
            latency_ms: 0,
            jitter_ms: 0,
            seed: 0,
        });
        let mut c =
            ReplicaClient::new(WorldSettings::default(), EstimatorConfig::default(), rx).unwrap();
        c.on_spawn(KinematicState::at_rest(Vec3::ZERO), 0.0);
        (tx, c)
    }

    #[test]
    fn stale_and_malformed_frames_are_counted() {
        let (_tx, mut c) = client();
        assert_eq!(c.receive(&frame(2, 1.0), 0.1), Some(UpdateOutcome::Accepted));
        assert_eq!(c.receive(&frame(2, 5.0), 0.2), None);
        assert_eq!(c.receive(&frame(1, 5.0), 0.3), None);
        assert_eq!(c.receive(&[1, 2, 3], 0.4), None);
        assert_eq!(c.receive(&frame(3, 2.0), 0.5), Some(UpdateOutcome::Accepted));

        let stats = c.stats();
        assert_eq!(stats.frames, 5);
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.stale, 2);
        assert_eq!(stats.malformed, 1);
        assert_eq!(c.estimator().authoritative().position.x, 2.0);
    }

    #[tokio::test]
    async fn pump_applies_delivered_frames() {
        let (mut tx, mut c) = client();
        let now = Instant::now();
        tx.send_at(frame(0, 0.0), now).unwrap();
        tx.send_at(frame(1, 1.0), now).unwrap();
        assert_eq!(c.pump(now, 0.05), 2);
        assert_eq!(c.stats().accepted, 2);
        assert_eq!(c.estimator().authoritative().position.x, 1.0);
    }

    #[tokio::test]
    async fn on_tick_delivers_on_the_callers_clock() {
        let (mut tx, rx) = loopback(&LinkConfig {
            latency_ms: 100,
            jitter_ms: 0,
            seed: 0,
        });
        let mut c =
            ReplicaClient::new(WorldSettings::default(), EstimatorConfig::default(), rx).unwrap();
        c.on_spawn(KinematicState::at_rest(Vec3::ZERO), 0.0);

        let base = Instant::now();
        tx.send_at(frame(1, 4.0), base).unwrap();

        c.on_tick(0.05, base + Duration::from_millis(50), 0.05);
        assert_eq!(c.stats().frames, 0);

        c.on_tick(0.05, base + Duration::from_millis(100), 0.10);
        assert_eq!(c.stats().accepted, 1);
        assert_eq!(c.estimator().elapsed(), 0.05);
        assert_eq!(c.tick(), 2);
    }

    #[test]
    fn rendered_speed_follows_motion() {
        let (_tx, mut c) = client();
        c.receive(&frame(0, 0.0), 0.0);
        let mut t = 0.0;
        for _ in 0..60 {
            t += 1.0 / 60.0;
            c.advance(1.0 / 60.0, t);
        }
        // Entity moves at 10 units/s once converged.
        assert!((c.rendered_speed() - 10.0).abs() < 0.5, "{}", c.rendered_speed());
        assert_eq!(c.hud_lines().len(), 3);
        assert_eq!(c.tick(), 60);
    }
}
