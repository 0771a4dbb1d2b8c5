//! Server implementation.
//!
//! An authoritative, fixed-timestep loop over one mover. Every tick the
//! mover's true motion advances; a frame is published only when the
//! replication gate fires.
//!
//! Determinism notes:
//! - Keep simulation in a fixed timestep.
//! - Sim time is the sum of tick deltas, never read from the wall clock.

use anyhow::Context;
use reckon_shared::{
    config::{MotionShape, WorldSettings},
    kinematics::KinematicState,
    math::Vec3,
    net::{LinkSender, ReplicationFrame},
};
use tokio::time::{Duration, Instant};
use tracing::{debug, info};

use crate::motion::{mover_for, ReplicationGate};

/// Authoritative side of one replicated entity.
pub struct ReplicationServer {
    gate: Box<dyn ReplicationGate>,
    tick: u32,
    /// Simulation time in seconds.
    time: f64,
    next_seq: u32,
}

impl ReplicationServer {
    /// Creates a server whose mover is placed relative to `spawn`.
    pub fn new(settings: WorldSettings, spawn: Vec3) -> anyhow::Result<Self> {
        settings.validate().context("world settings")?;
        let gate = mover_for(&settings, spawn);
        info!(
            shape = ?settings.shape,
            threshold = gate.threshold(),
            lap_time = settings.lap_time(),
            position = %gate.position(),
            "Mover spawned"
        );
        Ok(Self::with_gate(gate))
    }

    /// Creates a server around an existing gate.
    pub fn with_gate(gate: Box<dyn ReplicationGate>) -> Self {
        Self {
            gate,
            tick: 0,
            time: 0.0,
            next_seq: 0,
        }
    }

    /// Initial snapshot: the spawn state, published once before any tick.
    pub fn on_spawn(&mut self) -> ReplicationFrame {
        let state = *self.gate.last_replicated();
        self.frame(state)
    }

    /// Executes one fixed simulation step.
    pub fn on_tick(&mut self, dt: f32) -> Option<ReplicationFrame> {
        self.tick += 1;
        self.time += dt as f64;
        let state = self.gate.advance(dt)?;
        let frame = self.frame(state);
        debug!(
            seq = frame.seq,
            tick = self.tick,
            time = self.time,
            position = %state.position,
            "Replicating"
        );
        Some(frame)
    }

    fn frame(&mut self, state: KinematicState) -> ReplicationFrame {
        let seq = self.next_seq;
        self.next_seq += 1;
        ReplicationFrame {
            seq,
            server_time: self.time,
            state,
        }
    }

    /// Runs the server for a number of ticks, pushing frames into `link`.
    ///
    /// Publishes the spawn frame first when nothing has been sent yet.
    pub async fn run_for_ticks(
        &mut self,
        ticks: u32,
        tick_hz: u32,
        link: &mut LinkSender,
    ) -> anyhow::Result<()> {
        let dt = Duration::from_secs_f32(1.0 / tick_hz as f32);
        if self.next_seq == 0 {
            link.send(self.on_spawn().to_bytes())?;
        }

        let mut next = Instant::now();
        for _ in 0..ticks {
            next += dt;
            if let Some(frame) = self.on_tick(dt.as_secs_f32()) {
                link.send(frame.to_bytes()).context("publish frame")?;
            }
            tokio::time::sleep_until(next).await;
        }
        info!(
            ticks = self.tick,
            replications = self.replications(),
            "Server run finished"
        );
        Ok(())
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn shape(&self) -> MotionShape {
        self.gate.shape()
    }

    /// True position of the mover.
    pub fn position(&self) -> Vec3 {
        self.gate.position()
    }

    pub fn last_replicated(&self) -> &KinematicState {
        self.gate.last_replicated()
    }

    /// Frames published so far, including the spawn frame.
    pub fn replications(&self) -> u32 {
        self.next_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_settings() -> WorldSettings {
        WorldSettings {
            shape: MotionShape::Square,
            speed: 200.0,
            side_length: 300.0,
            square_replication_dist: Some(50.0),
            ..WorldSettings::default()
        }
    }

    #[test]
    fn spawn_frame_comes_first() {
        let mut server =
            ReplicationServer::new(square_settings(), Vec3::new(150.0, 150.0, 0.0)).unwrap();
        let spawn = server.on_spawn();
        assert_eq!(spawn.seq, 0);
        assert_eq!(spawn.server_time, 0.0);
        assert_eq!(spawn.state, KinematicState::at_rest(Vec3::ZERO));
    }

    #[test]
    fn frames_only_on_gate_and_sequenced() {
        let mut server =
            ReplicationServer::new(square_settings(), Vec3::new(150.0, 150.0, 0.0)).unwrap();
        server.on_spawn();
        let published: Vec<_> = (0..9).filter_map(|_| server.on_tick(0.1)).collect();
        // Drift crosses 50 every third tick.
        assert_eq!(published.len(), 3);
        let seqs: Vec<u32> = published.iter().map(|f| f.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!((published[0].server_time - 0.3).abs() < 1e-6);
        assert_eq!(server.tick(), 9);
        assert_eq!(server.replications(), 4);
    }

    /// Fires on every `every`-th tick and moves one unit per tick along X.
    struct EveryNth {
        every: u32,
        ticks: u32,
        position: Vec3,
        last: KinematicState,
    }

    impl ReplicationGate for EveryNth {
        fn shape(&self) -> MotionShape {
            MotionShape::Square
        }

        fn advance(&mut self, _dt: f32) -> Option<KinematicState> {
            self.ticks += 1;
            self.position += Vec3::new(1.0, 0.0, 0.0);
            if self.ticks % self.every != 0 {
                return None;
            }
            self.last = KinematicState::at_rest(self.position);
            Some(self.last)
        }

        fn position(&self) -> Vec3 {
            self.position
        }

        fn velocity(&self) -> Vec3 {
            Vec3::ZERO
        }

        fn last_replicated(&self) -> &KinematicState {
            &self.last
        }

        fn threshold(&self) -> f32 {
            self.every as f32
        }
    }

    #[test]
    fn custom_gate_drives_publication() {
        let mut server = ReplicationServer::with_gate(Box::new(EveryNth {
            every: 2,
            ticks: 0,
            position: Vec3::ZERO,
            last: KinematicState::at_rest(Vec3::ZERO),
        }));
        assert_eq!(server.on_spawn().state.position, Vec3::ZERO);

        let seqs: Vec<u32> = (0..6).filter_map(|_| server.on_tick(0.5)).map(|f| f.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(server.position(), Vec3::new(6.0, 0.0, 0.0));
        assert_eq!(server.last_replicated().position, Vec3::new(6.0, 0.0, 0.0));
        assert!((server.time() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let settings = WorldSettings {
            radius: -1.0,
            ..WorldSettings::default()
        };
        let err = ReplicationServer::new(settings, Vec3::ZERO).err().unwrap();
        assert!(format!("{err:#}").contains("radius"));
    }
}
