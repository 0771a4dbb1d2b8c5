//! Loopback harness.
//!
//! Plays the part of the host engine: spawns one server-driven entity, runs
//! the server and client at their own tick rates, carries frames over the
//! simulated link, and measures how far the rendered replica strays from the
//! server's true position.
//!
//! Two drivers share the same pieces:
//! - [`run_lockstep`] steps both sides on a virtual clock. Deterministic and
//!   fast; used by the tests.
//! - [`run_realtime`] runs the server as a tokio task against the wall clock,
//!   the way a live session would.

use anyhow::Context;
use chrono::{DateTime, Utc};
use reckon_client::ReplicaClient;
use reckon_server::ReplicationServer;
use reckon_shared::{
    collector::Stamp,
    config::{MotionShape, SimConfig},
    math::Vec3,
    net::loopback,
};
use serde::Serialize;
use tokio::{
    sync::watch,
    time::{Duration, Instant},
};
use tracing::info;

/// Distance between rendered and true positions over a run.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct ErrorStats {
    pub samples: u32,
    pub mean: f64,
    pub max: f64,
    pub last: f64,
    #[serde(skip)]
    sum: f64,
}

impl ErrorStats {
    pub fn record(&mut self, error: f32) {
        let e = error as f64;
        self.samples += 1;
        self.sum += e;
        self.mean = self.sum / self.samples as f64;
        self.max = self.max.max(e);
        self.last = e;
    }
}

/// Summary of one harness run.
#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    pub shape: MotionShape,
    /// Seconds for one full lap of the motion shape.
    pub lap_time: f32,
    pub server_ticks: u32,
    pub client_ticks: u32,
    /// Frames the server published, spawn frame included.
    pub replications: u32,
    pub frames_accepted: u32,
    pub frames_dropped: u32,
    pub average_update_interval: f32,
    pub error: ErrorStats,
    pub hud: Vec<String>,
}

/// Runs server and client on a shared virtual clock.
pub fn run_lockstep(cfg: &SimConfig) -> anyhow::Result<SimReport> {
    cfg.validate().context("sim config")?;

    let mut server = ReplicationServer::new(cfg.world.clone(), Vec3::ZERO)?;
    let (mut tx, rx) = loopback(&cfg.link);
    let mut client: ReplicaClient<f64> =
        ReplicaClient::new(cfg.world.clone(), cfg.estimator.clone(), rx)?;

    let base = Instant::now();
    let at = |t: f64| base + Duration::from_secs_f64(t);

    let spawn = server.on_spawn();
    client.on_spawn(spawn.state, 0.0);
    tx.send_at(spawn.to_bytes(), at(0.0))?;

    let server_dt = cfg.server_dt() as f64;
    let client_dt = cfg.client_dt() as f64;
    let end = cfg.duration_secs as f64;

    let mut truth = server.position();
    let mut error = ErrorStats::default();
    let mut next_server = server_dt;
    let mut next_client = client_dt;

    while next_client <= end {
        if next_server <= next_client {
            if let Some(frame) = server.on_tick(server_dt as f32) {
                tx.send_at(frame.to_bytes(), at(next_server))?;
            }
            truth = server.position();
            next_server += server_dt;
        } else {
            let rendered = client.on_tick(client_dt as f32, at(next_client), next_client);
            error.record(rendered.position.distance(truth));
            next_client += client_dt;
        }
    }

    Ok(summarize(cfg, &server, &client, error))
}

/// Runs the server as a tokio task on the wall clock for `cfg.duration_secs`.
pub async fn run_realtime(cfg: &SimConfig) -> anyhow::Result<SimReport> {
    cfg.validate().context("sim config")?;

    let mut server = ReplicationServer::new(cfg.world.clone(), Vec3::ZERO)?;
    let (mut tx, rx) = loopback(&cfg.link);
    let mut client: ReplicaClient<DateTime<Utc>> =
        ReplicaClient::new(cfg.world.clone(), cfg.estimator.clone(), rx)?;

    let spawn = server.on_spawn();
    client.on_spawn(spawn.state, Utc::now());
    tx.send(spawn.to_bytes())?;

    let (truth_tx, truth_rx) = watch::channel(server.position());
    let server_ticks = (cfg.duration_secs * cfg.server_tick_hz as f32).ceil() as u32;
    let server_dt = Duration::from_secs_f32(cfg.server_dt());

    let server_handle = tokio::spawn(async move {
        let mut next = Instant::now();
        for _ in 0..server_ticks {
            next += server_dt;
            if let Some(frame) = server.on_tick(server_dt.as_secs_f32()) {
                tx.send(frame.to_bytes()).context("publish frame")?;
            }
            // Receiver gone means the client loop already finished.
            let _ = truth_tx.send(server.position());
            tokio::time::sleep_until(next).await;
        }
        Ok::<_, anyhow::Error>(server)
    });

    let client_dt = Duration::from_secs_f32(cfg.client_dt());
    let mut error = ErrorStats::default();
    let mut last = Instant::now();
    let mut next = last;
    loop {
        next += client_dt;
        tokio::time::sleep_until(next).await;
        let now = Instant::now();
        let dt = (now - last).as_secs_f32();
        last = now;

        let rendered = client.on_tick(dt, now, Utc::now());
        error.record(rendered.position.distance(*truth_rx.borrow()));

        if server_handle.is_finished() && client.link_drained() {
            break;
        }
    }

    let server = server_handle.await.context("server task")??;
    let report = summarize(cfg, &server, &client, error);
    info!(
        replications = report.replications,
        accepted = report.frames_accepted,
        max_error = report.error.max,
        "Realtime run finished"
    );
    Ok(report)
}

fn summarize<S: Stamp>(
    cfg: &SimConfig,
    server: &ReplicationServer,
    client: &ReplicaClient<S>,
    error: ErrorStats,
) -> SimReport {
    let stats = client.stats();
    SimReport {
        shape: server.shape(),
        lap_time: cfg.world.lap_time(),
        server_ticks: server.tick(),
        client_ticks: client.tick(),
        replications: server.replications(),
        frames_accepted: stats.accepted,
        frames_dropped: stats.stale + stats.malformed + stats.rejected,
        average_update_interval: client.estimator().average_update_interval(),
        error,
        hud: client.hud_lines(),
    }
}
