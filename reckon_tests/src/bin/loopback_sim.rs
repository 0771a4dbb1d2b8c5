//! Loopback simulation runner.
//!
//! Usage:
//!   cargo run -p reckon_tests --bin loopback_sim -- [--config sim.json]
//!       [--shape circle|square] [--duration 5] [--latency 50] [--jitter 10]
//!       [--seed 7] [--max-blend 1.2] [--lockstep] [--json report.json]
//!
//! Runs one server-driven entity through the dead-reckoning pipeline and
//! prints the HUD lines and error statistics. Flags override values loaded
//! from `--config`.

use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context};
use reckon_shared::config::{MotionShape, SimConfig};
use reckon_tests::{run_lockstep, run_realtime};
use tracing::info;

struct Args {
    cfg: SimConfig,
    lockstep: bool,
    json: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = env::args().collect();

    // Config file first so flags can override it.
    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = args.get(i + 1).context("--config needs a path")?;
            SimConfig::load(&PathBuf::from(path))?
        }
        None => SimConfig::default(),
    };

    let mut lockstep = false;
    let mut json = None;
    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--config", Some(_)) => i += 2,
            ("--shape", Some(v)) => {
                cfg.world.shape = match v.as_str() {
                    "circle" => MotionShape::Circle,
                    "square" => MotionShape::Square,
                    other => bail!("unknown shape {other:?}, expected circle or square"),
                };
                i += 2;
            }
            ("--duration", Some(v)) => {
                cfg.duration_secs = v.parse().context("--duration")?;
                i += 2;
            }
            ("--latency", Some(v)) => {
                cfg.link.latency_ms = v.parse().context("--latency")?;
                i += 2;
            }
            ("--jitter", Some(v)) => {
                cfg.link.jitter_ms = v.parse().context("--jitter")?;
                i += 2;
            }
            ("--seed", Some(v)) => {
                cfg.link.seed = v.parse().context("--seed")?;
                i += 2;
            }
            ("--max-blend", Some(v)) => {
                cfg.estimator.max_blend = v.parse().context("--max-blend")?;
                i += 2;
            }
            ("--json", Some(v)) => {
                json = Some(PathBuf::from(v));
                i += 2;
            }
            ("--lockstep", _) => {
                lockstep = true;
                i += 1;
            }
            _ => i += 1,
        }
    }
    Ok(Args {
        cfg,
        lockstep,
        json,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let Args {
        cfg,
        lockstep,
        json,
    } = parse_args()?;
    cfg.validate().context("invalid configuration")?;
    info!(
        shape = ?cfg.world.shape,
        duration = cfg.duration_secs,
        latency_ms = cfg.link.latency_ms,
        jitter_ms = cfg.link.jitter_ms,
        lockstep,
        "Starting loopback run"
    );

    let report = if lockstep {
        run_lockstep(&cfg)?
    } else {
        run_realtime(&cfg).await?
    };

    for line in &report.hud {
        println!("{}", line);
    }
    println!();
    println!("Lap time:      {:.2}s", report.lap_time);
    println!("Replications:  {}", report.replications);
    println!(
        "Frames:        {} accepted, {} dropped",
        report.frames_accepted, report.frames_dropped
    );
    println!(
        "Error:         mean {:.2}, max {:.2}, last {:.2} ({} samples)",
        report.error.mean, report.error.max, report.error.last, report.error.samples
    );

    if let Some(path) = json {
        let text = serde_json::to_string_pretty(&report).context("serialize report")?;
        std::fs::write(&path, text).with_context(|| format!("write {}", path.display()))?;
        info!(path = %path.display(), "Report written");
    }

    Ok(())
}
