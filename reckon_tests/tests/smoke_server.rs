use reckon_server::ReplicationServer;
use reckon_shared::{
    config::{LinkConfig, WorldSettings},
    math::Vec3,
    net::{loopback, ReplicationFrame},
};

/// Smoke test: server can run a few ticks and publishes its spawn frame.
#[tokio::test]
async fn server_runs_few_ticks() -> anyhow::Result<()> {
    let (mut tx, mut rx) = loopback(&LinkConfig {
        latency_ms: 0,
        jitter_ms: 0,
        seed: 0,
    });
    let mut server = ReplicationServer::new(WorldSettings::default(), Vec3::ZERO)?;
    server.run_for_ticks(3, 64, &mut tx).await?;
    drop(tx);

    assert_eq!(server.tick(), 3);
    let first = rx.recv().await.expect("spawn frame");
    assert_eq!(ReplicationFrame::from_bytes(&first)?.seq, 0);
    Ok(())
}
