//! Replication frames and the simulated loopback link.
//!
//! Goals:
//! - Keep the wire form explicit: a frame is a small fixed header followed by
//!   the encoded [`KinematicState`].
//! - Provide an in-process link with configurable latency and jitter so the
//!   server and client tasks can be exercised without sockets.
//!
//! The link preserves send order. A frame is never delivered before a frame
//! sent earlier, even when jitter would say otherwise.

use std::collections::VecDeque;

use anyhow::{ensure, Context};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::{
    sync::mpsc,
    time::{self, Duration, Instant},
};

use crate::{
    config::LinkConfig,
    kinematics::{self, KinematicState, ENCODED_LEN},
};

/// Frame header: sequence number (`u32`) and server time (`f64`), little-endian.
pub const FRAME_HEADER_LEN: usize = 4 + 8;

/// One replicated snapshot as it travels from server to client.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationFrame {
    /// Increments by one per frame. The spawn frame is 0.
    pub seq: u32,
    /// Server simulation time at which the snapshot was taken, seconds.
    pub server_time: f64,
    pub state: KinematicState,
}

impl ReplicationFrame {
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + ENCODED_LEN);
        buf.put_u32_le(self.seq);
        buf.put_f64_le(self.server_time);
        buf.extend_from_slice(&kinematics::encode(&self.state));
        buf.freeze()
    }

    pub fn from_bytes(mut b: &[u8]) -> anyhow::Result<Self> {
        ensure!(
            b.len() == FRAME_HEADER_LEN + ENCODED_LEN,
            "replication frame must be {} bytes, got {}",
            FRAME_HEADER_LEN + ENCODED_LEN,
            b.len()
        );
        let seq = b.get_u32_le();
        let server_time = b.get_f64_le();
        let state = kinematics::decode(b).context("frame payload")?;
        Ok(Self {
            seq,
            server_time,
            state,
        })
    }
}

struct InFlight {
    deliver_at: Instant,
    datagram: Bytes,
}

/// Creates a connected sender/receiver pair.
pub fn loopback(cfg: &LinkConfig) -> (LinkSender, LinkReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        LinkSender {
            tx,
            latency: Duration::from_millis(cfg.latency_ms),
            jitter_ms: cfg.jitter_ms,
            rng: StdRng::seed_from_u64(cfg.seed),
            last_deliver_at: None,
        },
        LinkReceiver {
            rx,
            pending: VecDeque::new(),
            closed: false,
        },
    )
}

/// Server end of the link.
pub struct LinkSender {
    tx: mpsc::UnboundedSender<InFlight>,
    latency: Duration,
    jitter_ms: u64,
    rng: StdRng,
    last_deliver_at: Option<Instant>,
}

impl LinkSender {
    /// Sends a datagram stamped with the current time.
    pub fn send(&mut self, datagram: Bytes) -> anyhow::Result<()> {
        self.send_at(datagram, Instant::now())
    }

    /// Sends a datagram as if it left at `now`.
    pub fn send_at(&mut self, datagram: Bytes, now: Instant) -> anyhow::Result<()> {
        let mut deliver_at = now + self.delay();
        if let Some(prev) = self.last_deliver_at {
            deliver_at = deliver_at.max(prev);
        }
        self.last_deliver_at = Some(deliver_at);
        self.tx
            .send(InFlight {
                deliver_at,
                datagram,
            })
            .ok()
            .context("link receiver dropped")
    }

    fn delay(&mut self) -> Duration {
        if self.jitter_ms == 0 {
            return self.latency;
        }
        let j = self.jitter_ms as i64;
        let offset = self.rng.gen_range(-j..=j);
        let ms = (self.latency.as_millis() as i64 + offset).max(0) as u64;
        Duration::from_millis(ms)
    }
}

/// Client end of the link.
pub struct LinkReceiver {
    rx: mpsc::UnboundedReceiver<InFlight>,
    pending: VecDeque<InFlight>,
    closed: bool,
}

impl LinkReceiver {
    /// Returns every datagram due at or before `now`, oldest first.
    pub fn poll(&mut self, now: Instant) -> Vec<Bytes> {
        self.pull();
        let mut ready = Vec::new();
        while self.pending.front().is_some_and(|f| f.deliver_at <= now) {
            if let Some(f) = self.pending.pop_front() {
                ready.push(f.datagram);
            }
        }
        ready
    }

    /// Waits for the next datagram. Returns `None` once the sender is gone and
    /// nothing is left in flight.
    pub async fn recv(&mut self) -> Option<Bytes> {
        if self.pending.is_empty() && !self.closed {
            match self.rx.recv().await {
                Some(f) => self.pending.push_back(f),
                None => self.closed = true,
            }
        }
        let next = self.pending.pop_front()?;
        time::sleep_until(next.deliver_at).await;
        Some(next.datagram)
    }

    /// True once the sender is dropped and every datagram has been handed out.
    pub fn is_drained(&mut self) -> bool {
        self.pull();
        self.closed && self.pending.is_empty()
    }

    fn pull(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(f) => self.pending.push_back(f),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.closed = true;
                    break;
                }
            }
        }
    }
}
