//! Paced packet sender, one per client
//!
//! An emitter follows its client's slot in the [`RateController`]:
//!
//! - **Idle** (rate 0, or a rate too high to pace): suspended on the rate
//!   change notification, no timer running.
//! - **Sending** (rate R): one packet every `1s / R`. A rate change drops the
//!   current timer and starts a new one at the new interval straight away.
//! - **Stopped**: the shutdown token fired; the connection is closed.
//!
//! A write failure zeroes the client's rate and parks the emitter in Idle. It
//! only dials again once something sets a positive rate.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::rate::RateController;
use crate::types::ClientId;
use crate::wire::{DEFAULT_PAYLOAD, Packet};
use crate::{FleetError, Result};

/// Opens the transport an emitter writes packets to.
#[async_trait::async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Write half of the transport.
    type Stream: AsyncWrite + Unpin + Send + 'static;

    /// Open a fresh connection.
    async fn dial(&self) -> Result<Self::Stream>;
}

/// Dials the ingest server over TCP.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    addr: SocketAddr,
}

impl TcpDialer {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

#[async_trait::async_trait]
impl Dialer for TcpDialer {
    type Stream = TcpStream;

    async fn dial(&self) -> Result<TcpStream> {
        let stream = TcpStream::connect(self.addr).await.map_err(|e| {
            FleetError::connection_failed(format!("dialing ingest at {}", self.addr), e)
        })?;
        stream.set_nodelay(true).map_err(|e| {
            FleetError::connection_failed(format!("configuring socket to {}", self.addr), e)
        })?;
        Ok(stream)
    }
}

/// Lifecycle of one emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitterState {
    /// Not sending; waiting for a usable rate.
    Idle,
    /// Sending at `rate` packets per second.
    Sending { rate: u64 },
    /// Shut down. Terminal.
    Stopped,
}

/// Interval between packets at `rate` packets per second.
///
/// Returns `None` for rate 0 and for rates whose interval rounds to zero.
pub fn pacing_interval(rate: u64) -> Option<Duration> {
    if rate == 0 {
        return None;
    }
    let nanos = 1_000_000_000 / rate;
    (nanos > 0).then(|| Duration::from_nanos(nanos))
}

/// Handle to a running emitter task.
#[derive(Debug)]
pub struct EmitterHandle {
    id: ClientId,
    state: watch::Receiver<EmitterState>,
    sent: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl EmitterHandle {
    /// Client this emitter sends for.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> EmitterState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn state_changes(&self) -> watch::Receiver<EmitterState> {
        self.state.clone()
    }

    /// Packets written to the transport since the emitter started.
    pub fn packets_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Wait for the task to finish.
    pub async fn join(self) -> Result<(), tokio::task::JoinError> {
        self.task.await
    }
}

/// How a sending phase ended.
enum Pace {
    /// Desired rate changed; re-pace with the same connection.
    Changed,
    /// Transport write failed; the connection is unusable.
    Failed,
    /// Shutdown requested.
    Cancelled,
}

/// Rate-following send loop for one client.
pub struct Emitter<D: Dialer> {
    id: ClientId,
    dialer: D,
    rates: Arc<RateController>,
    cancel: CancellationToken,
    state: watch::Sender<EmitterState>,
    sent: Arc<AtomicU64>,
}

impl<D: Dialer> Emitter<D> {
    /// Spawn the emitter task for `id`.
    pub fn spawn(
        id: ClientId,
        dialer: D,
        rates: Arc<RateController>,
        cancel: CancellationToken,
    ) -> EmitterHandle {
        let (state, state_rx) = watch::channel(EmitterState::Idle);
        let sent = Arc::new(AtomicU64::new(0));
        let emitter = Self { id, dialer, rates, cancel, state, sent: Arc::clone(&sent) };

        let task = tokio::spawn(emitter.run());
        EmitterHandle { id, state: state_rx, sent, task }
    }

    async fn run(self) {
        let id = self.id;
        let frame = match Packet::new(id.get(), DEFAULT_PAYLOAD).to_bytes() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(client = %id, "cannot encode packet: {}", e);
                self.state.send_replace(EmitterState::Stopped);
                return;
            }
        };

        info!(client = %id, "emitter started");
        let mut rate_rx = self.rates.subscribe(id);
        let mut conn: Option<D::Stream> = None;

        loop {
            let rate = *rate_rx.borrow_and_update();

            let Some(period) = pacing_interval(rate) else {
                if rate > 0 {
                    warn!(client = %id, rate, "rate has no positive send interval, staying idle");
                }
                self.set_state(EmitterState::Idle);

                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    changed = rate_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                continue;
            };

            if conn.is_none() {
                let dialed = tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    dialed = self.dialer.dial() => dialed,
                };
                match dialed {
                    Ok(stream) => {
                        debug!(client = %id, "connected to ingest");
                        conn = Some(stream);
                    }
                    Err(e) => {
                        warn!(client = %id, "going idle: {}", e);
                        self.rates.set_rate(id, 0);
                        continue;
                    }
                }
            }
            let Some(stream) = conn.as_mut() else {
                continue;
            };

            match self.pace(rate, period, stream, &mut rate_rx, &frame).await {
                Pace::Changed => {}
                Pace::Failed => {
                    conn = None;
                    self.rates.set_rate(id, 0);
                }
                Pace::Cancelled => break,
            }
        }

        if let Some(mut stream) = conn {
            if let Err(e) = stream.shutdown().await {
                debug!(client = %id, "error closing connection: {}", e);
            }
        }
        self.set_state(EmitterState::Stopped);
        info!(client = %id, sent = self.sent.load(Ordering::Relaxed), "emitter stopped");
    }

    /// Send at `rate` until the desired rate changes, a write fails or shutdown.
    async fn pace(
        &self,
        rate: u64,
        period: Duration,
        stream: &mut D::Stream,
        rate_rx: &mut watch::Receiver<u64>,
        frame: &Bytes,
    ) -> Pace {
        let id = self.id;
        self.set_state(EmitterState::Sending { rate });
        info!(client = %id, rate, ?period, "pacing");

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Pace::Cancelled,
                changed = rate_rx.changed() => {
                    if changed.is_err() {
                        return Pace::Cancelled;
                    }
                    let current = *rate_rx.borrow_and_update();
                    if current != rate {
                        debug!(client = %id, from = rate, to = current, "rate changed, re-pacing");
                        return Pace::Changed;
                    }
                }
                _ = ticker.tick() => {
                    let written = tokio::select! {
                        _ = self.cancel.cancelled() => return Pace::Cancelled,
                        written = async {
                            stream.write_all(frame).await?;
                            stream.flush().await
                        } => written,
                    };
                    if let Err(e) = written {
                        let err = FleetError::connection_failed("writing to ingest", e);
                        warn!(client = %id, "going idle: {}", err);
                        return Pace::Failed;
                    }
                    let sent = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
                    trace!(client = %id, sent, "packet sent");
                }
            }
        }
    }

    fn set_state(&self, state: EmitterState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }
}
