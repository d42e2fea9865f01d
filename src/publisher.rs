//! Windowed stats aggregation and fan-out to observers

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::counters::FleetCounters;
use crate::types::StatsFrame;

/// Frames buffered per observer before it counts as lagging.
pub const DEFAULT_HUB_CAPACITY: usize = 16;

/// Fan-out point for published stats frames.
///
/// Publishing never waits on observers. An observer that falls more than the
/// hub capacity behind sees a lag error on its receiver and is expected to
/// disconnect.
#[derive(Debug, Clone)]
pub struct StatsHub {
    tx: broadcast::Sender<Arc<StatsFrame>>,
}

impl StatsHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Register a new observer. It receives frames published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<StatsFrame>> {
        self.tx.subscribe()
    }

    /// Number of observers currently subscribed.
    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Hand `frame` to every subscribed observer, returning how many there were.
    pub fn publish(&self, frame: Arc<StatsFrame>) -> usize {
        // Err only means nobody is subscribed.
        self.tx.send(frame).unwrap_or(0)
    }
}

impl Default for StatsHub {
    fn default() -> Self {
        Self::new(DEFAULT_HUB_CAPACITY)
    }
}

/// Periodic snapshot-reset-publish cycle.
pub struct Publisher {
    counters: Arc<FleetCounters>,
    hub: StatsHub,
    window: Duration,
    cancel: CancellationToken,
}

impl Publisher {
    pub fn new(
        counters: Arc<FleetCounters>,
        hub: StatsHub,
        window: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self { counters, hub, window, cancel }
    }

    /// Run one cycle: snapshot and reset the window, then publish.
    pub fn publish_once(&self) -> Arc<StatsFrame> {
        let snapshot = self.counters.snapshot_and_reset();
        let frame = Arc::new(StatsFrame::from_snapshot(&snapshot, self.window));
        let observers = self.hub.publish(Arc::clone(&frame));
        trace!(
            observers,
            packets = snapshot.window_total(),
            rate = frame.server().total_packet_rate,
            total = frame.server().total_packets_received,
            "stats published"
        );
        frame
    }

    /// Run the cycle on its own task until cancelled.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        info!(window = ?self.window, "publisher started");
        let mut ticker = interval_at(Instant::now() + self.window, self.window);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = 0u64;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.publish_once();
                    cycles += 1;
                }
            }
        }

        debug!(cycles, "publisher stopped");
    }
}
