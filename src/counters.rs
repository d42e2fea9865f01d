//! Per-client and fleet-wide packet counters
//!
//! Ingest is the only writer; the publisher reads them once per window with
//! [`FleetCounters::snapshot_and_reset`]. All state sits behind one lock, so an
//! increment is either fully inside a window's snapshot or fully after it.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::types::{ClientId, Fleet};

/// Counters kept for a single client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowCounters {
    /// Packets since the last publish. Reset every window.
    pub packets_in_window: u64,
    /// Packets since startup. Never reset.
    pub total_packets: u64,
}

/// Counters captured for one publish window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Per-client counters as they were when the window closed.
    pub clients: Vec<(ClientId, WindowCounters)>,
    /// Fleet-wide packets since startup.
    pub total_packets: u64,
    /// Frames dropped as corrupt or unidentifiable since startup.
    pub malformed_frames: u64,
}

impl WindowSnapshot {
    /// Packets ingested across the fleet within this window.
    pub fn window_total(&self) -> u64 {
        self.clients.iter().map(|(_, c)| c.packets_in_window).sum()
    }
}

#[derive(Debug)]
struct CounterTable {
    clients: Vec<WindowCounters>,
    total_packets: u64,
    malformed_frames: u64,
}

/// Shared counters for the whole fleet.
#[derive(Debug)]
pub struct FleetCounters {
    fleet: Fleet,
    table: Mutex<CounterTable>,
}

impl FleetCounters {
    /// Create zeroed counters for every client in `fleet`.
    pub fn new(fleet: Fleet) -> Self {
        let table = CounterTable {
            clients: vec![WindowCounters::default(); fleet.size()],
            total_packets: 0,
            malformed_frames: 0,
        };
        Self { fleet, table: Mutex::new(table) }
    }

    /// Roster these counters were created for.
    pub fn fleet(&self) -> Fleet {
        self.fleet
    }

    /// Count one packet for `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` came from a larger fleet than this one.
    pub fn record(&self, id: ClientId) {
        let mut table = self.lock();
        let client = &mut table.clients[id.index()];
        client.packets_in_window += 1;
        client.total_packets += 1;
        table.total_packets += 1;
    }

    /// Count frames that were dropped without being attributed to a client.
    pub fn record_malformed(&self, frames: u64) {
        self.lock().malformed_frames += frames;
    }

    /// Current counters for one client.
    pub fn client(&self, id: ClientId) -> WindowCounters {
        self.lock().clients[id.index()]
    }

    /// Packets ingested across the fleet since startup.
    pub fn total_packets(&self) -> u64 {
        self.lock().total_packets
    }

    /// Frames dropped by ingest since startup.
    pub fn malformed_frames(&self) -> u64 {
        self.lock().malformed_frames
    }

    /// Capture every client's counters and zero the window counts, as one step.
    pub fn snapshot_and_reset(&self) -> WindowSnapshot {
        let mut table = self.lock();
        let clients = self.fleet.ids().map(|id| (id, table.clients[id.index()])).collect();
        for client in table.clients.iter_mut() {
            client.packets_in_window = 0;
        }

        WindowSnapshot {
            clients,
            total_packets: table.total_packets,
            malformed_frames: table.malformed_frames,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CounterTable> {
        // Counter updates cannot leave the table half-written, so a poisoned lock is still usable.
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn snapshot_resets_window_but_not_totals() {
        let fleet = Fleet::new(2).unwrap();
        let counters = FleetCounters::new(fleet);
        let one = fleet.client(1).unwrap();

        counters.record(one);
        counters.record(one);
        let snapshot = counters.snapshot_and_reset();

        assert_eq!(snapshot.clients[0].1, WindowCounters { packets_in_window: 2, total_packets: 2 });
        assert_eq!(snapshot.window_total(), 2);
        assert_eq!(counters.client(one), WindowCounters { packets_in_window: 0, total_packets: 2 });
        assert_eq!(counters.total_packets(), 2);
    }

    #[test]
    fn snapshot_without_traffic_still_resets() {
        let fleet = Fleet::new(3).unwrap();
        let counters = FleetCounters::new(fleet);

        let snapshot = counters.snapshot_and_reset();
        assert_eq!(snapshot.clients.len(), 3);
        assert_eq!(snapshot.window_total(), 0);
        assert_eq!(snapshot.total_packets, 0);
    }

    #[test]
    fn malformed_frames_are_tracked_separately() {
        let fleet = Fleet::new(1).unwrap();
        let counters = FleetCounters::new(fleet);

        counters.record_malformed(3);
        let snapshot = counters.snapshot_and_reset();

        assert_eq!(snapshot.malformed_frames, 3);
        assert_eq!(snapshot.total_packets, 0);
    }

    #[test]
    fn concurrent_writers_and_snapshots_conserve_counts() {
        let fleet = Fleet::new(4).unwrap();
        let counters = Arc::new(FleetCounters::new(fleet));
        const PER_THREAD: u64 = 5_000;

        let writers: Vec<_> = fleet
            .ids()
            .map(|id| {
                let counters = Arc::clone(&counters);
                std::thread::spawn(move || {
                    for _ in 0..PER_THREAD {
                        counters.record(id);
                    }
                })
            })
            .collect();

        let mut windowed = vec![0u64; fleet.size()];
        while writers.iter().any(|w| !w.is_finished()) {
            for (id, c) in counters.snapshot_and_reset().clients {
                windowed[id.index()] += c.packets_in_window;
            }
        }
        for writer in writers {
            writer.join().unwrap();
        }
        for (id, c) in counters.snapshot_and_reset().clients {
            windowed[id.index()] += c.packets_in_window;
        }

        for id in fleet.ids() {
            assert_eq!(windowed[id.index()], PER_THREAD);
            assert_eq!(counters.client(id).total_packets, PER_THREAD);
        }
        assert_eq!(counters.total_packets(), PER_THREAD * fleet.size() as u64);
    }

    proptest! {
        #[test]
        fn windows_sum_to_totals(
            // Some(client) records a packet, None closes the window.
            events in prop::collection::vec(prop::option::weighted(0.9, 1u32..=5), 0..400),
        ) {
            let fleet = Fleet::new(5).unwrap();
            let counters = FleetCounters::new(fleet);
            let mut expected_window = vec![0u64; 5];
            let mut summed = vec![0u64; 5];

            for event in events {
                match event {
                    Some(raw) => {
                        let id = fleet.client(raw).unwrap();
                        counters.record(id);
                        expected_window[id.index()] += 1;
                    }
                    None => {
                        let snapshot = counters.snapshot_and_reset();
                        for (id, c) in &snapshot.clients {
                            prop_assert_eq!(c.packets_in_window, expected_window[id.index()]);
                            summed[id.index()] += c.packets_in_window;
                        }
                        prop_assert_eq!(
                            snapshot.window_total(),
                            expected_window.iter().sum::<u64>()
                        );
                        expected_window.iter_mut().for_each(|n| *n = 0);
                    }
                }
            }

            for id in fleet.ids() {
                let c = counters.client(id);
                prop_assert_eq!(c.total_packets, summed[id.index()] + c.packets_in_window);
            }
        }
    }
}
