//! Stats frame published to observers once per window

use std::time::Duration;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use super::ClientId;
use crate::counters::WindowSnapshot;

/// Per-client entry of a [`StatsFrame`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStats {
    /// Packets ingested for this client since startup.
    pub total_packets_received: u64,
    /// Packets ingested during the window this frame covers.
    pub packets_received_in_window: u64,
    /// Window count normalised to packets per second.
    pub rate: u64,
}

/// Fleet-wide entry of a [`StatsFrame`], published under the `server` key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStats {
    /// Sum of every client's `rate` in this frame.
    pub total_packet_rate: u64,
    /// Packets ingested across the fleet since startup.
    pub total_packets_received: u64,
    /// Frames dropped by ingest as corrupt or unidentifiable since startup.
    pub malformed_frames: u64,
}

/// One immutable snapshot of fleet throughput.
///
/// Serializes as a flat JSON object keyed `client1..clientN` plus `server`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsFrame {
    clients: Vec<(ClientId, ClientStats)>,
    server: ServerStats,
}

impl StatsFrame {
    /// Build the frame for one window from the counters snapshot taken for it.
    pub fn from_snapshot(snapshot: &WindowSnapshot, window: Duration) -> Self {
        let clients: Vec<(ClientId, ClientStats)> = snapshot
            .clients
            .iter()
            .map(|(id, counters)| {
                let stats = ClientStats {
                    total_packets_received: counters.total_packets,
                    packets_received_in_window: counters.packets_in_window,
                    rate: per_second(counters.packets_in_window, window),
                };
                (*id, stats)
            })
            .collect();

        let server = ServerStats {
            // Summed after normalising so the fleet rate always matches its clients.
            total_packet_rate: clients.iter().map(|(_, stats)| stats.rate).sum(),
            total_packets_received: snapshot.total_packets,
            malformed_frames: snapshot.malformed_frames,
        };

        Self { clients, server }
    }

    /// Stats for one client.
    pub fn client(&self, id: ClientId) -> Option<&ClientStats> {
        self.clients.iter().find(|(cid, _)| *cid == id).map(|(_, stats)| stats)
    }

    /// Stats for every client, ascending by id.
    pub fn clients(&self) -> impl Iterator<Item = (ClientId, &ClientStats)> {
        self.clients.iter().map(|(id, stats)| (*id, stats))
    }

    /// Fleet-wide totals.
    pub fn server(&self) -> &ServerStats {
        &self.server
    }

    /// Encode as a single JSON line (no trailing newline).
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl Serialize for StatsFrame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.clients.len() + 1))?;
        for (id, stats) in &self.clients {
            map.serialize_entry(&id.stats_key(), stats)?;
        }
        map.serialize_entry("server", &self.server)?;
        map.end()
    }
}

/// Normalise a window count to events per second.
fn per_second(count: u64, window: Duration) -> u64 {
    if window == Duration::from_secs(1) || window.is_zero() {
        return count;
    }
    (count as f64 / window.as_secs_f64()).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::FleetCounters;
    use crate::types::Fleet;

    fn frame_with(counts: &[(u32, u64)], window: Duration) -> StatsFrame {
        let fleet = Fleet::new(3).unwrap();
        let counters = FleetCounters::new(fleet);
        for &(raw, n) in counts {
            let id = fleet.client(raw).unwrap();
            for _ in 0..n {
                counters.record(id);
            }
        }
        StatsFrame::from_snapshot(&counters.snapshot_and_reset(), window)
    }

    #[test]
    fn json_uses_contract_field_names() {
        let frame = frame_with(&[(2, 5)], Duration::from_secs(1));
        let value: serde_json::Value =
            serde_json::from_str(&frame.to_json_line().unwrap()).unwrap();

        assert_eq!(value["client2"]["totalPacketsReceived"], 5);
        assert_eq!(value["client2"]["packetsReceivedInWindow"], 5);
        assert_eq!(value["client2"]["rate"], 5);
        assert_eq!(value["client1"]["rate"], 0);
        assert_eq!(value["client3"]["rate"], 0);
        assert_eq!(value["server"]["totalPacketRate"], 5);
        assert_eq!(value["server"]["totalPacketsReceived"], 5);
        assert_eq!(value["server"]["malformedFrames"], 0);
        assert_eq!(value.as_object().unwrap().len(), 4);
    }

    #[test]
    fn fleet_rate_is_sum_of_client_windows() {
        let frame = frame_with(&[(1, 3), (2, 4), (3, 7)], Duration::from_secs(1));
        let sum: u64 = frame.clients().map(|(_, s)| s.packets_received_in_window).sum();
        assert_eq!(frame.server().total_packet_rate, sum);
        assert_eq!(sum, 14);
    }

    #[test]
    fn rate_is_normalised_for_non_unit_windows() {
        let frame = frame_with(&[(1, 10)], Duration::from_millis(500));
        let id = Fleet::new(3).unwrap().client(1).unwrap();
        let stats = frame.client(id).unwrap();

        assert_eq!(stats.packets_received_in_window, 10);
        assert_eq!(stats.rate, 20);
        assert_eq!(frame.server().total_packet_rate, 20);
    }

    #[test]
    fn fleet_rate_matches_client_rates_when_rounding() {
        let frame = frame_with(&[(1, 1), (2, 1), (3, 1)], Duration::from_secs(3));
        let client_rates: u64 = frame.clients().map(|(_, s)| s.rate).sum();

        assert!(frame.clients().all(|(_, s)| s.rate == 0 && s.packets_received_in_window == 1));
        assert_eq!(frame.server().total_packet_rate, client_rates);
        assert_eq!(frame.server().total_packets_received, 3);
    }
}
