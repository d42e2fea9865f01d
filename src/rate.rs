//! Desired send rate per client
//!
//! [`RateController`] is the single source of truth for how fast each client
//! should send. Control requests write it; each emitter reads it and waits on
//! its change notification while idle.

use tokio::sync::watch;
use tracing::debug;

use crate::types::{ClientId, Fleet};

/// Per-client desired rate table, in packets per second.
///
/// Every slot is a `watch` channel: reads and writes of one slot are mutually
/// exclusive, and a write wakes any task suspended on [`watch::Receiver::changed`].
#[derive(Debug)]
pub struct RateController {
    fleet: Fleet,
    rates: Vec<watch::Sender<u64>>,
}

impl RateController {
    /// Create a table with every client at rate 0.
    pub fn new(fleet: Fleet) -> Self {
        let rates = fleet.ids().map(|_| watch::Sender::new(0)).collect();
        Self { fleet, rates }
    }

    /// Roster this table was created for.
    pub fn fleet(&self) -> Fleet {
        self.fleet
    }

    /// Current desired rate for `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` came from a larger fleet than this one.
    pub fn get_rate(&self, id: ClientId) -> u64 {
        *self.rates[id.index()].borrow()
    }

    /// Replace the desired rate for `id`, returning the previous value.
    ///
    /// No upper bound is enforced here; the emitter rejects rates it cannot pace.
    ///
    /// # Panics
    ///
    /// Panics if `id` came from a larger fleet than this one.
    pub fn set_rate(&self, id: ClientId, rate: u64) -> u64 {
        let previous = self.rates[id.index()].send_replace(rate);
        debug!(client = %id, previous, rate, "desired rate updated");
        previous
    }

    /// Subscribe to rate changes for `id`.
    ///
    /// The receiver starts with the current value marked as seen.
    pub fn subscribe(&self, id: ClientId) -> watch::Receiver<u64> {
        self.rates[id.index()].subscribe()
    }

    /// Desired rate of every client, ascending by id.
    pub fn rates(&self) -> Vec<(ClientId, u64)> {
        self.fleet.ids().map(|id| (id, self.get_rate(id))).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn starts_at_zero() {
        let fleet = Fleet::new(3).unwrap();
        let rates = RateController::new(fleet);
        assert!(rates.rates().iter().all(|(_, r)| *r == 0));
    }

    #[test]
    fn set_returns_previous_value() {
        let fleet = Fleet::new(1).unwrap();
        let rates = RateController::new(fleet);
        let id = fleet.client(1).unwrap();

        assert_eq!(rates.set_rate(id, 7), 0);
        assert_eq!(rates.set_rate(id, 0), 7);
    }

    #[tokio::test]
    async fn subscriber_wakes_on_change() {
        let fleet = Fleet::new(2).unwrap();
        let rates = Arc::new(RateController::new(fleet));
        let id = fleet.client(2).unwrap();
        let mut rx = rates.subscribe(id);

        let writer = Arc::clone(&rates);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            writer.set_rate(id, 42);
        });

        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .expect("subscriber should be woken")
            .expect("controller still alive");
        assert_eq!(*rx.borrow_and_update(), 42);
    }

    #[tokio::test]
    async fn other_clients_are_not_notified() {
        let fleet = Fleet::new(2).unwrap();
        let rates = RateController::new(fleet);
        let mut rx = rates.subscribe(fleet.client(1).unwrap());

        rates.set_rate(fleet.client(2).unwrap(), 9);

        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_leave_one_of_their_values() {
        let fleet = Fleet::new(1).unwrap();
        let rates = Arc::new(RateController::new(fleet));
        let id = fleet.client(1).unwrap();

        let handles: Vec<_> = (1..=16u64)
            .map(|value| {
                let rates = Arc::clone(&rates);
                tokio::spawn(async move {
                    for _ in 0..100 {
                        rates.set_rate(id, value);
                        let seen = rates.get_rate(id);
                        assert!((1..=16).contains(&seen));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert!((1..=16).contains(&rates.get_rate(id)));
    }

    proptest! {
        #[test]
        fn get_returns_last_value_set(
            writes in prop::collection::vec((1u32..=4, any::<u64>()), 1..64),
        ) {
            let fleet = Fleet::new(4).unwrap();
            let rates = RateController::new(fleet);
            let mut expected = [0u64; 4];

            for (raw, rate) in writes {
                let id = fleet.client(raw).unwrap();
                rates.set_rate(id, rate);
                expected[id.index()] = rate;
                prop_assert_eq!(rates.get_rate(id), rate);
            }

            for (id, rate) in rates.rates() {
                prop_assert_eq!(rate, expected[id.index()]);
            }
        }
    }
}
