//! Driver wires the fleet together and owns its tasks

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::control::ControlChannel;
use crate::counters::FleetCounters;
use crate::emitter::{Emitter, EmitterHandle, TcpDialer};
use crate::ingest::IngestServer;
use crate::observer::ObserverServer;
use crate::publisher::{Publisher, StatsHub};
use crate::rate::RateController;
use crate::types::{ClientId, StatsFrame};
use crate::Result;

/// Running fleet.
///
/// Dropping the handle cancels every task; [`DriverHandle::shutdown`] also
/// waits for them to finish.
pub struct DriverHandle {
    ingest_addr: SocketAddr,
    observer_addr: SocketAddr,
    rates: Arc<RateController>,
    counters: Arc<FleetCounters>,
    hub: StatsHub,
    emitters: Vec<EmitterHandle>,
    tasks: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

/// Starts ingest, publisher, observer endpoint and one emitter per client.
pub struct Driver;

impl Driver {
    /// Bind both listeners and spawn every task.
    ///
    /// Fails only if the config is invalid or a listener cannot be bound.
    pub async fn start(config: &Config) -> Result<DriverHandle> {
        config.validate()?;
        let fleet = config.fleet()?;
        let cancel = CancellationToken::new();

        let rates = Arc::new(RateController::new(fleet));
        let counters = Arc::new(FleetCounters::new(fleet));
        let hub = StatsHub::default();

        let ingest =
            IngestServer::bind(config.ingest_addr, Arc::clone(&counters), cancel.clone()).await?;
        let ingest_addr = ingest.local_addr()?;

        let observer = ObserverServer::bind(
            config.observer_addr,
            hub.clone(),
            ControlChannel::new(Arc::clone(&rates)),
            config.publish_interval(),
            cancel.clone(),
        )
        .await?;
        let observer_addr = observer.local_addr()?;

        let publisher = Publisher::new(
            Arc::clone(&counters),
            hub.clone(),
            config.publish_interval(),
            cancel.clone(),
        );
        let tasks = vec![ingest.spawn(), publisher.spawn(), observer.spawn()];

        for (raw, rate) in &config.initial_rates {
            if let Some(id) = fleet.client(*raw) {
                rates.set_rate(id, *rate);
            }
        }

        let dialer = TcpDialer::new(dialable(ingest_addr));
        let emitters = fleet
            .ids()
            .map(|id| Emitter::spawn(id, dialer.clone(), Arc::clone(&rates), cancel.clone()))
            .collect();

        info!(
            clients = fleet.size(),
            %ingest_addr,
            %observer_addr,
            window = ?config.publish_interval(),
            "fleet started"
        );

        Ok(DriverHandle {
            ingest_addr,
            observer_addr,
            rates,
            counters,
            hub,
            emitters,
            tasks,
            cancel,
        })
    }
}

/// Emitters cannot dial a wildcard address; use loopback of the same family.
fn dialable(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(Ipv4Addr::LOCALHOST.into(), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(Ipv6Addr::LOCALHOST.into(), addr.port())
        }
        _ => addr,
    }
}

impl DriverHandle {
    /// Address the ingest server is bound to.
    pub fn ingest_addr(&self) -> SocketAddr {
        self.ingest_addr
    }

    /// Address observers connect to.
    pub fn observer_addr(&self) -> SocketAddr {
        self.observer_addr
    }

    /// Shared rate table.
    pub fn rates(&self) -> &Arc<RateController> {
        &self.rates
    }

    /// Shared ingest counters.
    pub fn counters(&self) -> &Arc<FleetCounters> {
        &self.counters
    }

    /// Subscribe to stats frames in-process, as an observer would over TCP.
    pub fn subscribe_stats(&self) -> broadcast::Receiver<Arc<StatsFrame>> {
        self.hub.subscribe()
    }

    /// Emitter for one client.
    pub fn emitter(&self, id: ClientId) -> Option<&EmitterHandle> {
        self.emitters.iter().find(|e| e.id() == id)
    }

    /// Token that stops every task when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop every task and wait for them to exit.
    pub async fn shutdown(mut self) {
        info!("shutting down fleet");
        self.cancel.cancel();

        for emitter in std::mem::take(&mut self.emitters) {
            let id = emitter.id();
            if let Err(e) = emitter.join().await {
                warn!(client = %id, "emitter task failed: {}", e);
            }
        }
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                warn!("fleet task failed: {}", e);
            }
        }

        info!("fleet stopped");
    }
}

impl Drop for DriverHandle {
    fn drop(&mut self) {
        debug!("dropping fleet driver handle");
        self.cancel.cancel();
    }
}
