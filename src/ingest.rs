//! Ingest server: accepts emitter connections and counts their packets

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::counters::FleetCounters;
use crate::wire::{Decoded, PacketCodec};
use crate::{FleetError, Result};

/// What one connection delivered before it closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionSummary {
    /// Packets attributed to a fleet client.
    pub packets: u64,
    /// Frames dropped as corrupt or unidentifiable.
    pub malformed: u64,
}

/// Listening ingest endpoint.
pub struct IngestServer {
    listener: TcpListener,
    counters: Arc<FleetCounters>,
    cancel: CancellationToken,
}

impl IngestServer {
    /// Bind the ingest listener.
    pub async fn bind(
        addr: SocketAddr,
        counters: Arc<FleetCounters>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let listener =
            TcpListener::bind(addr).await.map_err(|e| FleetError::bind_failed("ingest", addr, e))?;
        Ok(Self { listener, counters, cancel })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(|e| FleetError::io("reading ingest address", e))
    }

    /// Run the accept loop on its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.accept_loop())
    }

    async fn accept_loop(self) {
        info!(addr = ?self.listener.local_addr().ok(), "ingest accepting connections");
        let mut error_count = 0u32;

        loop {
            let accepted = tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    error_count = 0;
                    debug!(%peer, "ingest connection opened");
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(%peer, "set_nodelay failed: {}", e);
                    }

                    let counters = Arc::clone(&self.counters);
                    let cancel = self.cancel.clone();
                    tokio::spawn(async move {
                        let summary = handle_connection(stream, &counters, &cancel).await;
                        debug!(
                            %peer,
                            packets = summary.packets,
                            malformed = summary.malformed,
                            "ingest connection closed"
                        );
                    });
                }
                Err(e) => {
                    // Usually descriptor exhaustion; back off instead of spinning.
                    error_count += 1;
                    error!("ingest accept failed ({}): {}", error_count, e);
                    let backoff = Duration::from_millis(50 * (1 << error_count.min(5)));
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        info!("ingest stopped accepting connections");
    }
}

/// Decode frames from one connection until it closes, counting each packet.
///
/// Corrupt frames and ids outside the fleet are counted as malformed and
/// skipped; only end-of-stream, a read error or cancellation ends the loop.
pub async fn handle_connection<R>(
    reader: R,
    counters: &FleetCounters,
    cancel: &CancellationToken,
) -> ConnectionSummary
where
    R: AsyncRead + Unpin,
{
    let fleet = counters.fleet();
    let mut frames = FramedRead::new(reader, PacketCodec::default());
    let mut summary = ConnectionSummary::default();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = frames.next() => next,
        };

        match next {
            Some(Ok(Decoded::Packet(packet))) => match fleet.client(packet.client_id) {
                Some(id) => {
                    counters.record(id);
                    summary.packets += 1;
                    trace!(client = %id, "packet ingested");
                }
                None => {
                    counters.record_malformed(1);
                    summary.malformed += 1;
                    warn!(client_id = packet.client_id, "dropping packet from unknown client");
                }
            },
            Some(Ok(Decoded::Malformed(reason))) => {
                counters.record_malformed(1);
                summary.malformed += 1;
                debug!("dropping malformed frame: {}", reason);
            }
            Some(Err(e)) => {
                debug!("ingest read failed: {}", e);
                break;
            }
            None => break,
        }
    }

    summary
}
