//! Observer endpoint: pushes stats frames and reads control requests
//!
//! Each observer connection carries newline-delimited JSON both ways. The
//! server writes one [`StatsFrame`] per publish window; the observer may write
//! `{"clientId": .., "rate": ..}` lines at any time. The two directions run on
//! separate tasks and whichever ends first tears the session down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::codec::{Decoder, FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::control::ControlChannel;
use crate::publisher::StatsHub;
use crate::types::StatsFrame;
use crate::{FleetError, Result};

/// Longest control line accepted; longer lines are discarded.
pub const MAX_CONTROL_LINE: usize = 4096;

/// One line read from an observer.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ControlLine {
    Text(String),
    TooLong,
    NotUtf8,
}

/// Line codec that reports bad lines as items so the session survives them.
struct ControlLineCodec {
    lines: LinesCodec,
}

impl ControlLineCodec {
    fn new() -> Self {
        Self { lines: LinesCodec::new_with_max_length(MAX_CONTROL_LINE) }
    }

    fn map(result: Result<Option<String>, LinesCodecError>) -> std::io::Result<Option<ControlLine>> {
        match result {
            Ok(line) => Ok(line.map(ControlLine::Text)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(ControlLine::TooLong)),
            Err(LinesCodecError::Io(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
                Ok(Some(ControlLine::NotUtf8))
            }
            Err(LinesCodecError::Io(e)) => Err(e),
        }
    }
}

impl Decoder for ControlLineCodec {
    type Item = ControlLine;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> std::io::Result<Option<ControlLine>> {
        Self::map(self.lines.decode(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> std::io::Result<Option<ControlLine>> {
        Self::map(self.lines.decode_eof(src))
    }
}

/// Listening observer endpoint.
pub struct ObserverServer {
    listener: TcpListener,
    hub: StatsHub,
    control: ControlChannel,
    send_timeout: Duration,
    cancel: CancellationToken,
}

impl ObserverServer {
    /// Bind the observer listener.
    ///
    /// An observer that cannot take a frame within `send_timeout` is dropped.
    pub async fn bind(
        addr: SocketAddr,
        hub: StatsHub,
        control: ControlChannel,
        send_timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| FleetError::bind_failed("observer", addr, e))?;
        Ok(Self { listener, hub, control, send_timeout, cancel })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(|e| FleetError::io("reading observer address", e))
    }

    /// Run the accept loop on its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.accept_loop())
    }

    async fn accept_loop(self) {
        info!(addr = ?self.listener.local_addr().ok(), "observer endpoint accepting connections");

        loop {
            let accepted = tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    info!(%peer, observers = self.hub.observer_count() + 1, "observer connected");
                    let (reader, writer) = stream.into_split();
                    let frames = self.hub.subscribe();
                    let control = self.control.clone();
                    let send_timeout = self.send_timeout;
                    let cancel = self.cancel.clone();
                    tokio::spawn(async move {
                        serve_observer(reader, writer, frames, control, send_timeout, cancel)
                            .await;
                        info!(%peer, "observer disconnected");
                    });
                }
                Err(e) => {
                    error!("observer accept failed: {}", e);
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }

        info!("observer endpoint stopped");
    }
}

/// Serve one observer until either direction ends or `cancel` fires.
///
/// A frame write that does not complete within `send_timeout` ends the session.
pub async fn serve_observer<R, W>(
    reader: R,
    writer: W,
    frames: broadcast::Receiver<Arc<StatsFrame>>,
    control: ControlChannel,
    send_timeout: Duration,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let session = cancel.child_token();
    let push = tokio::spawn(push_stats(writer, frames, send_timeout, session.clone()));

    read_control(reader, &control, &session).await;
    session.cancel();

    if let Err(e) = push.await {
        warn!("stats push task failed: {}", e);
    }
}

async fn push_stats<W>(
    writer: W,
    frames: broadcast::Receiver<Arc<StatsFrame>>,
    send_timeout: Duration,
    session: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(writer, LinesCodec::new());
    let mut frames = BroadcastStream::new(frames);

    loop {
        let next = tokio::select! {
            _ = session.cancelled() => break,
            next = frames.next() => next,
        };

        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                warn!(skipped, "observer fell behind, dropping it");
                break;
            }
            None => break,
        };

        let line = match frame.to_json_line() {
            Ok(line) => line,
            Err(e) => {
                error!("failed to encode stats frame: {}", e);
                continue;
            }
        };

        let sent = tokio::select! {
            _ = session.cancelled() => break,
            sent = tokio::time::timeout(send_timeout, sink.send(line)) => sent,
        };
        match sent {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("stats delivery failed, dropping observer: {}", e);
                break;
            }
            Err(_) => {
                warn!(?send_timeout, "observer stopped reading, dropping it");
                break;
            }
        }
    }

    session.cancel();
}

async fn read_control<R>(reader: R, control: &ControlChannel, session: &CancellationToken)
where
    R: AsyncRead + Unpin,
{
    let mut lines = FramedRead::new(reader, ControlLineCodec::new());

    loop {
        let next = tokio::select! {
            _ = session.cancelled() => break,
            next = lines.next() => next,
        };

        match next {
            Some(Ok(ControlLine::Text(text))) => {
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                if let Err(e) = control.apply_message(text) {
                    warn!("control request rejected: {}", e);
                }
            }
            Some(Ok(ControlLine::TooLong)) => {
                warn!(limit = MAX_CONTROL_LINE, "control line too long, discarded");
            }
            Some(Ok(ControlLine::NotUtf8)) => {
                warn!("control line is not valid UTF-8, discarded");
            }
            Some(Err(e)) => {
                debug!("control read failed: {}", e);
                break;
            }
            None => break,
        }
    }
}
