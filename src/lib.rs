//! Rate-controlled client fleet simulator.
//!
//! A fixed fleet of simulated clients streams small binary packets to an
//! ingest server. The server counts them per client, publishes windowed
//! throughput to connected observers once per window, and accepts rate changes
//! from those observers, which the clients pick up without restarting.
//!
//! # Pipeline
//!
//! ```text
//! observer ──control──▶ ControlChannel ──▶ RateController ──▶ Emitter (× N)
//!                                                                │ TCP, PacketCodec
//! observer ◀──stats──── StatsHub ◀── Publisher ◀── FleetCounters ◀── Ingest
//! ```
//!
//! - [`RateController`]: desired rate per client, with change notification
//! - [`Emitter`]: paced sender, idle without polling while its rate is 0
//! - [`IngestServer`]: decodes frames and feeds [`FleetCounters`]
//! - [`Publisher`]: snapshot-and-reset once per window, fan-out via [`StatsHub`]
//! - [`ObserverServer`]: JSON lines out (stats) and in (control)
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use pckts::{Config, Driver};
//!
//! #[tokio::main]
//! async fn main() -> pckts::Result<()> {
//!     let handle = Driver::start(&Config::default()).await?;
//!     let two = handle.rates().fleet().client(2).expect("fleet has 3 clients");
//!     handle.rates().set_rate(two, 5);
//!
//!     let mut stats = handle.subscribe_stats();
//!     while let Ok(frame) = stats.recv().await {
//!         println!("fleet rate: {}", frame.server().total_packet_rate);
//!     }
//!     Ok(())
//! }
//! ```

mod error;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

pub mod config;
pub mod control;
pub mod counters;
pub mod driver;
pub mod emitter;
pub mod ingest;
pub mod observer;
pub mod publisher;
pub mod rate;
pub mod wire;

pub use error::*;
pub use types::*;

pub use config::Config;
pub use control::{ControlChannel, ControlError, ControlRequest};
pub use counters::{FleetCounters, WindowCounters, WindowSnapshot};
pub use driver::{Driver, DriverHandle};
pub use emitter::{Dialer, Emitter, EmitterHandle, EmitterState, TcpDialer};
pub use ingest::IngestServer;
pub use observer::ObserverServer;
pub use publisher::{Publisher, StatsHub};
pub use rate::RateController;
