//! Core value types shared across the pipeline.
//!
//! - [`ClientId`] and [`Fleet`] describe the fixed client roster
//! - [`StatsFrame`] is the per-window snapshot pushed to observers

mod client;
mod stats;

pub use client::{ClientId, Fleet, MAX_FLEET_SIZE};
pub use stats::{ClientStats, ServerStats, StatsFrame};
