//! Client identity and the fleet roster

use std::fmt;
use std::num::NonZeroU32;

use crate::{FleetError, Result};

/// Largest fleet the simulator will configure.
pub const MAX_FLEET_SIZE: u32 = 1024;

/// Identifier of one simulated client.
///
/// Only obtainable through a [`Fleet`], so every `ClientId` in circulation has
/// already been checked against the roster it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(NonZeroU32);

impl ClientId {
    /// Numeric id as carried on the wire (1-based).
    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// Key used for this client in published stats frames.
    pub fn stats_key(self) -> String {
        format!("client{}", self.0)
    }

    /// Zero-based slot in per-client tables.
    pub(crate) fn index(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The fixed set of clients configured at startup, ids `1..=size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fleet {
    size: u32,
}

impl Fleet {
    /// Create a roster of `size` clients.
    pub fn new(size: u32) -> Result<Self> {
        if size == 0 || size > MAX_FLEET_SIZE {
            return Err(FleetError::invalid_config(
                "clients",
                format!("fleet size must be within 1..={MAX_FLEET_SIZE}, got {size}"),
            ));
        }
        Ok(Self { size })
    }

    /// Number of clients in the fleet.
    pub fn size(&self) -> usize {
        self.size as usize
    }

    /// Look up a client by its numeric id.
    ///
    /// Returns `None` for ids outside `1..=size`.
    pub fn client(&self, raw: u32) -> Option<ClientId> {
        if raw > self.size {
            return None;
        }
        NonZeroU32::new(raw).map(ClientId)
    }

    /// Look up a client by an untrusted signed id (control requests).
    pub fn client_from_i64(&self, raw: i64) -> Option<ClientId> {
        u32::try_from(raw).ok().and_then(|id| self.client(id))
    }

    /// All client ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = ClientId> + use<> {
        (1..=self.size).filter_map(NonZeroU32::new).map(ClientId)
    }
}
