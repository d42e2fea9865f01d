//! Rate-change requests coming from observers

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::rate::RateController;
use crate::types::ClientId;

/// Wire shape of a control message: `{"clientId": 2, "rate": 5}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlRequest {
    pub client_id: i64,
    pub rate: i64,
}

/// Why a control message was not applied.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("malformed control message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown client id {client_id} (fleet has {fleet_size} clients)")]
    UnknownClient { client_id: i64, fleet_size: usize },

    #[error("negative rate {rate} requested for client {client_id}")]
    NegativeRate { client_id: i64, rate: i64 },
}

/// A rate change that was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedChange {
    pub client: ClientId,
    pub previous: u64,
    pub rate: u64,
}

/// Validates control requests and writes them to the rate table.
///
/// Requests from different observers race with last-write-wins; requests from
/// one observer are applied in the order that observer sent them.
#[derive(Debug, Clone)]
pub struct ControlChannel {
    rates: Arc<RateController>,
}

impl ControlChannel {
    pub fn new(rates: Arc<RateController>) -> Self {
        Self { rates }
    }

    /// Parse and apply one JSON control message.
    pub fn apply_message(&self, text: &str) -> Result<AppliedChange, ControlError> {
        let request: ControlRequest = serde_json::from_str(text)?;
        self.apply(request)
    }

    /// Validate and apply a decoded request.
    pub fn apply(&self, request: ControlRequest) -> Result<AppliedChange, ControlError> {
        let fleet = self.rates.fleet();
        let client = fleet.client_from_i64(request.client_id).ok_or(
            ControlError::UnknownClient { client_id: request.client_id, fleet_size: fleet.size() },
        )?;
        let rate = u64::try_from(request.rate).map_err(|_| ControlError::NegativeRate {
            client_id: request.client_id,
            rate: request.rate,
        })?;

        let previous = self.rates.set_rate(client, rate);
        info!(client = %client, previous, rate, "rate change applied");
        Ok(AppliedChange { client, previous, rate })
    }
}
