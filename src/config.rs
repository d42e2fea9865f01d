//! Fleet configuration
//!
//! Every field has a default, so an empty YAML document is a valid config:
//!
//! ```yaml
//! clients: 3
//! ingest_addr: "127.0.0.1:9000"
//! observer_addr: "127.0.0.1:8080"
//! publish_interval_ms: 1000
//! initial_rates:
//!   2: 5
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::types::Fleet;
use crate::{FleetError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Number of simulated clients, ids `1..=clients`. Default: 3.
    #[serde(default = "default_clients")]
    pub clients: u32,

    /// Address the ingest server listens on. Default: 127.0.0.1:9000.
    #[serde(default = "default_ingest_addr")]
    pub ingest_addr: SocketAddr,

    /// Address observers connect to. Default: 127.0.0.1:8080.
    #[serde(default = "default_observer_addr")]
    pub observer_addr: SocketAddr,

    /// Length of one stats window in milliseconds. Default: 1000.
    #[serde(default = "default_publish_interval_ms")]
    pub publish_interval_ms: u64,

    /// Rates applied before the emitters start, keyed by client id.
    #[serde(default)]
    pub initial_rates: BTreeMap<u32, u64>,
}

fn default_clients() -> u32 {
    3
}

fn default_ingest_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9000))
}

fn default_observer_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_publish_interval_ms() -> u64 {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            clients: default_clients(),
            ingest_addr: default_ingest_addr(),
            observer_addr: default_observer_addr(),
            publish_interval_ms: default_publish_interval_ms(),
            initial_rates: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load and validate a YAML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| FleetError::io(format!("reading {}", path.display()), e))?;
        Self::from_yaml(&text)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(text: &str) -> Result<Self> {
        // An empty document deserializes as null rather than an empty mapping.
        let config: Config = if text.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml_ng::from_str(text)
                .map_err(|e| FleetError::invalid_config("<document>", e.to_string()))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        let fleet = self.fleet()?;

        if self.publish_interval_ms == 0 {
            return Err(FleetError::invalid_config("publish_interval_ms", "must be positive"));
        }

        if let Some(id) = self.initial_rates.keys().find(|id| fleet.client(**id).is_none()) {
            return Err(FleetError::invalid_config(
                "initial_rates",
                format!("client {id} is outside the fleet of {}", self.clients),
            ));
        }

        Ok(())
    }

    /// Roster described by `clients`.
    pub fn fleet(&self) -> Result<Fleet> {
        Fleet::new(self.clients)
    }

    /// Length of one stats window.
    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::from_yaml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.clients, 3);
        assert_eq!(config.publish_interval(), Duration::from_secs(1));
    }

    #[test]
    fn parses_full_document() {
        let config = Config::from_yaml(
            r#"
clients: 12
ingest_addr: "0.0.0.0:9100"
observer_addr: "127.0.0.1:8180"
publish_interval_ms: 500
initial_rates:
  2: 5
  12: 40
"#,
        )
        .unwrap();

        assert_eq!(config.clients, 12);
        assert_eq!(config.ingest_addr.port(), 9100);
        assert_eq!(config.publish_interval(), Duration::from_millis(500));
        assert_eq!(config.initial_rates.get(&12), Some(&40));
    }

    #[test]
    fn rejects_invalid_values() {
        for (doc, field) in [
            ("clients: 0", "clients"),
            ("publish_interval_ms: 0", "publish_interval_ms"),
            ("initial_rates:\n  4: 1", "initial_rates"),
        ] {
            match Config::from_yaml(doc) {
                Err(FleetError::Config { field: got, .. }) => assert_eq!(got, field, "{doc}"),
                other => panic!("{doc:?} should fail on {field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(Config::from_yaml("client_count: 3").is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Config::load(Path::new("/nonexistent/pckts.yaml")).unwrap_err();
        assert!(matches!(err, FleetError::Io { .. }));
    }
}
