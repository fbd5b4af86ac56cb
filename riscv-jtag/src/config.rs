//! Session configuration.
//!
//! Every section and field has a default, so an empty document is a valid configuration:
//!
//! ```yaml
//! transport:
//!   address: 127.0.0.1:44853
//! dtm:
//!   ir_width: 5
//! dm:
//!   poll_timeout_ms: 1000
//!   poll_interval_ms: 1
//! fields:
//!   decode_mode: lenient
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::fields::DecodeMode;

/// Configuration of a debug session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transport: TransportConfig,
    pub dtm: DtmConfig,
    pub dm: DmConfig,
    pub fields: FieldsConfig,
}

impl Config {
    /// Parses a YAML configuration document.
    pub fn from_yaml(document: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(document)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// The remote bit-bang server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub address: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:44853".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DtmConfig {
    /// IR length of the DTM's TAP.
    pub ir_width: usize,
    /// Run-Test/Idle cycles after every DMI scan. Uses the `dtmcs.idle` hint when unset.
    pub idle_cycles: Option<usize>,
}

impl Default for DtmConfig {
    fn default() -> Self {
        Self {
            ir_width: 5,
            idle_cycles: None,
        }
    }
}

/// Polling discipline of the Debug Module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DmConfig {
    pub poll_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl DmConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for DmConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 1000,
            poll_interval_ms: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldsConfig {
    pub decode_mode: DecodeMode,
}
