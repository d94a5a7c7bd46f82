// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Server pool configuration.
//!
//! Configuration is read from TOML and includes:
//! - `reconnect_delay_ms`: backoff of the default reconnect directive
//! - `response_timeout_ms`: deadline for a submission acknowledgement
//! - `status_timeout_ms`: deadline for a status round trip
//! - `connect_timeout_ms`: deadline for a single connection attempt

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::policy::DEFAULT_RECONNECT_DELAY;

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error.
    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Tunables for a [`ServerPool`](crate::ServerPool).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Delay before reconnecting when the loss policy gives no usable
    /// directive (default: 60000).
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Max time to wait for the server to acknowledge a submission
    /// (default: 20000). Expiry closes the connection.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    /// Max time to wait for a status response (default: 10000).
    #[serde(default = "default_status_timeout_ms")]
    pub status_timeout_ms: u64,
    /// Max time for a single connection attempt (default: 5000).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_reconnect_delay_ms() -> u64 {
    u64::try_from(DEFAULT_RECONNECT_DELAY.as_millis()).unwrap_or(u64::MAX)
}

fn default_response_timeout_ms() -> u64 {
    20_000
}

fn default_status_timeout_ms() -> u64 {
    10_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            reconnect_delay_ms: default_reconnect_delay_ms(),
            response_timeout_ms: default_response_timeout_ms(),
            status_timeout_ms: default_status_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl PoolConfig {
    /// Parse a config from TOML text.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Load a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(PoolConfig::default());
        }
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
