// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bridge configuration.

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Default loopback port (the legacy `http://localhost:8472/` prefix).
pub const DEFAULT_PORT: u16 = 8472;

/// What to do when a call id is registered while still outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Fail the new caller immediately and leave the original untouched.
    #[default]
    Reject,
    /// Replace the original registration (logged).
    Overwrite,
}

/// How fresh call ids are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallIdScheme {
    /// `"{target}{n}"` from a monotonically increasing counter.
    #[default]
    Counter,
    /// Random v4 UUIDs.
    Uuid,
}

/// Encoding used when a call crosses a process or wire boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// Path segments plus a URL-encoded JSON `args` query parameter.
    #[default]
    Url,
    /// Legacy slash-joined string segments.
    Path,
    /// A JSON document.
    Json,
}

/// Persistent bridge settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Address the loopback dispatcher binds to and the client connects to.
    pub host: String,
    /// Port of the loopback dispatcher.
    pub port: u16,
    pub duplicate_policy: DuplicatePolicy,
    pub call_ids: CallIdScheme,
    pub wire_format: WireFormat,
    /// Hold outbound calls until the native side signals readiness.
    pub queue_until_native_ready: bool,
    /// Extra channels `deviceReady` waits for besides DOM and native.
    pub ready_gates: Vec<String>,
    /// Largest request the loopback dispatcher will read.
    pub max_request_bytes: usize,
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: DEFAULT_PORT,
            duplicate_policy: DuplicatePolicy::Reject,
            call_ids: CallIdScheme::Counter,
            wire_format: WireFormat::Url,
            queue_until_native_ready: false,
            ready_gates: Vec::new(),
            max_request_bytes: 1024 * 1024,
            log_filter: "info".into(),
        }
    }
}

impl BridgeConfig {
    /// Read a JSON config file. Missing fields fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Write this config as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_request_bytes == 0 {
            return Err(BridgeError::Config("max_request_bytes must be positive".into()));
        }
        self.socket_addr()?;
        Ok(())
    }

    /// The loopback socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| BridgeError::Config(format!("bad address {}:{}: {e}", self.host, self.port)))
    }
}
