//! Bridge status reporting.

use std::net::SocketAddr;

use rosc::OscType;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::transmitter::{OscTransmitter, TransmitStats};

/// Path below the device that status documents are sent to.
pub const STATUS_PATH: &str = "system/status";

/// Bridge status information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeStatus {
    /// Bridge name (e.g., "encoder").
    pub bridge: String,
    /// Bridge version.
    pub version: String,
    /// Current status ("running" or "offline").
    pub status: String,
    /// Additional metadata (bridge-specific).
    #[serde(flatten)]
    pub metadata: serde_json::Value,
}

impl BridgeStatus {
    /// Create a new status with "running" state.
    pub fn running(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            bridge: bridge.into(),
            version: version.into(),
            status: "running".to_string(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Create a status with "offline" state.
    pub fn offline(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            bridge: bridge.into(),
            version: version.into(),
            status: "offline".to_string(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Add metadata to the status.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Send this status to many clients.
    pub async fn broadcast<I>(&self, transmitter: &OscTransmitter, targets: I) -> Result<TransmitStats>
    where
        I: IntoIterator<Item = SocketAddr>,
    {
        let json = serde_json::to_string(self)?;
        let address = transmitter.build_address(STATUS_PATH);
        Ok(transmitter
            .broadcast(targets, &address, vec![OscType::String(json)])
            .await)
    }
}
