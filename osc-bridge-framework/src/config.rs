//! Configuration traits and utilities.

use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::{LoggingConfig, OscConfig, OutputFormat};

/// Shortest period any timer setting or command may ask for.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Convert a seconds setting into a timer period of at least [`MIN_INTERVAL`].
pub fn interval_from_secs(secs: f64, name: &str) -> Result<Duration> {
    match Duration::try_from_secs_f64(secs) {
        Ok(period) if period >= MIN_INTERVAL => Ok(period),
        _ => Err(BridgeError::validation(format!(
            "{} must be at least {} ms, got {}",
            name,
            MIN_INTERVAL.as_millis(),
            secs
        ))),
    }
}

/// Session liveness settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle time after which a client session is dropped.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: f64,
}

fn default_ttl_secs() -> f64 {
    300.0
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs_f64(self.ttl_secs)
    }
}

/// Heartbeat broadcast settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Send `/system/heartbeat` to every session.
    #[serde(default = "default_heartbeat_enabled")]
    pub enabled: bool,

    /// Broadcast and expiry sweep period.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: f64,
}

fn default_heartbeat_enabled() -> bool {
    true
}

fn default_heartbeat_interval() -> f64 {
    5.0
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: default_heartbeat_enabled(),
            interval_secs: default_heartbeat_interval(),
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs)
    }
}

/// Trait for bridge configuration types.
///
/// Implement this trait for your bridge's configuration struct to get
/// automatic loading, validation, and access to common config fields.
///
/// # Example
///
/// ```ignore
/// use serde::Deserialize;
/// use osc_bridge_framework::{BridgeConfig, HeartbeatConfig, LoggingConfig, OscConfig, SessionConfig};
///
/// #[derive(Debug, Deserialize)]
/// pub struct MyBridgeConfig {
///     pub device_name: String,
///     pub osc: OscConfig,
///     pub logging: LoggingConfig,
///     pub session: SessionConfig,
///     pub heartbeat: HeartbeatConfig,
/// }
///
/// impl BridgeConfig for MyBridgeConfig {
///     fn osc(&self) -> &OscConfig { &self.osc }
///     fn logging(&self) -> &LoggingConfig { &self.logging }
///     fn device_name(&self) -> &str { &self.device_name }
///     fn session(&self) -> &SessionConfig { &self.session }
///     fn heartbeat(&self) -> &HeartbeatConfig { &self.heartbeat }
/// }
/// ```
pub trait BridgeConfig: Sized + DeserializeOwned {
    /// Get the OSC endpoint configuration.
    fn osc(&self) -> &OscConfig;

    /// Get the logging configuration.
    fn logging(&self) -> &LoggingConfig;

    /// Device name used as the prefix of every reply address.
    fn device_name(&self) -> &str;

    /// Get the session liveness settings.
    fn session(&self) -> &SessionConfig;

    /// Get the heartbeat settings.
    fn heartbeat(&self) -> &HeartbeatConfig;

    /// Format new sessions start with.
    fn default_format(&self) -> OutputFormat {
        OutputFormat::default()
    }

    /// Validate the configuration.
    ///
    /// Called automatically after loading. Override to add custom validation,
    /// and call [`validate_common`](Self::validate_common) from the override.
    fn validate(&self) -> Result<()> {
        self.validate_common()
    }

    /// Checks shared by every bridge.
    fn validate_common(&self) -> Result<()> {
        if self.device_name().trim().is_empty() {
            return Err(BridgeError::validation("device_name cannot be empty"));
        }
        if self.device_name().contains('/') {
            return Err(BridgeError::validation("device_name cannot contain '/'"));
        }
        if self.osc().return_port == Some(0) {
            return Err(BridgeError::validation("osc.return_port must be non-zero"));
        }
        self.osc().bind_addr()?;
        interval_from_secs(self.session().ttl_secs, "session.ttl_secs")?;
        interval_from_secs(self.heartbeat().interval_secs, "heartbeat.interval_secs")?;
        Ok(())
    }

    /// Load configuration from a file path.
    ///
    /// Supports JSON5 format. Calls [`validate`](Self::validate) after loading.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BridgeError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = json5::from_str(&content)?;

        config.validate()?;

        Ok(config)
    }
}
