//! OSC Bridge Common Library
//!
//! This crate provides shared types and utilities for OSC device bridges:
//!
//! - [`config`] - Configuration loading (JSON5 format)
//! - [`address`] - OSC address builders and parsers
//! - [`serialization`] - Output formats, JSON encoding and timestamps
//! - [`health`] - Link state and error report vocabulary
//! - [`error`] - Error types

pub mod address;
pub mod config;
pub mod error;
pub mod health;
pub mod serialization;

// Re-export commonly used types at the crate root
pub use address::{
    AddressBuilder, DEFAULT_DEVICE_NAME, HEARTBEAT_ADDRESS, ParsedAddress, parse_address,
};
pub use config::{BaseConfig, LogFormat, LoggingConfig, OscConfig, load_config, parse_config};
pub use error::{Error, Result};
pub use health::{ErrorKind, ErrorReport, LinkSnapshot, LinkState};
pub use serialization::{
    OutputFormat, current_timestamp_millis, current_timestamp_secs, encode_json,
};

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// `RUST_LOG` takes precedence over `config.level` when set.
///
/// # Example
///
/// ```ignore
/// use osc_bridge_common::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
